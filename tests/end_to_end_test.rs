//! End-to-end tests
//!
//! Drive the whole desk (session, access gate, collection, mutations)
//! against the in-process request API.

use request_desk::{
    ClientConfig, FilterPatch, InMemoryTransport, LoadState, MemoryStorage, MutationOutcome,
    MutationState, Navigation, RecordingNavigator, RequestChanges, RequestDesk, RequestFields,
    RequestStatus, SdkError, SessionStorage,
};
use std::sync::Arc;

struct Harness {
    server: InMemoryTransport,
    storage: Arc<dyn SessionStorage>,
    navigator: Arc<RecordingNavigator>,
    desk: RequestDesk,
}

async fn harness() -> Harness {
    let server = InMemoryTransport::new();
    server.register_user("owner@example.com", "password123").await;
    server.register_user("other@example.com", "password123").await;

    let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());
    let navigator = Arc::new(RecordingNavigator::new());
    let desk = RequestDesk::new(
        ClientConfig::default(),
        Arc::new(server.clone()),
        storage.clone(),
        navigator.clone(),
    );

    Harness {
        server,
        storage,
        navigator,
        desk,
    }
}

// ============================================================================
// Ownership follows the current session
// ============================================================================

#[tokio::test]
async fn test_created_request_is_editable_until_logout() {
    let mut h = harness().await;

    h.desk.login("owner@example.com", "password123").await.unwrap();
    let record = h
        .desk
        .create(RequestFields::new("Fix printer", "Paper jam on the third floor"))
        .await
        .unwrap();
    assert_eq!(h.navigator.last().as_deref(), Some("/requests"));

    h.desk.collection().fetch().await.unwrap();
    let view = h.desk.view().await;
    assert_eq!(view.page, 1);
    assert!(view.filters.is_empty());

    let listed = h.desk.requests().await;
    let item = listed
        .iter()
        .find(|item| item.record.title == "Fix printer")
        .expect("created request is listed on page 1");
    assert_eq!(item.record.id, record.id);
    assert!(item.can_mutate);

    h.desk.logout().await;
    h.desk.collection().fetch().await.unwrap();

    let item = h
        .desk
        .requests()
        .await
        .into_iter()
        .find(|item| item.record.id == record.id)
        .expect("request still listed after logout");
    assert!(!item.can_mutate);
}

#[tokio::test]
async fn test_guest_sees_requests_but_cannot_mutate() {
    let mut h = harness().await;
    h.desk.login("owner@example.com", "password123").await.unwrap();
    let record = h
        .desk
        .create(RequestFields::new("Fix printer", "x"))
        .await
        .unwrap();
    h.desk.logout().await;

    h.desk.guest_login().await.unwrap();
    assert!(h.desk.identity().is_guest());
    assert!(h.desk.requests().await.iter().all(|item| !item.can_mutate));

    assert_eq!(
        h.desk.navigate("/requests/new"),
        Navigation::Redirect("/requests".into())
    );
    let err = h
        .desk
        .delete(record.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::Authorization(_)));
}

// ============================================================================
// Filtering and pagination
// ============================================================================

#[tokio::test]
async fn test_filter_with_no_matches_disables_pagination() {
    let mut h = harness().await;
    h.desk.login("owner@example.com", "password123").await.unwrap();
    for i in 0..3 {
        h.desk
            .create(RequestFields::new(format!("Pending {}", i), "x"))
            .await
            .unwrap();
    }

    h.desk
        .collection()
        .set_filters(FilterPatch::new().status(Some(RequestStatus::Approved)))
        .await
        .unwrap();

    let view = h.desk.view().await;
    assert!(view.items.is_empty());
    assert_eq!(view.total_count, 0);
    assert_eq!(view.load_state, LoadState::Loaded);
    assert!(!view.has_next());
    assert!(!view.has_previous());
}

#[tokio::test]
async fn test_deleting_only_item_on_last_page_steps_back() {
    let mut h = harness().await;
    h.desk.login("owner@example.com", "password123").await.unwrap();
    for i in 0..11 {
        h.desk
            .create(RequestFields::new(format!("Request {}", i), "x"))
            .await
            .unwrap();
    }

    let collection = h.desk.collection().clone();
    collection.fetch().await.unwrap();
    collection.set_page(2).await.unwrap();
    let view = collection.snapshot().await;
    assert_eq!(view.page, 2);
    assert_eq!(view.items.len(), 1);
    let last = view.items[0].id;

    h.desk.delete(last).await.unwrap();
    assert_eq!(
        h.desk.mutation_state(),
        &MutationState::Committed(MutationOutcome::Deleted(last))
    );

    let view = collection.snapshot().await;
    assert_eq!(view.page, 1);
    assert_eq!(view.items.len(), 10);
    assert_eq!(view.total_count, 10);
    assert!(!view.has_next());

    collection.fetch().await.unwrap();
    assert_eq!(collection.snapshot().await.page, 1);
}

// ============================================================================
// Mutation failures
// ============================================================================

#[tokio::test]
async fn test_update_flow_and_validation_message() {
    let mut h = harness().await;
    h.desk.login("owner@example.com", "password123").await.unwrap();
    let record = h
        .desk
        .create(RequestFields::new("Fix printer", "x"))
        .await
        .unwrap();

    let blank = RequestChanges {
        title: Some(String::new()),
        ..Default::default()
    };
    assert!(h.desk.update(record.id, blank).await.is_err());
    assert_eq!(
        h.desk.mutation_state().message().as_deref(),
        Some("Title can't be blank")
    );

    let approve = RequestChanges {
        status: Some(RequestStatus::Approved),
        ..Default::default()
    };
    let updated = h.desk.update(record.id, approve).await.unwrap();
    assert_eq!(updated.status, RequestStatus::Approved);
    assert_eq!(h.navigator.last(), Some(format!("/requests/{}", record.id)));
}

#[tokio::test]
async fn test_deleting_vanished_request_reports_not_found() {
    let mut h = harness().await;
    h.desk.login("owner@example.com", "password123").await.unwrap();
    let record = h
        .desk
        .create(RequestFields::new("Fix printer", "x"))
        .await
        .unwrap();

    h.server.remove_request(record.id).await;
    let err = h.desk.delete(record.id).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!h.desk.collection().contains(record.id).await);
}

#[tokio::test]
async fn test_offline_logout_still_clears_session() {
    let mut h = harness().await;
    h.desk.login("owner@example.com", "password123").await.unwrap();
    h.server.set_offline(true).await;

    h.desk.logout().await;
    assert!(h.desk.identity().is_anonymous());
    assert_eq!(h.storage.read("token").unwrap(), None);
    assert_eq!(h.storage.read("user").unwrap(), None);
}
