//! Resource mutation coordinator
//!
//! Create, update and delete against the request API. Each call runs the
//! access check before any network I/O, walks an explicit
//! `Idle -> Pending -> Committed | Failed` state machine, and on success
//! invalidates the collection and tells the router where to go next.

use crate::access;
use crate::collection::CollectionEngine;
use crate::error::{MutationKind, Result, SdkError};
use crate::navigation::Navigator;
use crate::session::Session;
use crate::transport::Transport;
use crate::types::{RequestChanges, RequestEnvelope, RequestFields, RequestId, RequestRecord};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a committed mutation produced
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Created(RequestRecord),
    Updated(RequestRecord),
    Deleted(RequestId),
}

/// Rendering tag for the last mutation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MutationState {
    #[default]
    Idle,
    Pending(MutationKind),
    Committed(MutationOutcome),
    Failed { kind: MutationKind, error: SdkError },
}

impl MutationState {
    /// User-facing failure message, if the last mutation failed
    pub fn message(&self) -> Option<String> {
        match self {
            MutationState::Failed { kind, error } => Some(error.user_message(*kind)),
            _ => None,
        }
    }
}

fn request_path(id: RequestId) -> String {
    format!("/requests/{}", id)
}

/// Drives request mutations on behalf of the current session
pub struct MutationCoordinator {
    transport: Arc<dyn Transport>,
    collection: CollectionEngine,
    navigator: Arc<dyn Navigator>,
    state: MutationState,
}

impl MutationCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        collection: CollectionEngine,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            transport,
            collection,
            navigator,
            state: MutationState::Idle,
        }
    }

    pub fn state(&self) -> &MutationState {
        &self.state
    }

    /// Back to `Idle`, e.g. when the form is reopened
    pub fn reset(&mut self) {
        self.state = MutationState::Idle;
    }

    /// Fetch a single request for the detail and edit views
    pub async fn load(&self, session: &Session, id: RequestId) -> Result<RequestRecord> {
        let response = self
            .transport
            .get(&request_path(id), Vec::new(), session.credential())
            .await?;
        let envelope: RequestEnvelope = response.json()?;
        Ok(envelope.request)
    }

    /// Create a request; on success the list is refreshed and the router
    /// sent to the listing
    pub async fn create(&mut self, session: &Session, fields: RequestFields) -> Result<RequestRecord> {
        self.state = MutationState::Pending(MutationKind::Create);
        let result = self.submit_create(session, fields).await;
        self.settle(MutationKind::Create, result, MutationOutcome::Created)
    }

    /// Update a request the session owns; on success the list is refreshed
    /// if it shows the record, and the router sent to its detail page
    pub async fn update(
        &mut self,
        session: &Session,
        id: RequestId,
        changes: RequestChanges,
    ) -> Result<RequestRecord> {
        self.state = MutationState::Pending(MutationKind::Update);
        let result = self.submit_update(session, id, changes).await;
        self.settle(MutationKind::Update, result, MutationOutcome::Updated)
    }

    /// Delete a request the session owns.
    ///
    /// A record that is already gone yields [`SdkError::NotFound`] and the
    /// list is refreshed so it stops offering the record.
    pub async fn delete(&mut self, session: &Session, id: RequestId) -> Result<()> {
        self.state = MutationState::Pending(MutationKind::Delete);
        let result = self.submit_delete(session, id).await;
        self.settle(MutationKind::Delete, result, |_| MutationOutcome::Deleted(id))
    }

    async fn submit_create(&self, session: &Session, fields: RequestFields) -> Result<RequestRecord> {
        access::require_create(session)?;

        let response = self
            .transport
            .post("/requests", Some(json!({ "request": fields })), session.credential())
            .await?;
        let envelope: RequestEnvelope = response.json()?;
        let record = envelope.request;
        info!("Created request #{}", record.id);

        self.refresh(self.collection.invalidate().await);
        self.navigator.redirect(access::LIST_PATH);
        Ok(record)
    }

    async fn submit_update(
        &self,
        session: &Session,
        id: RequestId,
        changes: RequestChanges,
    ) -> Result<RequestRecord> {
        let current = self.current_record(session, id).await?;
        access::require_mutate(session, &current)?;

        let response = self
            .transport
            .patch(&request_path(id), json!({ "request": changes }), session.credential())
            .await?;
        let envelope: RequestEnvelope = response.json()?;
        let record = envelope.request;
        info!("Updated request #{}", record.id);

        if self.collection.contains(id).await {
            self.refresh(self.collection.invalidate().await);
        }
        self.navigator.redirect(&access::detail_path(id));
        Ok(record)
    }

    async fn submit_delete(&self, session: &Session, id: RequestId) -> Result<()> {
        let current = match self.current_record(session, id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                self.refresh(self.collection.invalidate_after_delete(id).await);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        access::require_mutate(session, &current)?;

        if let Err(e) = self
            .transport
            .delete(&request_path(id), session.credential())
            .await
        {
            let err = SdkError::from(e);
            if err.is_not_found() {
                self.refresh(self.collection.invalidate_after_delete(id).await);
            }
            return Err(err);
        }
        info!("Deleted request #{}", id);

        self.refresh(self.collection.invalidate_after_delete(id).await);
        self.navigator.redirect(access::LIST_PATH);
        Ok(())
    }

    /// Visible copy if the list shows it, otherwise a fresh one from the server
    async fn current_record(&self, session: &Session, id: RequestId) -> Result<RequestRecord> {
        match self.collection.find(id).await {
            Some(record) => Ok(record),
            None => self.load(session, id).await,
        }
    }

    /// A failed refresh leaves the mutation committed
    fn refresh<T>(&self, result: Result<T>) {
        if let Err(e) = result {
            warn!("Collection refresh after mutation failed: {}", e);
        }
    }

    fn settle<T: Clone>(
        &mut self,
        kind: MutationKind,
        result: Result<T>,
        committed: impl FnOnce(T) -> MutationOutcome,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = MutationState::Committed(committed(value.clone()));
                Ok(value)
            }
            Err(error) => {
                debug!("{:?} failed: {}", kind, error);
                self.state = MutationState::Failed {
                    kind,
                    error: error.clone(),
                };
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FilterPatch;
    use crate::error::AuthFailure;
    use crate::navigation::RecordingNavigator;
    use crate::session::{MemoryStorage, SessionStore};
    use crate::transport::InMemoryTransport;
    use crate::types::RequestStatus;

    struct Fixture {
        server: InMemoryTransport,
        navigator: Arc<RecordingNavigator>,
        collection: CollectionEngine,
        coordinator: MutationCoordinator,
    }

    fn fixture() -> Fixture {
        let server = InMemoryTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(server.clone());
        let navigator = Arc::new(RecordingNavigator::new());
        let collection = CollectionEngine::new(transport.clone(), 10);
        let coordinator =
            MutationCoordinator::new(transport, collection.clone(), navigator.clone());
        Fixture {
            server,
            navigator,
            collection,
            coordinator,
        }
    }

    async fn sign_in(server: &InMemoryTransport, email: &str) -> Session {
        server.register_user(email, "password123").await;
        let mut store = SessionStore::new(
            Arc::new(server.clone()),
            Arc::new(MemoryStorage::new()),
            "guest@example.com",
        );
        store.login(email, "password123").await.unwrap();
        store.session().clone()
    }

    #[tokio::test]
    async fn test_create_commits_and_redirects() {
        let mut f = fixture();
        let session = sign_in(&f.server, "owner@example.com").await;
        f.collection.fetch().await.unwrap();

        let record = f
            .coordinator
            .create(&session, RequestFields::new("Fix printer", "Third floor"))
            .await
            .unwrap();

        assert_eq!(record.status, RequestStatus::Pending);
        assert!(matches!(
            f.coordinator.state(),
            MutationState::Committed(MutationOutcome::Created(_))
        ));
        assert_eq!(f.navigator.last().as_deref(), Some("/requests"));
        assert!(f.collection.contains(record.id).await);
    }

    #[tokio::test]
    async fn test_anonymous_create_fails_without_io() {
        let mut f = fixture();
        let calls = f.server.call_count().await;

        let err = f
            .coordinator
            .create(&Session::anonymous(), RequestFields::new("Fix printer", "x"))
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Authorization(_)));
        assert_eq!(f.server.call_count().await, calls);
        assert_eq!(
            f.coordinator.state().message().as_deref(),
            Some("Failed to create request.")
        );
        assert!(f.navigator.history().is_empty());
    }

    #[tokio::test]
    async fn test_server_validation_message() {
        let mut f = fixture();
        let session = sign_in(&f.server, "owner@example.com").await;

        let err = f
            .coordinator
            .create(&session, RequestFields::new("", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::ServerValidation { .. }));
        assert_eq!(
            f.coordinator.state().message().as_deref(),
            Some("Title can't be blank, Description can't be blank")
        );
    }

    #[tokio::test]
    async fn test_update_requires_ownership() {
        let mut f = fixture();
        let owner = sign_in(&f.server, "owner@example.com").await;
        let other = sign_in(&f.server, "other@example.com").await;
        let record = f
            .coordinator
            .create(&owner, RequestFields::new("Fix printer", "x"))
            .await
            .unwrap();

        let changes = RequestChanges {
            status: Some(RequestStatus::Approved),
            ..Default::default()
        };
        let err = f
            .coordinator
            .update(&other, record.id, changes.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Authorization(_)));

        let updated = f.coordinator.update(&owner, record.id, changes).await.unwrap();
        assert_eq!(updated.status, RequestStatus::Approved);
        assert_eq!(
            f.navigator.last(),
            Some(format!("/requests/{}", record.id))
        );
    }

    #[tokio::test]
    async fn test_update_of_visible_record_refetches_list() {
        let mut f = fixture();
        let session = sign_in(&f.server, "owner@example.com").await;
        let record = f
            .coordinator
            .create(&session, RequestFields::new("Fix printer", "x"))
            .await
            .unwrap();
        assert!(f.collection.contains(record.id).await);
        let before = f.server.call_count().await;

        let changes = RequestChanges {
            status: Some(RequestStatus::Approved),
            ..Default::default()
        };
        f.coordinator.update(&session, record.id, changes).await.unwrap();

        let calls = f.server.calls().await.split_off(before);
        assert_eq!(
            calls,
            vec![format!("PATCH /requests/{}", record.id), "GET /requests".to_string()]
        );
        assert_eq!(
            f.collection.find(record.id).await.map(|r| r.status),
            Some(RequestStatus::Approved)
        );
    }

    #[tokio::test]
    async fn test_update_of_filtered_out_record_leaves_list_alone() {
        let mut f = fixture();
        let session = sign_in(&f.server, "owner@example.com").await;
        let record = f
            .coordinator
            .create(&session, RequestFields::new("Fix printer", "x"))
            .await
            .unwrap();
        f.collection
            .set_filters(FilterPatch::new().status(Some(RequestStatus::Approved)))
            .await
            .unwrap();
        assert!(!f.collection.contains(record.id).await);
        let before = f.server.call_count().await;

        let changes = RequestChanges {
            title: Some("Fix the printer".into()),
            ..Default::default()
        };
        let updated = f.coordinator.update(&session, record.id, changes).await.unwrap();
        assert_eq!(updated.title, "Fix the printer");

        let calls = f.server.calls().await.split_off(before);
        assert_eq!(
            calls,
            vec![
                format!("GET /requests/{}", record.id),
                format!("PATCH /requests/{}", record.id),
            ]
        );
        assert!(f.collection.snapshot().await.items.is_empty());
    }

    #[tokio::test]
    async fn test_revoked_token_is_authentication_failure() {
        let mut f = fixture();
        let session = sign_in(&f.server, "owner@example.com").await;
        f.server
            .delete("/users/sign_out", session.credential())
            .await
            .unwrap();

        let err = f
            .coordinator
            .create(&session, RequestFields::new("Fix printer", "x"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SdkError::Authentication {
                reason: AuthFailure::InvalidCredentials,
                ..
            }
        ));
        assert_eq!(
            f.coordinator.state().message().as_deref(),
            Some("Failed to create request.")
        );
        assert!(f.navigator.history().is_empty());
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let mut f = fixture();
        let session = sign_in(&f.server, "owner@example.com").await;
        let record = f
            .coordinator
            .create(&session, RequestFields::new("Fix printer", "x"))
            .await
            .unwrap();

        f.coordinator.delete(&session, record.id).await.unwrap();
        assert_eq!(
            f.coordinator.state(),
            &MutationState::Committed(MutationOutcome::Deleted(record.id))
        );
        assert!(!f.collection.contains(record.id).await);

        let err = f.coordinator.delete(&session, record.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_load_missing_record() {
        let f = fixture();
        let err = f.coordinator.load(&Session::anonymous(), 404).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
