//! Collection query engine
//!
//! Owns the filtered, paginated view over the request list. Every fetch takes
//! a ticket from a monotonically increasing generation counter when it is
//! issued; a response is applied only if its ticket is still the latest when
//! it resolves, so an older fetch can never overwrite a newer one.
//!
//! The engine never captures session state. Ownership affordances are
//! computed from the caller's current [`Session`] at read time through
//! [`CollectionEngine::annotated`].

use crate::access;
use crate::error::{Result, SdkError, ValidationReason};
use crate::session::Session;
use crate::transport::{ApiError, Transport};
use crate::types::{RequestId, RequestPage, RequestPriority, RequestRecord, RequestStatus};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REQUESTS_ENDPOINT: &str = "/requests";

/// Active list filters. `None` means "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionFilters {
    pub status: Option<RequestStatus>,
    /// Substring of the title; matching rules belong to the server
    pub title: Option<String>,
    pub priority: Option<RequestPriority>,
}

impl CollectionFilters {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.title.is_none() && self.priority.is_none()
    }

    fn merge(&mut self, patch: FilterPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
    }

    /// List query parameters; unset filters are omitted
    pub fn to_query(&self, page: u32, per_page: u32) -> Vec<(String, String)> {
        let mut query = vec![
            ("page".to_string(), page.to_string()),
            ("per_page".to_string(), per_page.to_string()),
        ];
        if let Some(status) = self.status {
            query.push(("status".to_string(), status.as_str().to_string()));
        }
        if let Some(ref title) = self.title {
            query.push(("title".to_string(), title.clone()));
        }
        if let Some(priority) = self.priority {
            query.push(("priority".to_string(), priority.as_str().to_string()));
        }
        query
    }
}

/// Partial filter update.
///
/// Fields left untouched keep their current value; a field set to `None`
/// clears that filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPatch {
    status: Option<Option<RequestStatus>>,
    title: Option<Option<String>>,
    priority: Option<Option<RequestPriority>>,
}

impl FilterPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: Option<RequestStatus>) -> Self {
        self.status = Some(status);
        self
    }

    /// An empty or blank title clears the title filter
    pub fn title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.title = Some(if title.trim().is_empty() {
            None
        } else {
            Some(title)
        });
        self
    }

    pub fn clear_title(mut self) -> Self {
        self.title = Some(None);
        self
    }

    pub fn priority(mut self, priority: Option<RequestPriority>) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// What the consumer should render around the current items
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing fetched yet
    #[default]
    NotLoaded,
    /// Items reflect the last fetch
    Loaded,
    /// The last fetch failed; items are from an earlier one
    Stale { detail: String },
    /// The last fetch failed and there is nothing to show
    Unavailable { detail: String },
}

/// Snapshot of the engine's state
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionView {
    pub filters: CollectionFilters,
    /// 1-indexed
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<RequestRecord>,
    pub total_count: u64,
    pub load_state: LoadState,
    /// A fetch has been issued and not yet resolved
    pub loading: bool,
}

impl CollectionView {
    fn new(page_size: u32) -> Self {
        Self {
            filters: CollectionFilters::default(),
            page: 1,
            page_size,
            items: Vec::new(),
            total_count: 0,
            load_state: LoadState::NotLoaded,
            loading: false,
        }
    }

    /// "Next" is offered only for a full page with more records behind it
    pub fn has_next(&self) -> bool {
        self.items.len() as u64 >= self.page_size as u64
            && (self.page as u64) * (self.page_size as u64) < self.total_count
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.items.iter().any(|r| r.id == id)
    }

    pub fn find(&self, id: RequestId) -> Option<&RequestRecord> {
        self.items.iter().find(|r| r.id == id)
    }

    /// Pair each visible record with the session's mutation rights
    pub fn annotate(&self, session: &Session) -> Vec<AnnotatedRequest> {
        self.items
            .iter()
            .map(|record| AnnotatedRequest {
                can_mutate: access::can_mutate(session, record),
                record: record.clone(),
            })
            .collect()
    }
}

/// A visible record with its edit/delete affordance
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRequest {
    pub record: RequestRecord,
    pub can_mutate: bool,
}

/// How a fetch request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Response applied to the view
    Applied,
    /// A newer fetch was issued first; response dropped
    Discarded,
    /// No fetch issued
    Skipped,
}

struct CollectionState {
    view: CollectionView,
    generation: u64,
}

impl CollectionState {
    /// Take a new ticket and capture the query for it
    fn issue(&mut self) -> (u64, Vec<(String, String)>) {
        self.generation += 1;
        self.view.loading = true;
        let query = self.view.filters.to_query(self.view.page, self.view.page_size);
        (self.generation, query)
    }
}

/// Filtered, paginated request list.
///
/// Cloning shares the same underlying view.
#[derive(Clone)]
pub struct CollectionEngine {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<CollectionState>>,
}

impl CollectionEngine {
    /// Create an engine with a fixed page size (at least 1)
    pub fn new(transport: Arc<dyn Transport>, page_size: u32) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(CollectionState {
                view: CollectionView::new(page_size.max(1)),
                generation: 0,
            })),
        }
    }

    /// Current view
    pub async fn snapshot(&self) -> CollectionView {
        self.state.lock().await.view.clone()
    }

    /// Current items annotated for `session`
    pub async fn annotated(&self, session: &Session) -> Vec<AnnotatedRequest> {
        self.state.lock().await.view.annotate(session)
    }

    pub async fn find(&self, id: RequestId) -> Option<RequestRecord> {
        self.state.lock().await.view.find(id).cloned()
    }

    pub async fn contains(&self, id: RequestId) -> bool {
        self.state.lock().await.view.contains(id)
    }

    /// Merge `patch` into the filters, go back to page 1 and re-fetch
    pub async fn set_filters(&self, patch: FilterPatch) -> Result<FetchOutcome> {
        let ticket = {
            let mut state = self.state.lock().await;
            state.view.filters.merge(patch);
            state.view.page = 1;
            state.issue()
        };
        self.run(ticket).await
    }

    /// Drop every filter, go back to page 1 and re-fetch
    pub async fn clear_filters(&self) -> Result<FetchOutcome> {
        let ticket = {
            let mut state = self.state.lock().await;
            state.view.filters = CollectionFilters::default();
            state.view.page = 1;
            state.issue()
        };
        self.run(ticket).await
    }

    /// Move to page `page` and fetch it.
    ///
    /// Page 1 is always fetched. A later page that cannot hold any record
    /// given the last known total is skipped without I/O.
    pub async fn set_page(&self, page: u32) -> Result<FetchOutcome> {
        if page == 0 {
            return Err(SdkError::Validation(ValidationReason::InvalidPage(page)));
        }
        let ticket = {
            let mut state = self.state.lock().await;
            let offset = (page as u64 - 1) * state.view.page_size as u64;
            if page > 1 && offset >= state.view.total_count {
                debug!(
                    "Skipping page {} (total {}, page size {})",
                    page, state.view.total_count, state.view.page_size
                );
                return Ok(FetchOutcome::Skipped);
            }
            state.view.page = page;
            state.issue()
        };
        self.run(ticket).await
    }

    pub async fn next_page(&self) -> Result<FetchOutcome> {
        let target = {
            let state = self.state.lock().await;
            if !state.view.has_next() {
                return Ok(FetchOutcome::Skipped);
            }
            state.view.page + 1
        };
        self.set_page(target).await
    }

    pub async fn previous_page(&self) -> Result<FetchOutcome> {
        let target = {
            let state = self.state.lock().await;
            if !state.view.has_previous() {
                return Ok(FetchOutcome::Skipped);
            }
            state.view.page - 1
        };
        self.set_page(target).await
    }

    /// Fetch the current filters and page.
    ///
    /// On failure the previous items and total stay in place and the view is
    /// marked stale (or unavailable if nothing was ever loaded).
    pub async fn fetch(&self) -> Result<FetchOutcome> {
        let ticket = self.state.lock().await.issue();
        self.run(ticket).await
    }

    /// Re-fetch after a mutation affecting the visible set
    pub async fn invalidate(&self) -> Result<FetchOutcome> {
        debug!("Collection invalidated");
        self.fetch().await
    }

    /// Re-fetch after `deleted` was removed, stepping back a page if it was
    /// the only item on a page past the first
    pub async fn invalidate_after_delete(&self, deleted: RequestId) -> Result<FetchOutcome> {
        let ticket = {
            let mut state = self.state.lock().await;
            let view = &mut state.view;
            let emptied = view.contains(deleted) && view.items.iter().all(|r| r.id == deleted);
            if view.page > 1 && emptied {
                view.page -= 1;
                info!("Page emptied by delete of #{}, moving to page {}", deleted, view.page);
            }
            state.issue()
        };
        self.run(ticket).await
    }

    /// Make every fetch issued so far inapplicable
    pub async fn discard_in_flight(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.view.loading = false;
    }

    async fn run(&self, (ticket, query): (u64, Vec<(String, String)>)) -> Result<FetchOutcome> {
        let result = self.transport.get(REQUESTS_ENDPOINT, query, None).await;

        let mut state = self.state.lock().await;
        if state.generation != ticket {
            debug!(
                "Discarding stale list response (ticket {}, current {})",
                ticket, state.generation
            );
            return Ok(FetchOutcome::Discarded);
        }
        state.view.loading = false;

        match result.and_then(|response| response.json::<RequestPage>()) {
            Ok(mut page) => {
                let page_size = state.view.page_size as usize;
                if page.requests.len() > page_size {
                    warn!(
                        "Server returned {} items for page size {}",
                        page.requests.len(),
                        page_size
                    );
                    page.requests.truncate(page_size);
                }
                let view = &mut state.view;
                view.items = page.requests;
                view.total_count = page.total_count;
                view.load_state = LoadState::Loaded;
                debug!(
                    "Loaded page {} ({} of {} requests)",
                    view.page,
                    view.items.len(),
                    view.total_count
                );
                Ok(FetchOutcome::Applied)
            }
            Err(err) => {
                let detail = fetch_detail(&err);
                warn!("Request list fetch failed: {}", detail);
                state.view.load_state = match state.view.load_state {
                    LoadState::NotLoaded | LoadState::Unavailable { .. } => {
                        LoadState::Unavailable { detail: detail.clone() }
                    }
                    LoadState::Loaded | LoadState::Stale { .. } => {
                        LoadState::Stale { detail: detail.clone() }
                    }
                };
                Err(SdkError::Fetch(detail))
            }
        }
    }
}

fn fetch_detail(err: &ApiError) -> String {
    match err {
        ApiError::Status { .. } => err.detail(),
        other => other.to_string(),
    }
}
