//! Request Desk - request-tracking front-end core
//!
//! Client-side core for a request tracker: who is signed in, what they may
//! do, which page of requests is on screen, and how creates, updates and
//! deletes reach the server.
//!
//! # Architecture
//!
//! - **Session store**: Anonymous / Guest / Authenticated state machine,
//!   persisted between runs
//! - **Access gate**: pure ownership and route decisions over a [`Session`]
//! - **Collection engine**: filtered, paginated list with stale-response
//!   protection
//! - **Mutation coordinator**: access-checked create/update/delete that
//!   invalidates the list and drives navigation
//!
//! The server is reached only through the [`Transport`] trait; the router
//! only through [`Navigator`].
//!
//! # Example
//!
//! ```rust,no_run
//! use request_desk::{
//!     ClientConfig, FilterPatch, InMemoryTransport, MemoryStorage, RecordingNavigator,
//!     RequestDesk, RequestFields, RequestStatus,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> request_desk::Result<()> {
//! let mut desk = RequestDesk::new(
//!     ClientConfig::default(),
//!     Arc::new(InMemoryTransport::new()),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(RecordingNavigator::new()),
//! );
//!
//! desk.signup("owner@example.com", "password123", "password123").await?;
//! desk.create(RequestFields::new("Fix printer", "Third floor")).await?;
//!
//! desk.collection()
//!     .set_filters(FilterPatch::new().status(Some(RequestStatus::Pending)))
//!     .await?;
//! for item in desk.requests().await {
//!     println!("{} editable={}", item.record.title, item.can_mutate);
//! }
//! # Ok(())
//! # }
//! ```

// Error types
pub mod error;

// Wire types
pub mod types;

// Client configuration
pub mod config;

// Server access
pub mod transport;

// Session state and persistence
pub mod session;

// Ownership and route decisions
pub mod access;

// Router collaborator
pub mod navigation;

// Filtered, paginated request list
pub mod collection;

// Create, update, delete
pub mod mutation;

// Facade
pub mod desk;

// Re-export error types
pub use error::{AuthFailure, MutationKind, Result, SdkError, ValidationReason};

// Re-export wire types
pub use types::{
    AuthorSummary, RequestChanges, RequestFields, RequestId, RequestPage, RequestPriority,
    RequestRecord, RequestStatus, User, UserId,
};

// Re-export configuration
pub use config::ClientConfig;
#[cfg(feature = "cli")]
pub use config::ClientArgs;

// Re-export transport types
#[cfg(feature = "client")]
pub use transport::HttpTransport;
pub use transport::{
    ApiError, ApiRequest, ApiResponse, CredentialDelivery, InMemoryTransport, Method, Transport,
};

// Re-export session types
pub use session::{
    Credential, FileStorage, Identity, MemoryStorage, Session, SessionStorage, SessionStore,
    StorageError,
};

// Re-export access types
pub use access::{Navigation, RouteClass};
pub use navigation::{Navigator, RecordingNavigator};

// Re-export collection types
pub use collection::{
    AnnotatedRequest, CollectionEngine, CollectionFilters, CollectionView, FetchOutcome,
    FilterPatch, LoadState,
};

// Re-export mutation types
pub use mutation::{MutationCoordinator, MutationOutcome, MutationState};

pub use desk::RequestDesk;
