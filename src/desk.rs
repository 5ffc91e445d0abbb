//! Request desk
//!
//! Wires the session store, access gate, collection engine and mutation
//! coordinator together the way a front end uses them: restore on start,
//! refresh the list on every session transition, annotate listed records
//! with the current session, and bind mutations to the signed-in caller.

use crate::access::{self, Navigation};
use crate::collection::{AnnotatedRequest, CollectionEngine, CollectionView, LoadState};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::mutation::{MutationCoordinator, MutationState};
use crate::navigation::Navigator;
use crate::session::{Identity, Session, SessionStorage, SessionStore};
use crate::transport::Transport;
use crate::types::{RequestChanges, RequestFields, RequestId, RequestRecord};
use std::sync::Arc;
use tracing::{debug, warn};

/// Front-end core for the request tracker
pub struct RequestDesk {
    config: ClientConfig,
    session: SessionStore,
    collection: CollectionEngine,
    mutations: MutationCoordinator,
    navigator: Arc<dyn Navigator>,
}

impl RequestDesk {
    /// Assemble a desk and restore any persisted session
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn SessionStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let mut session = SessionStore::new(transport.clone(), storage, config.guest_email.clone());
        session.restore();

        let collection = CollectionEngine::new(transport.clone(), config.effective_page_size());
        let mutations = MutationCoordinator::new(transport, collection.clone(), navigator.clone());

        Self {
            config,
            session,
            collection,
            mutations,
            navigator,
        }
    }

    /// Desk backed by the HTTP transport, persisting the session to
    /// `config.session_file` when set
    #[cfg(feature = "client")]
    pub fn connect(config: ClientConfig, navigator: Arc<dyn Navigator>) -> Result<Self> {
        use crate::session::{FileStorage, MemoryStorage};
        use crate::transport::HttpTransport;

        let transport = HttpTransport::new(&config)?;
        let storage: Arc<dyn SessionStorage> = match config.session_file {
            Some(ref path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        };
        Ok(Self::new(config, Arc::new(transport), storage, navigator))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        self.session.session()
    }

    pub fn identity(&self) -> &Identity {
        self.session.identity()
    }

    /// Filters, pagination and fetches go through the engine directly
    pub fn collection(&self) -> &CollectionEngine {
        &self.collection
    }

    pub fn mutation_state(&self) -> &MutationState {
        self.mutations.state()
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<Identity> {
        let identity = self.session.login(email, password).await?;
        self.session_changed().await;
        Ok(identity)
    }

    pub async fn guest_login(&mut self) -> Result<Identity> {
        let identity = self.session.guest_login().await?;
        self.session_changed().await;
        Ok(identity)
    }

    pub async fn signup(&mut self, email: &str, password: &str, confirmation: &str) -> Result<Identity> {
        let identity = self.session.signup(email, password, confirmation).await?;
        self.session_changed().await;
        Ok(identity)
    }

    /// Sign out and return to the landing page
    pub async fn logout(&mut self) {
        self.session.logout().await;
        self.session_changed().await;
        self.navigator.redirect(access::LANDING_PATH);
    }

    /// Check a navigation against the current session, redirecting if needed
    pub fn navigate(&self, path: &str) -> Navigation {
        let decision = access::guard_route(self.session(), path);
        if let Navigation::Redirect(ref target) = decision {
            debug!("Navigation to {} redirected to {}", path, target);
            self.navigator.redirect(target);
        }
        decision
    }

    /// Current view of the list
    pub async fn view(&self) -> CollectionView {
        self.collection.snapshot().await
    }

    /// Listed records with affordances for the current session
    pub async fn requests(&self) -> Vec<AnnotatedRequest> {
        self.collection.annotated(self.session()).await
    }

    /// Detail view fetch
    pub async fn show(&self, id: RequestId) -> Result<RequestRecord> {
        self.mutations.load(self.session(), id).await
    }

    /// Open the edit page for `id`.
    ///
    /// Returns `None` after redirecting when the caller may not edit it:
    /// anonymous callers go to the landing page, others to the detail page.
    pub async fn open_editor(&self, id: RequestId) -> Result<Option<RequestRecord>> {
        if let Navigation::Redirect(_) = self.navigate(&access::edit_path(id)) {
            return Ok(None);
        }
        let record = self.show(id).await?;
        match access::guard_edit(self.session(), &record) {
            Navigation::Proceed => Ok(Some(record)),
            Navigation::Redirect(target) => {
                self.navigator.redirect(&target);
                Ok(None)
            }
        }
    }

    pub async fn create(&mut self, fields: RequestFields) -> Result<RequestRecord> {
        self.mutations.create(self.session.session(), fields).await
    }

    pub async fn update(&mut self, id: RequestId, changes: RequestChanges) -> Result<RequestRecord> {
        self.mutations
            .update(self.session.session(), id, changes)
            .await
    }

    pub async fn delete(&mut self, id: RequestId) -> Result<()> {
        self.mutations.delete(self.session.session(), id).await
    }

    /// In-flight fetches were issued for the previous session; drop them and
    /// reload what is on screen
    async fn session_changed(&mut self) {
        self.collection.discard_in_flight().await;
        self.mutations.reset();

        if self.collection.snapshot().await.load_state != LoadState::NotLoaded {
            if let Err(e) = self.collection.fetch().await {
                warn!("List refresh after session change failed: {}", e);
            }
        }
    }
}
