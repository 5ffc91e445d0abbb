//! Session store
//!
//! Owns the current [`Session`], restores it from persistent storage at
//! startup and drives the Anonymous / Guest / Authenticated transitions.
//! Calls are not deduplicated: two concurrent logins on different store
//! handles both persist, and the last write wins.

use super::storage::{SessionStorage, TOKEN_KEY, USER_KEY};
use super::{Credential, Identity, Session};
use crate::error::{AuthFailure, Result, SdkError, ValidationReason};
use crate::transport::{ApiError, ApiResponse, Transport};
use crate::types::User;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Authentication state machine with persistence
pub struct SessionStore {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn SessionStorage>,
    guest_email: String,
    session: Session,
}

impl SessionStore {
    /// Create an anonymous store. Call [`SessionStore::restore`] to pick up
    /// a persisted session.
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn SessionStorage>,
        guest_email: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            storage,
            guest_email: guest_email.into(),
            session: Session::anonymous(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn identity(&self) -> &Identity {
        self.session.identity()
    }

    /// Restore the persisted session.
    ///
    /// Never fails: unreadable storage, a missing half of the pair or a
    /// malformed user payload all degrade to Anonymous.
    pub fn restore(&mut self) -> &Identity {
        self.session = match self.read_persisted() {
            Ok(Some(session)) => {
                debug!("Restored session for {}", session.identity());
                session
            }
            Ok(None) => Session::anonymous(),
            Err(detail) => {
                warn!("Discarding persisted session: {}", detail);
                Session::anonymous()
            }
        };
        self.session.identity()
    }

    /// Sign in with email and password
    pub async fn login(&mut self, email: &str, password: &str) -> Result<Identity> {
        let body = json!({"user": {"email": email, "password": password}});
        let response = self
            .transport
            .post("/users/sign_in", Some(body), None)
            .await
            .map_err(login_error)?;

        let (user, credential) = signed_in_user(&response)?;
        let credential = credential.ok_or_else(|| SdkError::Authentication {
            reason: AuthFailure::MissingCredential,
            detail: "sign-in response carried no credential".to_string(),
        })?;

        self.establish(user, credential);
        info!("Signed in as {}", self.session.identity());
        Ok(self.session.identity().clone())
    }

    /// Sign in with the shared guest account
    pub async fn guest_login(&mut self) -> Result<Identity> {
        let response = self
            .transport
            .post("/auth/guest", None, None)
            .await
            .map_err(|e| guest_unavailable(e.detail()))?;

        let (user, credential) = signed_in_user(&response)
            .map_err(|e| guest_unavailable(e.to_string()))?;
        let credential =
            credential.ok_or_else(|| guest_unavailable("guest response carried no credential"))?;
        if !user.email.eq_ignore_ascii_case(&self.guest_email) {
            return Err(guest_unavailable(format!(
                "server issued non-guest account {}",
                user.email
            )));
        }

        self.establish(user, credential);
        info!("Signed in as {}", self.session.identity());
        Ok(self.session.identity().clone())
    }

    /// Register an account, then sign in with it.
    ///
    /// A mismatched confirmation fails before any network call. When
    /// registration succeeds but the follow-up login fails, the login
    /// error is returned.
    pub async fn signup(
        &mut self,
        email: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<Identity> {
        if password != confirmation {
            return Err(SdkError::Validation(ValidationReason::PasswordMismatch));
        }

        let body = json!({
            "user": {
                "email": email,
                "password": password,
                "password_confirmation": confirmation,
            }
        });
        self.transport.post("/users", Some(body), None).await?;
        debug!("Registered {}", email);

        self.login(email, password).await
    }

    /// Sign out. The server call is best-effort; local state is always cleared.
    pub async fn logout(&mut self) {
        if let Some(credential) = self.session.credential().cloned() {
            if let Err(e) = self
                .transport
                .delete("/users/sign_out", Some(&credential))
                .await
            {
                warn!("Ignoring sign-out failure: {}", e);
            }
        }

        self.session = Session::anonymous();
        self.clear_persisted();
        info!("Signed out");
    }

    fn establish(&mut self, user: User, credential: Credential) {
        self.persist(&user, &credential);
        self.session = Session::signed_in(user, credential, &self.guest_email);
    }

    fn persist(&self, user: &User, credential: &Credential) {
        let result = serde_json::to_string(user)
            .map_err(|e| e.to_string())
            .and_then(|user_json| {
                self.storage
                    .write(TOKEN_KEY, credential.expose())
                    .and_then(|_| self.storage.write(USER_KEY, &user_json))
                    .map_err(|e| e.to_string())
            });

        if let Err(e) = result {
            warn!("Session will not survive a restart: {}", e);
            self.clear_persisted();
        }
    }

    fn clear_persisted(&self) {
        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!("Failed to erase persisted {}: {}", key, e);
            }
        }
    }

    fn read_persisted(&self) -> std::result::Result<Option<Session>, String> {
        let token = self.storage.read(TOKEN_KEY).map_err(|e| e.to_string())?;
        let user = self.storage.read(USER_KEY).map_err(|e| e.to_string())?;

        match (token, user) {
            (None, None) => Ok(None),
            (Some(token), Some(user_json)) => {
                if token.trim().is_empty() {
                    return Err("empty credential".to_string());
                }
                let user: User = serde_json::from_str(&user_json)
                    .map_err(|e| format!("malformed user: {}", e))?;
                Ok(Some(Session::signed_in(
                    user,
                    Credential::new(token),
                    &self.guest_email,
                )))
            }
            (Some(_), None) => Err("credential without user".to_string()),
            (None, Some(_)) => Err("user without credential".to_string()),
        }
    }
}

/// Credential from the `Authorization` header, falling back to `user.auth_token`
pub(crate) fn extract_credential(response: &ApiResponse) -> Option<Credential> {
    let from_header = response.header("authorization").and_then(|value| {
        let value = value.trim();
        let token = match value.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => &value[7..],
            _ => value,
        };
        let token = token.trim();
        (!token.is_empty()).then(|| Credential::new(token))
    });

    from_header.or_else(|| {
        response
            .body
            .get("user")
            .and_then(|user| user.get("auth_token"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(Credential::new)
    })
}

fn signed_in_user(response: &ApiResponse) -> Result<(User, Option<Credential>)> {
    let user_value = response
        .body
        .get("user")
        .cloned()
        .ok_or_else(|| SdkError::Transport("sign-in response carried no user".to_string()))?;
    let user: User = serde_json::from_value(user_value)?;
    Ok((user, extract_credential(response)))
}

fn login_error(err: ApiError) -> SdkError {
    match err.status_code() {
        Some(401) => SdkError::Authentication {
            reason: AuthFailure::InvalidCredentials,
            detail: err.detail(),
        },
        Some(422) => SdkError::Authentication {
            reason: AuthFailure::ValidationFailed,
            detail: err.detail(),
        },
        _ => err.into(),
    }
}

fn guest_unavailable(detail: impl Into<String>) -> SdkError {
    SdkError::Authentication {
        reason: AuthFailure::GuestUnavailable,
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryStorage;
    use crate::transport::{CredentialDelivery, InMemoryTransport};

    const GUEST: &str = "guest@example.com";

    fn store_with(server: &InMemoryTransport, storage: Arc<MemoryStorage>) -> SessionStore {
        SessionStore::new(Arc::new(server.clone()), storage, GUEST)
    }

    #[test]
    fn test_extract_credential_prefers_header() {
        let response = ApiResponse::new(
            200,
            json!({"user": {"id": 1, "email": "a@b.c", "auth_token": "body-token"}}),
        )
        .with_header("Authorization", "Bearer header-token");
        assert_eq!(extract_credential(&response).unwrap().expose(), "header-token");
    }

    #[test]
    fn test_extract_credential_falls_back_to_body() {
        let response = ApiResponse::new(
            200,
            json!({"user": {"id": 1, "email": "a@b.c", "auth_token": "body-token"}}),
        );
        assert_eq!(extract_credential(&response).unwrap().expose(), "body-token");

        let bare = ApiResponse::new(200, json!({"user": {"id": 1, "email": "a@b.c"}}));
        assert!(extract_credential(&bare).is_none());
    }

    #[tokio::test]
    async fn test_login_accepts_either_credential_source() {
        let server = InMemoryTransport::new();
        server.register_user("owner@example.com", "password1").await;

        for delivery in [CredentialDelivery::Header, CredentialDelivery::Body] {
            server.set_login_delivery(delivery).await;
            let mut store = store_with(&server, Arc::new(MemoryStorage::new()));
            let identity = store.login("owner@example.com", "password1").await.unwrap();

            assert!(matches!(identity, Identity::Authenticated(_)));
            let token = store.session().credential().unwrap().expose().to_string();
            assert!(server.token_is_active(&token).await);
        }
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let server = InMemoryTransport::new();
        server.register_user("owner@example.com", "password1").await;
        let mut store = store_with(&server, Arc::new(MemoryStorage::new()));

        let err = store.login("owner@example.com", "wrong").await.unwrap_err();
        assert!(matches!(
            err,
            SdkError::Authentication { reason: AuthFailure::InvalidCredentials, .. }
        ));
        assert!(store.identity().is_anonymous());
    }

    #[tokio::test]
    async fn test_guest_login_with_either_credential_source() {
        let server = InMemoryTransport::new();

        for delivery in [CredentialDelivery::Body, CredentialDelivery::Header] {
            server.set_guest_delivery(delivery).await;
            let storage = Arc::new(MemoryStorage::new());
            let mut store = store_with(&server, storage.clone());

            let identity = store.guest_login().await.unwrap();
            assert!(identity.is_guest());
            assert!(storage.read(TOKEN_KEY).unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_guest_login_unavailable() {
        let server = InMemoryTransport::new();
        server.set_guest_enabled(false).await;
        let mut store = store_with(&server, Arc::new(MemoryStorage::new()));

        let err = store.guest_login().await.unwrap_err();
        assert!(matches!(
            err,
            SdkError::Authentication { reason: AuthFailure::GuestUnavailable, .. }
        ));
    }

    #[tokio::test]
    async fn test_signup_mismatch_never_touches_network() {
        let server = InMemoryTransport::new();
        let mut store = store_with(&server, Arc::new(MemoryStorage::new()));

        let err = store
            .signup("new@example.com", "password1", "password2")
            .await
            .unwrap_err();
        assert_eq!(err, SdkError::Validation(ValidationReason::PasswordMismatch));
        assert_eq!(server.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_signup_logs_in() {
        let server = InMemoryTransport::new();
        let mut store = store_with(&server, Arc::new(MemoryStorage::new()));

        let identity = store
            .signup("new@example.com", "password1", "password1")
            .await
            .unwrap();
        assert_eq!(identity.user().unwrap().email, "new@example.com");
        assert_eq!(
            server.calls().await,
            vec!["POST /users".to_string(), "POST /users/sign_in".to_string()]
        );
    }

    #[tokio::test]
    async fn test_signup_surfaces_server_validation() {
        let server = InMemoryTransport::new();
        server.register_user("taken@example.com", "password1").await;
        let mut store = store_with(&server, Arc::new(MemoryStorage::new()));

        let err = store
            .signup("taken@example.com", "password1", "password1")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SdkError::ServerValidation {
                field_errors: vec!["Email has already been taken".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_logout_clears_state_even_when_offline() {
        let server = InMemoryTransport::new();
        server.register_user("owner@example.com", "password1").await;
        let storage = Arc::new(MemoryStorage::new());
        let mut store = store_with(&server, storage.clone());
        store.login("owner@example.com", "password1").await.unwrap();

        server.set_offline(true).await;
        store.logout().await;

        assert!(store.identity().is_anonymous());
        assert!(store.session().credential().is_none());
        assert_eq!(storage.read(TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.read(USER_KEY).unwrap(), None);
    }

    #[test]
    fn test_restore_degrades_to_anonymous() {
        let server = InMemoryTransport::new();

        let malformed = Arc::new(MemoryStorage::with_entries([
            (TOKEN_KEY, "token-1"),
            (USER_KEY, "{not json"),
        ]));
        let mut store = store_with(&server, malformed);
        assert!(store.restore().is_anonymous());

        let half = Arc::new(MemoryStorage::with_entries([(TOKEN_KEY, "token-1")]));
        let mut store = store_with(&server, half);
        assert!(store.restore().is_anonymous());
        assert!(store.session().credential().is_none());
    }

    #[test]
    fn test_restore_recognises_guest() {
        let server = InMemoryTransport::new();
        let storage = Arc::new(MemoryStorage::with_entries([
            (TOKEN_KEY, "token-9"),
            (USER_KEY, r#"{"id":1,"email":"guest@example.com"}"#),
        ]));
        let mut store = store_with(&server, storage);
        assert!(store.restore().is_guest());
    }
}
