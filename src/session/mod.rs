//! Session state
//!
//! A [`Session`] records who, if anyone, is signed in and with which
//! credential. It is owned by the [`SessionStore`] and lent by reference to
//! the access gate and the mutation coordinator.

mod storage;
mod store;

pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError, TOKEN_KEY, USER_KEY};
pub use store::SessionStore;

use crate::types::User;
use std::fmt;

/// Opaque bearer credential issued by the server
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for the transport and for persistence only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(***)")
    }
}

/// Who the session belongs to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    /// The shared, read-only guest account
    Guest(User),
    /// A regular account
    Authenticated(User),
}

impl Identity {
    /// Classify a server-confirmed user. The guest account is recognised by
    /// its reserved email.
    pub fn classify(user: User, guest_email: &str) -> Self {
        if user.email.eq_ignore_ascii_case(guest_email) {
            Identity::Guest(user)
        } else {
            Identity::Authenticated(user)
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::Guest(user) | Identity::Authenticated(user) => Some(user),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => write!(f, "anonymous"),
            Identity::Guest(user) => write!(f, "guest ({})", user.email),
            Identity::Authenticated(user) => write!(f, "{} (#{})", user.email, user.id),
        }
    }
}

/// Identity plus credential.
///
/// A credential is present exactly when the identity is not anonymous; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    identity: Identity,
    credential: Option<Credential>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Session for a server-confirmed user
    pub fn signed_in(user: User, credential: Credential, guest_email: &str) -> Self {
        Self {
            identity: Identity::classify(user, guest_email),
            credential: Some(credential),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn user(&self) -> Option<&User> {
        self.identity.user()
    }
}
