//! Access gate
//!
//! Pure decisions over the current [`Session`] and a request's owner: which
//! mutation affordances to show and which routes a caller may reach. No I/O
//! and no side effects; redirects are returned as [`Navigation`] values for
//! the caller to carry out.

use crate::error::{Result, SdkError};
use crate::session::{Identity, Session};
use crate::types::{RequestId, RequestRecord};
use std::fmt;

/// Landing page
pub const LANDING_PATH: &str = "/";
/// Account registration
pub const SIGNUP_PATH: &str = "/signup";
/// Request listing
pub const LIST_PATH: &str = "/requests";
/// Request creation form
pub const NEW_REQUEST_PATH: &str = "/requests/new";

/// Read-only detail page of a request
pub fn detail_path(id: RequestId) -> String {
    format!("{}/{}", LIST_PATH, id)
}

/// Edit page of a request
pub fn edit_path(id: RequestId) -> String {
    format!("{}/{}/edit", LIST_PATH, id)
}

/// Whether a route needs a signed-in caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RouteClass {
    /// Landing, signup, listing and detail pages
    Public,
    /// Creation and editing
    Protected,
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteClass::Public => write!(f, "PUBLIC"),
            RouteClass::Protected => write!(f, "PROTECTED"),
        }
    }
}

/// Outcome of a navigation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(String),
}

/// Known routes, parsed from a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Landing,
    Signup,
    List,
    New,
    Detail,
    Edit,
}

fn parse_route(path: &str) -> Option<Route> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        [] => Some(Route::Landing),
        ["signup"] => Some(Route::Signup),
        ["requests"] => Some(Route::List),
        ["requests", "new"] => Some(Route::New),
        ["requests", _id] => Some(Route::Detail),
        ["requests", _id, "edit"] => Some(Route::Edit),
        _ => None,
    }
}

/// Classify a path. Unknown paths are public; the router renders its own
/// not-found page for them.
pub fn classify_route(path: &str) -> RouteClass {
    match parse_route(path) {
        Some(Route::New) | Some(Route::Edit) => RouteClass::Protected,
        _ => RouteClass::Public,
    }
}

/// Whether navigating to `path` requires a signed-in caller
pub fn route_requires_auth(path: &str) -> bool {
    classify_route(path) == RouteClass::Protected
}

/// Signed in, as guest or as a regular account
pub fn is_authenticated(session: &Session) -> bool {
    !session.identity().is_anonymous()
}

pub fn is_guest(session: &Session) -> bool {
    session.identity().is_guest()
}

/// Regular accounts may create requests; guests and anonymous callers may not
pub fn can_create(session: &Session) -> bool {
    is_authenticated(session) && !is_guest(session)
}

/// Only the owning regular account may edit or delete a record.
///
/// Guests never qualify, even when the record's owner id happens to match
/// the shared guest account.
pub fn can_mutate(session: &Session, record: &RequestRecord) -> bool {
    match session.identity() {
        Identity::Authenticated(user) => record.owner_id == Some(user.id),
        Identity::Anonymous | Identity::Guest(_) => false,
    }
}

/// [`can_create`] as a guard
pub fn require_create(session: &Session) -> Result<()> {
    if can_create(session) {
        Ok(())
    } else {
        Err(SdkError::Authorization(format!(
            "{} may not create requests",
            session.identity()
        )))
    }
}

/// [`can_mutate`] as a guard
pub fn require_mutate(session: &Session, record: &RequestRecord) -> Result<()> {
    if can_mutate(session, record) {
        Ok(())
    } else {
        Err(SdkError::Authorization(format!(
            "{} may not modify request #{}",
            session.identity(),
            record.id
        )))
    }
}

/// Decide whether the caller may navigate to `path`.
///
/// Anonymous callers are sent to the landing page from protected routes.
/// Guests are sent from the creation form back to the listing, since they
/// can never submit it.
pub fn guard_route(session: &Session, path: &str) -> Navigation {
    if !route_requires_auth(path) {
        return Navigation::Proceed;
    }
    if !is_authenticated(session) {
        return Navigation::Redirect(LANDING_PATH.to_string());
    }
    if parse_route(path) == Some(Route::New) && !can_create(session) {
        return Navigation::Redirect(LIST_PATH.to_string());
    }
    Navigation::Proceed
}

/// Decide whether the caller may open the edit page of `record`; non-owners
/// are sent to the read-only detail page.
pub fn guard_edit(session: &Session, record: &RequestRecord) -> Navigation {
    if can_mutate(session, record) {
        Navigation::Proceed
    } else {
        Navigation::Redirect(detail_path(record.id))
    }
}
