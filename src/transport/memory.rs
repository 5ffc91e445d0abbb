//! In-process request API
//!
//! Implements the server side of the request API contract against in-memory
//! state: accounts, the shared guest account, bearer tokens, request CRUD with
//! ownership checks, validation, filtering and pagination. Every call is
//! logged so callers can assert which requests were (or were not) issued.

use super::{ApiError, ApiRequest, ApiResponse, Method, Transport};
use crate::config::DEFAULT_GUEST_EMAIL;
use crate::types::{
    AuthorSummary, RequestChanges, RequestFields, RequestId, RequestPriority, RequestRecord,
    RequestStatus, User, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default page size when the caller sends no `per_page`
const DEFAULT_PER_PAGE: usize = 25;

/// Where a sign-in response carries the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialDelivery {
    /// `Authorization: Bearer <token>` response header
    Header,
    /// `user.auth_token` body field
    Body,
}

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
}

#[derive(Debug)]
struct ServerState {
    accounts: Vec<Account>,
    tokens: HashMap<String, UserId>,
    requests: BTreeMap<RequestId, RequestRecord>,
    guest_email: String,
    guest_enabled: bool,
    login_delivery: CredentialDelivery,
    guest_delivery: CredentialDelivery,
    offline: bool,
    next_user_id: UserId,
    next_request_id: RequestId,
    next_token: u64,
    ticks: i64,
    calls: Vec<String>,
}

impl ServerState {
    fn new(guest_email: String) -> Self {
        let mut state = Self {
            accounts: Vec::new(),
            tokens: HashMap::new(),
            requests: BTreeMap::new(),
            guest_email: guest_email.clone(),
            guest_enabled: true,
            login_delivery: CredentialDelivery::Header,
            guest_delivery: CredentialDelivery::Body,
            offline: false,
            next_user_id: 1,
            next_request_id: 1,
            next_token: 1,
            ticks: 0,
            calls: Vec::new(),
        };
        state.insert_account(&guest_email, "guest-password");
        state
    }

    fn insert_account(&mut self, email: &str, password: &str) -> User {
        let user = User {
            id: self.next_user_id,
            email: email.to_string(),
        };
        self.next_user_id += 1;
        self.accounts.push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        user
    }

    fn account_by_email(&self, email: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.user.email.eq_ignore_ascii_case(email))
    }

    fn user_by_id(&self, id: UserId) -> Option<&User> {
        self.accounts.iter().map(|a| &a.user).find(|u| u.id == id)
    }

    /// Monotonic clock so records have a stable newest-first order
    fn now(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        let epoch = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        epoch + Duration::seconds(self.ticks)
    }

    fn issue_token(&mut self, user_id: UserId) -> String {
        let token = format!("token-{}", self.next_token);
        self.next_token += 1;
        self.tokens.insert(token.clone(), user_id);
        token
    }

    fn authenticate(&self, request: &ApiRequest) -> Result<&User, ApiError> {
        let unauthorized = || {
            ApiError::status(
                401,
                json!({"error": "You need to sign in or sign up before continuing."}),
            )
        };
        let credential = request.credential.as_ref().ok_or_else(unauthorized)?;
        let user_id = self
            .tokens
            .get(credential.expose())
            .ok_or_else(unauthorized)?;
        self.user_by_id(*user_id).ok_or_else(unauthorized)
    }

    fn insert_request(&mut self, owner: Option<UserId>, fields: RequestFields) -> RequestRecord {
        let now = self.now();
        let author = owner
            .and_then(|id| self.user_by_id(id))
            .map(|u| AuthorSummary {
                id: Some(u.id),
                email: u.email.clone(),
            });
        let record = RequestRecord {
            id: self.next_request_id,
            title: fields.title,
            description: fields.description,
            status: fields.status,
            priority: fields.priority,
            owner_id: owner,
            author,
            created_at: now,
            updated_at: now,
        };
        self.next_request_id += 1;
        self.requests.insert(record.id, record.clone());
        record
    }
}

#[derive(Debug, Deserialize)]
struct UserParams {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    password_confirmation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: UserParams,
}

#[derive(Debug, Deserialize)]
struct CreateEnvelope {
    request: RequestFields,
}

#[derive(Debug, Deserialize)]
struct UpdateEnvelope {
    request: RequestChanges,
}

/// In-memory implementation of the request API
///
/// # Example
///
/// ```rust
/// use request_desk::InMemoryTransport;
///
/// # async fn example() {
/// let server = InMemoryTransport::new();
/// let owner = server.register_user("owner@example.com", "password1").await;
/// assert_eq!(server.call_count().await, 0);
/// # let _ = owner;
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<ServerState>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Create a backend whose guest account uses the default guest email
    pub fn new() -> Self {
        Self::with_guest_email(DEFAULT_GUEST_EMAIL)
    }

    pub fn with_guest_email(guest_email: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState::new(guest_email.into()))),
        }
    }

    /// Create an account directly, bypassing validation
    pub async fn register_user(&self, email: &str, password: &str) -> User {
        self.state.lock().await.insert_account(email, password)
    }

    /// Insert a request owned by `owner` (or by nobody)
    pub async fn seed_request(&self, owner: Option<UserId>, fields: RequestFields) -> RequestRecord {
        self.state.lock().await.insert_request(owner, fields)
    }

    /// Remove a request behind the client's back
    pub async fn remove_request(&self, id: RequestId) -> bool {
        self.state.lock().await.requests.remove(&id).is_some()
    }

    /// Make every subsequent call fail with a network error
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Enable or disable the shared guest account
    pub async fn set_guest_enabled(&self, enabled: bool) {
        self.state.lock().await.guest_enabled = enabled;
    }

    /// Choose how sign-in delivers the credential
    pub async fn set_login_delivery(&self, delivery: CredentialDelivery) {
        self.state.lock().await.login_delivery = delivery;
    }

    /// Choose how guest login delivers the credential
    pub async fn set_guest_delivery(&self, delivery: CredentialDelivery) {
        self.state.lock().await.guest_delivery = delivery;
    }

    /// Number of calls received so far
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    /// Calls received so far, as `"METHOD /path"`
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Whether a bearer token is currently valid
    pub async fn token_is_active(&self, token: &str) -> bool {
        self.state.lock().await.tokens.contains_key(token)
    }

    fn segments(path: &str) -> Vec<&str> {
        path.split('?')
            .next()
            .unwrap_or_default()
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn parse_id(raw: &str) -> Result<RequestId, ApiError> {
        raw.parse()
            .map_err(|_| ApiError::status(404, json!({"error": "Request not found"})))
    }

    fn sign_in_response(
        delivery: CredentialDelivery,
        status: u16,
        user: &User,
        token: String,
    ) -> ApiResponse {
        match delivery {
            CredentialDelivery::Header => ApiResponse::new(status, json!({ "user": user }))
                .with_header("Authorization", format!("Bearer {}", token)),
            CredentialDelivery::Body => ApiResponse::new(
                status,
                json!({"user": {"id": user.id, "email": user.email, "auth_token": token}}),
            ),
        }
    }

    fn sign_up(state: &mut ServerState, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let params: UserEnvelope = decode_body(request)?;
        let params = params.user;

        let mut errors = Vec::new();
        if params.email.trim().is_empty() {
            errors.push("Email can't be blank".to_string());
        } else if !params.email.contains('@') {
            errors.push("Email is invalid".to_string());
        } else if state.account_by_email(&params.email).is_some() {
            errors.push("Email has already been taken".to_string());
        }
        if params.password.len() < 6 {
            errors.push("Password is too short (minimum is 6 characters)".to_string());
        }
        if params.password_confirmation.as_deref() != Some(params.password.as_str()) {
            errors.push("Password confirmation doesn't match Password".to_string());
        }
        if !errors.is_empty() {
            return Err(ApiError::status(422, json!({ "errors": errors })));
        }

        let user = state.insert_account(params.email.trim(), &params.password);
        Ok(ApiResponse::new(201, json!({ "user": user })))
    }

    fn sign_in(state: &mut ServerState, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let params: UserEnvelope = decode_body(request)?;
        let params = params.user;

        let user = match state.account_by_email(&params.email) {
            Some(account) if account.password == params.password => account.user.clone(),
            _ => {
                return Err(ApiError::status(
                    401,
                    json!({"error": "Invalid Email or password."}),
                ))
            }
        };

        let token = state.issue_token(user.id);
        Ok(Self::sign_in_response(state.login_delivery, 200, &user, token))
    }

    fn guest(state: &mut ServerState) -> Result<ApiResponse, ApiError> {
        if !state.guest_enabled {
            return Err(ApiError::status(
                503,
                json!({"error": "Guest access is currently disabled"}),
            ));
        }
        let guest_email = state.guest_email.clone();
        let user = state
            .account_by_email(&guest_email)
            .map(|a| a.user.clone())
            .ok_or_else(|| ApiError::status(503, json!({"error": "Guest account missing"})))?;

        let token = state.issue_token(user.id);
        Ok(Self::sign_in_response(state.guest_delivery, 200, &user, token))
    }

    fn sign_out(state: &mut ServerState, request: &ApiRequest) -> ApiResponse {
        if let Some(ref credential) = request.credential {
            state.tokens.remove(credential.expose());
        }
        ApiResponse::new(204, Value::Null)
    }

    fn list(state: &ServerState, request: &ApiRequest) -> ApiResponse {
        let status = request.query_param("status").and_then(RequestStatus::parse);
        let priority = request.query_param("priority").and_then(RequestPriority::parse);
        let title = request
            .query_param("title")
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        let page = request
            .query_param("page")
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let per_page = request
            .query_param("per_page")
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(DEFAULT_PER_PAGE)
            .max(1);

        let mut matching: Vec<&RequestRecord> = state
            .requests
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| priority.map_or(true, |p| r.priority == p))
            .filter(|r| {
                title
                    .as_ref()
                    .map_or(true, |t| r.title.to_lowercase().contains(t.as_str()))
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total_count = matching.len();
        let items: Vec<&RequestRecord> = matching
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        ApiResponse::new(200, json!({"requests": items, "total_count": total_count}))
    }

    fn show(state: &ServerState, id: RequestId) -> Result<ApiResponse, ApiError> {
        let record = state
            .requests
            .get(&id)
            .ok_or_else(|| ApiError::status(404, json!({"error": "Request not found"})))?;
        Ok(ApiResponse::new(200, json!({ "request": record })))
    }

    fn create(state: &mut ServerState, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let user = state.authenticate(request)?.clone();
        if user.email.eq_ignore_ascii_case(&state.guest_email) {
            return Err(ApiError::status(
                403,
                json!({"error": "Guest accounts are read-only"}),
            ));
        }

        let envelope: CreateEnvelope = decode_body(request)?;
        let fields = envelope.request;
        let errors = validate_text(Some(&fields.title), Some(&fields.description));
        if !errors.is_empty() {
            return Err(ApiError::status(422, json!({ "errors": errors })));
        }

        let record = state.insert_request(Some(user.id), fields);
        Ok(ApiResponse::new(201, json!({ "request": record })))
    }

    fn owned_request<'a>(
        state: &'a mut ServerState,
        request: &ApiRequest,
        id: RequestId,
    ) -> Result<&'a mut RequestRecord, ApiError> {
        let user_id = state.authenticate(request)?.id;
        let record = state
            .requests
            .get_mut(&id)
            .ok_or_else(|| ApiError::status(404, json!({"error": "Request not found"})))?;
        if record.owner_id != Some(user_id) {
            return Err(ApiError::status(
                403,
                json!({"error": "You are not allowed to modify this request"}),
            ));
        }
        Ok(record)
    }

    fn update(
        state: &mut ServerState,
        request: &ApiRequest,
        id: RequestId,
    ) -> Result<ApiResponse, ApiError> {
        let envelope: UpdateEnvelope = decode_body(request)?;
        let changes = envelope.request;
        let errors = validate_text(changes.title.as_ref(), changes.description.as_ref());

        let now = state.now();
        let record = Self::owned_request(state, request, id)?;
        if !errors.is_empty() {
            return Err(ApiError::status(422, json!({ "errors": errors })));
        }

        if let Some(title) = changes.title {
            record.title = title;
        }
        if let Some(description) = changes.description {
            record.description = description;
        }
        if let Some(status) = changes.status {
            record.status = status;
        }
        if let Some(priority) = changes.priority {
            record.priority = priority;
        }
        record.updated_at = now;

        Ok(ApiResponse::new(200, json!({ "request": record })))
    }

    fn destroy(
        state: &mut ServerState,
        request: &ApiRequest,
        id: RequestId,
    ) -> Result<ApiResponse, ApiError> {
        Self::owned_request(state, request, id)?;
        state.requests.remove(&id);
        Ok(ApiResponse::new(204, Value::Null))
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(request: &ApiRequest) -> Result<T, ApiError> {
    let body = request.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(body)
        .map_err(|e| ApiError::status(400, json!({ "error": format!("Malformed body: {}", e) })))
}

fn validate_text(title: Option<&String>, description: Option<&String>) -> Vec<String> {
    let mut errors = Vec::new();
    if title.is_some_and(|t| t.trim().is_empty()) {
        errors.push("Title can't be blank".to_string());
    }
    if description.is_some_and(|d| d.trim().is_empty()) {
        errors.push("Description can't be blank".to_string());
    }
    errors
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(format!("{} {}", request.method, request.path));

        if state.offline {
            return Err(ApiError::Network("connection refused".to_string()));
        }

        let segments = Self::segments(&request.path);
        match (request.method, segments.as_slice()) {
            (Method::Post, ["users"]) => Self::sign_up(&mut state, &request),
            (Method::Post, ["users", "sign_in"]) => Self::sign_in(&mut state, &request),
            (Method::Delete, ["users", "sign_out"]) => Ok(Self::sign_out(&mut state, &request)),
            (Method::Post, ["auth", "guest"]) => Self::guest(&mut state),
            (Method::Get, ["requests"]) => Ok(Self::list(&state, &request)),
            (Method::Post, ["requests"]) => Self::create(&mut state, &request),
            (Method::Get, ["requests", id]) => Self::show(&state, Self::parse_id(id)?),
            (Method::Patch, ["requests", id]) => {
                let id = Self::parse_id(id)?;
                Self::update(&mut state, &request, id)
            }
            (Method::Delete, ["requests", id]) => {
                let id = Self::parse_id(id)?;
                Self::destroy(&mut state, &request, id)
            }
            _ => Err(ApiError::status(404, json!({"error": "No route matches"}))),
        }
    }
}
