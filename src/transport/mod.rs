//! Transport to the request API
//!
//! The core only ever talks to the server through [`Transport`]. Base URL,
//! timeouts and header injection belong to the implementation:
//! - [`HttpTransport`]: reqwest against a live server
//! - [`InMemoryTransport`]: in-process backend for tests and demos

#[cfg(feature = "client")]
mod http;
mod memory;

#[cfg(feature = "client")]
pub use http::HttpTransport;
pub use memory::{CredentialDelivery, InMemoryTransport};

use crate::error::{AuthFailure, SdkError};
use crate::session::Credential;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// HTTP verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Patch => write!(f, "PATCH"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single call to the request API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API root, e.g. `/requests/7`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Sent as `Authorization: Bearer <token>` when present
    pub credential: Option<Credential>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            credential: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_credential(mut self, credential: Option<&Credential>) -> Self {
        self.credential = credential.cloned();
        self
    }

    /// Look up a query parameter
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Successful (2xx) response
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    /// Parsed JSON body, `Null` when empty
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Decode the body into a typed value
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.body.clone()).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Transport failure
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Server answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: Value },

    /// Connection failed or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Body could not be parsed
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Build a status error with a JSON body
    pub fn status(status: u16, body: Value) -> Self {
        ApiError::Status { status, body }
    }

    /// HTTP status, when the server answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured field errors from an `{"errors": ...}` body.
    ///
    /// Accepts either a list of messages or a `{field: [messages]}` map.
    pub fn field_errors(&self) -> Option<Vec<String>> {
        let ApiError::Status { body, .. } = self else {
            return None;
        };
        match body.get("errors")? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Object(fields) => {
                let mut messages = Vec::new();
                for (field, errors) in fields {
                    match errors {
                        Value::Array(list) => {
                            for err in list {
                                let text = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
                                messages.push(format!("{} {}", field, text));
                            }
                        }
                        Value::String(text) => messages.push(format!("{} {}", field, text)),
                        other => messages.push(format!("{} {}", field, other)),
                    }
                }
                Some(messages)
            }
            Value::String(s) => Some(vec![s.clone()]),
            _ => None,
        }
    }

    /// Best human-readable description of the failure
    pub fn detail(&self) -> String {
        match self {
            ApiError::Status { status, body } => {
                if let Some(message) = body.get("error").and_then(Value::as_str) {
                    return message.to_string();
                }
                if let Some(errors) = self.field_errors() {
                    if !errors.is_empty() {
                        return errors.join(", ");
                    }
                }
                match body {
                    Value::Null => format!("HTTP {}", status),
                    Value::String(s) if !s.is_empty() => s.clone(),
                    other => format!("HTTP {} - {}", status, other),
                }
            }
            ApiError::Network(msg) | ApiError::Decode(msg) => msg.clone(),
        }
    }
}

impl From<ApiError> for SdkError {
    fn from(err: ApiError) -> Self {
        match err.status_code() {
            Some(404) => SdkError::NotFound(err.detail()),
            Some(401) => SdkError::Authentication {
                reason: AuthFailure::InvalidCredentials,
                detail: err.detail(),
            },
            Some(403) => SdkError::Authorization(err.detail()),
            Some(422) => match err.field_errors() {
                Some(field_errors) => SdkError::ServerValidation { field_errors },
                None => SdkError::Transport(err.detail()),
            },
            _ => SdkError::Transport(err.to_string()),
        }
    }
}

/// Verb-based access to the request API.
///
/// Implementations return the parsed body for 2xx responses and
/// [`ApiError::Status`] for everything else. Timeouts surface as
/// [`ApiError::Network`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;

    async fn get(
        &self,
        path: &str,
        query: Vec<(String, String)>,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse, ApiError> {
        self.send(
            ApiRequest::new(Method::Get, path)
                .with_query(query)
                .with_credential(credential),
        )
        .await
    }

    async fn post(
        &self,
        path: &str,
        body: Option<Value>,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse, ApiError> {
        let mut request = ApiRequest::new(Method::Post, path).with_credential(credential);
        request.body = body;
        self.send(request).await
    }

    async fn patch(
        &self,
        path: &str,
        body: Value,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse, ApiError> {
        self.send(
            ApiRequest::new(Method::Patch, path)
                .with_body(body)
                .with_credential(credential),
        )
        .await
    }

    async fn delete(
        &self,
        path: &str,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::new(Method::Delete, path).with_credential(credential))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_errors_from_list() {
        let err = ApiError::status(422, json!({"errors": ["Title can't be blank"]}));
        assert_eq!(err.field_errors(), Some(vec!["Title can't be blank".to_string()]));
    }

    #[test]
    fn test_field_errors_from_map() {
        let err = ApiError::status(422, json!({"errors": {"email": ["has already been taken"]}}));
        assert_eq!(
            err.field_errors(),
            Some(vec!["email has already been taken".to_string()])
        );
    }

    #[test]
    fn test_sdk_error_mapping() {
        let not_found: SdkError = ApiError::status(404, json!({"error": "Not found"})).into();
        assert_eq!(not_found, SdkError::NotFound("Not found".into()));

        let forbidden: SdkError = ApiError::status(403, Value::Null).into();
        assert!(matches!(forbidden, SdkError::Authorization(_)));

        let expired: SdkError =
            ApiError::status(401, json!({"error": "Signature has expired"})).into();
        assert_eq!(
            expired,
            SdkError::Authentication {
                reason: AuthFailure::InvalidCredentials,
                detail: "Signature has expired".into(),
            }
        );

        let invalid: SdkError = ApiError::status(422, json!({"errors": ["bad"]})).into();
        assert_eq!(
            invalid,
            SdkError::ServerValidation { field_errors: vec!["bad".into()] }
        );

        let network: SdkError = ApiError::Network("timed out".into()).into();
        assert!(matches!(network, SdkError::Transport(_)));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = ApiResponse::new(200, Value::Null).with_header("Authorization", "Bearer abc");
        assert_eq!(response.header("authorization"), Some("Bearer abc"));
        assert_eq!(response.header("AUTHORIZATION"), Some("Bearer abc"));
    }
}
