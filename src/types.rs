//! Wire types for the request API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned request identifier
pub type RequestId = u64;

/// Server-assigned user identifier
pub type UserId = u64;

/// Request workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    /// Parse from the wire representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    #[default]
    Low,
    Medium,
    High,
}

impl RequestPriority {
    /// Parse from the wire representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server-confirmed user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

/// Author details embedded in a request record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    pub email: String,
}

/// A request as returned by the server.
///
/// The client never invents an id; records are replaced wholesale after a
/// successful update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub priority: RequestPriority,
    /// Owning user (`user_id` on the wire)
    #[serde(rename = "user_id", default)]
    pub owner_id: Option<UserId>,
    /// Author summary (`user` on the wire)
    #[serde(rename = "user", default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestRecord {
    /// Author email, or "Unknown" when the server omitted it
    pub fn author_label(&self) -> &str {
        self.author
            .as_ref()
            .map(|a| a.email.as_str())
            .unwrap_or("Unknown")
    }
}

/// Fields for a new request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFields {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub priority: RequestPriority,
}

impl RequestFields {
    /// New pending, low-priority request
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            status: RequestStatus::default(),
            priority: RequestPriority::default(),
        }
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Partial update for an existing request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<RequestPriority>,
}

impl RequestChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
    }
}

/// Response from the list endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPage {
    #[serde(default)]
    pub requests: Vec<RequestRecord>,
    #[serde(default)]
    pub total_count: u64,
}

/// `{"request": ...}` envelope used by the single-record endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request: RequestRecord,
}
