//! Security audit trail contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A security-relevant event, e.g. a session destroyed after a failed refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Machine-readable event name (`session_expired`, `login_locked`, ...)
    pub event: String,
    /// Authenticated identity if known (subject, username)
    pub identity: Option<String>,
    /// Network origin of the request
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Human-readable reason, never containing secrets
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            identity: None,
            ip: None,
            user_agent: None,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_origin(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Sink for audit entries. Failures to record are reported but must never
/// change the outcome of the request that produced the entry.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}
