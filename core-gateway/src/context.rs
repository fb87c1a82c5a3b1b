//! Per-request identity and observability state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// Opaque identity that concurrency limits are applied to.
///
/// Authenticated traffic is keyed by user id; anonymous auth attempts by the
/// network origin plus the submitted username.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Actor(String);

impl Actor {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn user(user_id: impl AsRef<str>) -> Self {
        Self(format!("user:{}", user_id.as_ref()))
    }

    /// Usernames are compared case-insensitively.
    pub fn ip_username(ip: impl AsRef<str>, username: impl AsRef<str>) -> Self {
        Self(format!(
            "ip:{}|user:{}",
            ip.as_ref(),
            username.as_ref().trim().to_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State scoped to one inbound request.
///
/// Replaces any process-wide "served from cache" flag: handlers create one
/// context per request and pass it to every gateway call, then read
/// [`served_from_cache`](Self::served_from_cache) when rendering.
#[derive(Debug)]
pub struct RequestContext {
    request_id: Uuid,
    actor: Actor,
    cache_hits: AtomicU32,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            actor,
            cache_hits: AtomicU32::new(0),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Record that a value was answered from cache.
    pub fn mark_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u32 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn served_from_cache(&self) -> bool {
        self.cache_hits() > 0
    }
}
