//! # Event Bus System
//!
//! Typed, in-process event broadcasting built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The resilience core emits events for the things operators want to watch
//! without scraping logs: token refreshes, expired sessions, lockouts and
//! cache effectiveness. Emitting never blocks and never fails the operation
//! that produced the event; with no subscribers the event is simply dropped.
//!
//! ```text
//! ┌────────────────┐  emit   ┌──────────┐  subscribe  ┌────────────┐
//! │ TokenLifecycle ├────────>│          ├────────────>│ Subscriber │
//! └────────────────┘         │ EventBus │             └────────────┘
//! ┌────────────────┐  emit   │          │  subscribe  ┌────────────┐
//! │ ResponseCache  ├────────>│          ├────────────>│ Subscriber │
//! └────────────────┘         └──────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! let _ = bus.emit(CoreEvent::Auth(AuthEvent::LockoutTriggered {
//!     identifier: "10.0.0.7:alice".to_string(),
//!     failures: 3,
//!     lockout_secs: 30,
//! }));
//!
//! let event = rx.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Auth(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep reading.
//! - **`RecvError::Closed`**: every sender is gone; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session tokens and login protection
    Auth(AuthEvent),
    /// Outbound request scheduling and caching
    Gateway(GatewayEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Gateway(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::SessionExpired { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::LockoutTriggered { .. }) => EventSeverity::Warning,
            CoreEvent::Gateway(GatewayEvent::FetchFailed { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::TokenRefreshed { .. }) => EventSeverity::Info,
            CoreEvent::Auth(AuthEvent::LockoutCleared { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Session token lifecycle and brute-force protection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A refresh against the token endpoint started.
    TokenRefreshing { session_id: String },
    /// New tokens were stored and the session persisted.
    TokenRefreshed {
        session_id: String,
        /// Unix epoch seconds
        expires_at: i64,
    },
    /// The session was destroyed after a terminal refresh failure.
    SessionExpired {
        session_id: String,
        /// Stable machine-readable failure code
        code: String,
    },
    /// An identifier crossed a lockout tier.
    LockoutTriggered {
        identifier: String,
        failures: u32,
        lockout_secs: u64,
    },
    /// A successful login cleared an identifier's failure history.
    LockoutCleared { identifier: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::TokenRefreshing { .. } => "Refreshing access token",
            AuthEvent::TokenRefreshed { .. } => "Token refreshed successfully",
            AuthEvent::SessionExpired { .. } => "Session expired",
            AuthEvent::LockoutTriggered { .. } => "Login lockout triggered",
            AuthEvent::LockoutCleared { .. } => "Login lockout cleared",
        }
    }
}

// ============================================================================
// Gateway Events
// ============================================================================

/// Outbound call caching outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum GatewayEvent {
    CacheHit { namespace: String },
    CacheMiss { namespace: String },
    /// The upstream fetch failed; every coalesced waiter saw the same error.
    FetchFailed {
        namespace: String,
        message: String,
        waiters: usize,
    },
}

impl GatewayEvent {
    fn description(&self) -> &str {
        match self {
            GatewayEvent::CacheHit { .. } => "Served from cache",
            GatewayEvent::CacheMiss { .. } => "Cache miss",
            GatewayEvent::FetchFailed { .. } => "Upstream fetch failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by every core component.
///
/// Cloning is cheap and all clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none. Producers in the core ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// New independent receiver for all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let auth_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Auth(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next matching event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders are dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
