//! # Host Bridge Traits
//!
//! Collaborator contracts that the resilience core consumes but does not own.
//!
//! ## Overview
//!
//! The web front end owns sessions, secrets and outbound connectivity. This
//! crate defines the narrow traits through which the core reaches them, so that
//! the scheduler, cache, lockout and token logic can be exercised against
//! in-memory fakes and swapped onto shared infrastructure later.
//!
//! ## Traits
//!
//! ### Sessions & Secrets
//! - [`SessionStore`](storage::SessionStore) - Load / atomic save / destroy of serialized sessions
//! - [`TokenCipher`](crypto::TokenCipher) - Opaque encrypt/decrypt pair for tokens at rest
//! - [`AuditLog`](audit::AuditLog) - Security audit trail
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP used by the token refresh client
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Adapters
//!
//! | Contract | Implementation | Crate |
//! |----------|----------------|-------|
//! | `HttpClient` | `ReqwestHttpClient` | `bridge-desktop` |
//! | `SessionStore` | `SqliteSessionStore` | `bridge-desktop` |
//! | `TokenCipher` | `AesGcmTokenCipher` | `core-auth` |
//! | `AuditLog` | `TracingAuditLog` | `core-auth` |
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required collaborator
//! is missing:
//!
//! ```ignore
//! use core_runtime::error::Error;
//!
//! let store = deps.session_store
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "SessionStore".to_string(),
//!         message: "No session store provided. \
//!                  Enable the desktop-shims feature or inject one.".to_string(),
//!     })?;
//! ```
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared behind `Arc`
//! across request tasks.

pub mod audit;
pub mod crypto;
pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditLog};
pub use crypto::TokenCipher;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::SessionStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
