//! # Authentication Module
//!
//! Protects the sign-in surface and keeps OIDC sessions usable.
//!
//! ## Overview
//!
//! - [`ProgressiveLockout`] counts failed sign-ins per identifier and locks
//!   the identifier out for escalating periods
//! - [`TokenLifecycleManager`] refreshes a session's access token before it
//!   expires and persists the result before the request continues
//!
//! ## Features
//!
//! - Tiered brute-force lockout with absolute expiry
//! - Per-session refresh lock so concurrent requests refresh once
//! - OAuth 2.0 `refresh_token` grant client with bounded retry
//! - AES-256-GCM token encryption at rest
//! - Audit trail for destroyed sessions

pub mod audit;
pub mod cipher;
pub mod error;
pub mod guard;
pub mod lockout;
pub mod manager;
pub mod oauth;
pub mod session_store;
pub mod types;

pub use audit::TracingAuditLog;
pub use cipher::AesGcmTokenCipher;
pub use error::{AuthError, Result};
pub use guard::{AuthResponse, GuardOutcome, RequestInfo, SESSION_EXPIRED_CODE};
pub use lockout::ProgressiveLockout;
pub use manager::TokenLifecycleManager;
pub use oauth::{OAuthRefreshClient, OAuthRefreshConfig, RefreshedTokens, TokenRefresher};
pub use session_store::SessionRepository;
pub use types::{AuthType, Session, SessionTokenSet};
