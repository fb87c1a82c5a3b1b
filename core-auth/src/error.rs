use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Session {session_id} does not use a refreshable sign-in")]
    NotRefreshable { session_id: String },

    #[error("No refresh token available for session {session_id}")]
    NoRefreshToken { session_id: String },

    #[error("No token refresh client is configured")]
    RefreshClientUnavailable,

    #[error("Token endpoint rejected the refresh ({status}): {error}")]
    RefreshRejected { status: u16, error: String },

    #[error("Token endpoint unreachable: {0}")]
    RefreshUnavailable(String),

    #[error("Token refresh timed out after {timeout_secs}s")]
    RefreshTimeout { timeout_secs: u64 },

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("Token decryption failed: {0}")]
    TokenDecryption(String),

    #[error("Token encryption failed: {0}")]
    TokenEncryption(String),

    #[error("Session {session_id} no longer exists")]
    SessionNotFound { session_id: String },

    #[error("Session {session_id} is corrupted: {reason}")]
    SessionCorrupted { session_id: String, reason: String },

    #[error("Failed to save session {session_id}: {reason}")]
    SessionSaveFailed { session_id: String, reason: String },

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether the session can no longer be used and must be destroyed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::NoRefreshToken { .. }
                | AuthError::RefreshClientUnavailable
                | AuthError::RefreshRejected { .. }
                | AuthError::RefreshUnavailable(_)
                | AuthError::RefreshTimeout { .. }
                | AuthError::InvalidTokenResponse(_)
                | AuthError::TokenDecryption(_)
                | AuthError::TokenEncryption(_)
                | AuthError::SessionNotFound { .. }
                | AuthError::SessionCorrupted { .. }
        )
    }

    /// Stable machine-readable code, safe to expose to clients and audit logs.
    pub fn failure_code(&self) -> &'static str {
        match self {
            AuthError::NotRefreshable { .. } => "NOT_REFRESHABLE_SESSION",
            AuthError::NoRefreshToken { .. } => "NO_REFRESH_TOKEN",
            AuthError::RefreshClientUnavailable => "REFRESH_CLIENT_UNAVAILABLE",
            AuthError::RefreshRejected { .. } => "REFRESH_REJECTED",
            AuthError::RefreshUnavailable(_) => "REFRESH_UNAVAILABLE",
            AuthError::RefreshTimeout { .. } => "REFRESH_TIMEOUT",
            AuthError::InvalidTokenResponse(_) => "INVALID_TOKEN_RESPONSE",
            AuthError::TokenDecryption(_) => "TOKEN_DECRYPTION_FAILED",
            AuthError::TokenEncryption(_) => "TOKEN_ENCRYPTION_FAILED",
            AuthError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            AuthError::SessionCorrupted { .. } => "SESSION_CORRUPTED",
            AuthError::SessionSaveFailed { .. } => "SESSION_SAVE_FAILED",
            AuthError::Storage(_) => "SESSION_STORE_UNAVAILABLE",
            AuthError::Config(_) => "AUTH_MISCONFIGURED",
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
