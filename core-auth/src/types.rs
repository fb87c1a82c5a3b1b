use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// How the user signed in.
///
/// Only OIDC sessions carry a refresh token and can be refreshed; local
/// username/password sessions live until the web layer expires them.
///
/// # Examples
///
/// ```
/// use core_auth::AuthType;
///
/// assert!(AuthType::Oidc.is_refreshable());
/// assert!(!AuthType::Local.is_refreshable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// OpenID Connect sign-in through an external identity provider
    Oidc,
    /// Username and password checked by the application itself
    Local,
}

impl AuthType {
    pub fn is_refreshable(&self) -> bool {
        matches!(self, AuthType::Oidc)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Oidc => "oidc",
            AuthType::Local => "local",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tokens held by a session.
///
/// Token strings are ciphertexts produced by a
/// [`TokenCipher`](bridge_traits::TokenCipher); plaintext tokens never live in
/// a session.
///
/// # Security
///
/// The `Debug` implementation redacts every token field.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTokenSet {
    /// Encrypted access token
    pub access_token: String,
    /// Encrypted ID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Encrypted refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When the access token expires (UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Identity claims decoded from the most recent ID token
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl SessionTokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: None,
            refresh_token: None,
            expires_at: None,
            claims: Map::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_claims(mut self, claims: Map<String, Value>) -> Self {
        self.claims = claims;
        self
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Check if the access token has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

impl fmt::Debug for SessionTokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenSet")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("claims", &self.claims.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A user session as stored by the web layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub auth_type: AuthType,
    /// Username or subject recorded at sign-in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<SessionTokenSet>,
}

impl Session {
    pub fn local(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            auth_type: AuthType::Local,
            identity: Some(username.into()),
            tokens: None,
        }
    }

    pub fn oidc(id: impl Into<String>, tokens: SessionTokenSet) -> Self {
        Self {
            id: id.into(),
            auth_type: AuthType::Oidc,
            identity: None,
            tokens: Some(tokens),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// The best available name for this session's user.
    ///
    /// Falls back to the `preferred_username`, `email` and `sub` claims.
    pub fn identity(&self) -> Option<String> {
        if let Some(identity) = &self.identity {
            return Some(identity.clone());
        }

        let claims = &self.tokens.as_ref()?.claims;
        ["preferred_username", "email", "sub"]
            .iter()
            .find_map(|name| claims.get(*name).and_then(Value::as_str))
            .map(str::to_string)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.tokens.as_ref().and_then(|tokens| tokens.expires_at)
    }
}
