//! # Token Lifecycle Manager
//!
//! Keeps the access token of an OIDC session valid across requests.
//!
//! ## Overview
//!
//! Before a handler runs, [`TokenLifecycleManager::ensure_fresh`] inspects the
//! session's token expiry. When the access token expires within the lead
//! window and a refresh token is available, the manager:
//!
//! 1. Takes the per-session refresh lock and reloads the session, adopting
//!    tokens a concurrent request already refreshed
//! 2. Decrypts the refresh token and calls the [`TokenRefresher`], bounded by
//!    the refresh timeout
//! 3. Encrypts the new tokens, keeping the previous refresh and ID tokens if
//!    the provider did not return new ones, and merges the new claims
//! 4. Persists the session before the handler is allowed to run
//!
//! ## Failure Handling
//!
//! Refresh failures are terminal: the session is destroyed, the event is
//! written to the audit log and the request is answered with a 401 JSON body
//! (API clients) or a redirect to the login page (page navigations). A
//! session that was refreshed but could not be saved is answered with a
//! distinct 500 and is not destroyed.
//!
//! ## Usage
//!
//! ```ignore
//! let outcome = tokens.ensure_fresh(&mut session, &RequestInfo::new(uri)).await;
//! match outcome.response() {
//!     Some(response) => render(response),
//!     None => handler(session).await,
//! }
//! ```

use crate::audit::TracingAuditLog;
use crate::error::{AuthError, Result};
use crate::guard::{AuthResponse, GuardOutcome, RequestInfo};
use crate::oauth::{RefreshedTokens, TokenRefresher};
use crate::session_store::SessionRepository;
use crate::types::{Session, SessionTokenSet};
use bridge_traits::audit::{AuditEntry, AuditLog};
use bridge_traits::storage::SessionStore;
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::TokenCipher;
use chrono::{DateTime, Utc};
use core_runtime::config::TokenRefreshConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use core_runtime::logging::redact_if_sensitive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Access token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

type RefreshLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// Refresh unless a concurrent request already did.
    IfDue,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    /// Another request refreshed first; its tokens were taken over.
    Adopted,
    Refreshed,
}

/// Refreshes and persists session tokens ahead of expiry.
pub struct TokenLifecycleManager {
    config: TokenRefreshConfig,
    sessions: SessionRepository,
    cipher: Arc<dyn TokenCipher>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    refresh_locks: RefreshLocks,
}

impl TokenLifecycleManager {
    /// Create a manager without a refresh client.
    ///
    /// Until [`with_refresher`](Self::with_refresher) is called every due
    /// refresh fails with [`AuthError::RefreshClientUnavailable`].
    pub fn new(
        config: TokenRefreshConfig,
        store: Arc<dyn SessionStore>,
        cipher: Arc<dyn TokenCipher>,
    ) -> Self {
        Self {
            config,
            sessions: SessionRepository::new(store),
            cipher,
            refresher: None,
            audit: Arc::new(TracingAuditLog),
            clock: Arc::new(SystemClock),
            event_bus: None,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_audit_log(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &TokenRefreshConfig {
        &self.config
    }

    /// Whether `session` is refreshable, holds a refresh token and expires
    /// within the lead window.
    pub fn needs_refresh(&self, session: &Session) -> bool {
        if !session.auth_type.is_refreshable() {
            return false;
        }

        session.tokens.as_ref().is_some_and(|tokens| {
            tokens.has_refresh_token() && tokens.expires_at.is_some_and(|at| self.is_due(at))
        })
    }

    /// Refresh the session's tokens if they are due and decide whether the
    /// request may continue.
    #[instrument(skip_all, fields(session_id = %session.id))]
    pub async fn ensure_fresh(&self, session: &mut Session, request: &RequestInfo) -> GuardOutcome {
        if !session.auth_type.is_refreshable() {
            return GuardOutcome::Proceed;
        }

        let Some(tokens) = &session.tokens else {
            return GuardOutcome::Proceed;
        };
        let Some(expires_at) = tokens.expires_at else {
            return GuardOutcome::Proceed;
        };

        if !self.is_due(expires_at) {
            return GuardOutcome::Proceed;
        }

        if !tokens.has_refresh_token() {
            if !tokens.is_expired_at(self.clock.now()) {
                debug!("Token expiring soon but no refresh token, skipping refresh");
                return GuardOutcome::Proceed;
            }

            let err = AuthError::NoRefreshToken {
                session_id: session.id.clone(),
            };
            return self.expire(session, request, &err).await;
        }

        match self.refresh(session, RefreshMode::IfDue).await {
            Ok(_) => GuardOutcome::Refreshed,
            Err(err) if err.is_terminal() => self.expire(session, request, &err).await,
            Err(err) => {
                error!(error = %err, "Session check failed");
                let message = match &err {
                    AuthError::SessionSaveFailed { .. } => "Failed to save session",
                    _ => "Session check failed",
                };
                GuardOutcome::Respond(AuthResponse::server_error(message, err.failure_code()))
            }
        }
    }

    /// Refresh the session's tokens now, regardless of expiry.
    ///
    /// Unlike [`ensure_fresh`](Self::ensure_fresh) this never destroys the
    /// session; the caller decides what a failure means.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotRefreshable`] for non-OIDC sessions
    /// - [`AuthError::NoRefreshToken`] if the session holds no refresh token
    /// - [`AuthError::RefreshClientUnavailable`] if no refresher is configured
    /// - [`AuthError::SessionSaveFailed`] if the refreshed session could not be saved
    /// - any error from the refresh itself
    #[instrument(skip_all, fields(session_id = %session.id))]
    pub async fn force_token_refresh(&self, session: &mut Session) -> Result<()> {
        if !session.auth_type.is_refreshable() {
            return Err(AuthError::NotRefreshable {
                session_id: session.id.clone(),
            });
        }

        if !session
            .tokens
            .as_ref()
            .is_some_and(SessionTokenSet::has_refresh_token)
        {
            return Err(AuthError::NoRefreshToken {
                session_id: session.id.clone(),
            });
        }

        self.refresh(session, RefreshMode::Always).await.map(|_| ())
    }

    /// Decrypted access token, or `None` if there is none or it cannot be read.
    pub fn get_access_token(&self, session: &Session) -> Option<String> {
        let sealed = &session.tokens.as_ref()?.access_token;

        match self.cipher.decrypt(sealed) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(session_id = %session.id, error = %e, "Access token unreadable");
                None
            }
        }
    }

    /// Number of sessions currently holding or waiting on a refresh lock.
    pub fn active_refreshes(&self) -> usize {
        self.refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn refresh(&self, session: &mut Session, mode: RefreshMode) -> Result<Refresh> {
        let refresher = self
            .refresher
            .clone()
            .ok_or(AuthError::RefreshClientUnavailable)?;

        let entry = SessionLock::acquire(&self.refresh_locks, &session.id);
        let _guard = Arc::clone(&entry.lock).lock_owned().await;

        self.refresh_locked(refresher.as_ref(), session, mode).await
    }

    async fn refresh_locked(
        &self,
        refresher: &dyn TokenRefresher,
        session: &mut Session,
        mode: RefreshMode,
    ) -> Result<Refresh> {
        let current = self
            .sessions
            .load(&session.id)
            .await?
            .ok_or_else(|| AuthError::SessionNotFound {
                session_id: session.id.clone(),
            })?;

        if mode == RefreshMode::IfDue && !self.needs_refresh(&current) {
            debug!("Tokens already refreshed by a concurrent request");
            *session = current;
            return Ok(Refresh::Adopted);
        }
        *session = current;

        let no_refresh_token = || AuthError::NoRefreshToken {
            session_id: session.id.clone(),
        };
        let previous = session.tokens.as_ref().ok_or_else(no_refresh_token)?;
        let sealed = previous
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(no_refresh_token)?;

        let refresh_token = self
            .cipher
            .decrypt(sealed)
            .map_err(|e| AuthError::TokenDecryption(e.to_string()))?;

        info!("Refreshing session tokens");
        self.emit(AuthEvent::TokenRefreshing {
            session_id: session.id.clone(),
        });

        let refreshed = match timeout(self.config.refresh_timeout, refresher.refresh(&refresh_token)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AuthError::RefreshTimeout {
                    timeout_secs: self.config.refresh_timeout.as_secs(),
                })
            }
        };

        let updated = self.seal(previous, refreshed, self.clock.now())?;
        let expires_at = updated.expires_at;
        session.tokens = Some(updated);

        self.sessions.save(session).await?;

        info!(expires_at = ?expires_at, "Session tokens refreshed");
        self.emit(AuthEvent::TokenRefreshed {
            session_id: session.id.clone(),
            expires_at: expires_at.map(|at| at.timestamp()).unwrap_or_default(),
        });

        Ok(Refresh::Refreshed)
    }

    /// Encrypt a refresh result into a token set, carrying over what the
    /// provider did not rotate.
    fn seal(
        &self,
        previous: &SessionTokenSet,
        refreshed: RefreshedTokens,
        now: DateTime<Utc>,
    ) -> Result<SessionTokenSet> {
        let encrypt = |plaintext: &str| {
            self.cipher
                .encrypt(plaintext)
                .map_err(|e| AuthError::TokenEncryption(e.to_string()))
        };

        let access_token = encrypt(&refreshed.access_token)?;
        let id_token = match &refreshed.id_token {
            Some(token) => Some(encrypt(token)?),
            None => previous.id_token.clone(),
        };
        let refresh_token = match &refreshed.refresh_token {
            Some(token) => Some(encrypt(token)?),
            None => previous.refresh_token.clone(),
        };

        let mut claims = previous.claims.clone();
        claims.extend(refreshed.claims);

        let lifetime = refreshed
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .max(0);

        Ok(SessionTokenSet {
            access_token,
            id_token,
            refresh_token,
            expires_at: Some(expiry(now, lifetime)),
            claims,
        })
    }

    /// Destroy a session after a terminal failure and build the response.
    async fn expire(
        &self,
        session: &mut Session,
        request: &RequestInfo,
        err: &AuthError,
    ) -> GuardOutcome {
        let code = err.failure_code();
        let identity = session.identity();
        warn!(
            code,
            error = %err,
            identity = %redact_if_sensitive("identity", identity.as_deref().unwrap_or("-")),
            "Session expired, destroying"
        );

        let entry = AuditEntry::new("session_expired", format!("{}: {}", code, err))
            .with_identity(identity)
            .with_origin(request.ip.clone(), request.user_agent.clone())
            .at(self.clock.now());
        if let Err(e) = self.audit.record(entry).await {
            warn!(error = %e, "Failed to write audit entry");
        }

        if let Err(e) = self.sessions.destroy(&session.id).await {
            warn!(error = %e, "Failed to destroy expired session");
        }
        session.tokens = None;

        self.emit(AuthEvent::SessionExpired {
            session_id: session.id.clone(),
            code: code.to_string(),
        });

        let response = if request.is_api() {
            AuthResponse::session_expired(code, &self.config.login_path)
        } else {
            AuthResponse::login_redirect(&self.config.login_path, &request.path)
        };
        GuardOutcome::Respond(response)
    }

    fn is_due(&self, expires_at: DateTime<Utc>) -> bool {
        match expires_at.signed_duration_since(self.clock.now()).to_std() {
            Ok(remaining) => remaining <= self.config.lead_window,
            // Already expired
            Err(_) => true,
        }
    }

    fn emit(&self, event: AuthEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Auth(event));
        }
    }
}

impl std::fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("config", &self.config)
            .field("has_refresher", &self.refresher.is_some())
            .field("active_refreshes", &self.active_refreshes())
            .finish()
    }
}

fn expiry(now: DateTime<Utc>, lifetime_secs: i64) -> DateTime<Utc> {
    chrono::Duration::try_seconds(lifetime_secs)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Handle on one session's refresh lock; the map entry goes away with the
/// last handle.
struct SessionLock<'a> {
    locks: &'a RefreshLocks,
    session_id: String,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a> SessionLock<'a> {
    fn acquire(locks: &'a RefreshLocks, session_id: &str) -> Self {
        let lock = locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        Self {
            locks,
            session_id: session_id.to_string(),
            lock,
        }
    }
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let last_handle = locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);

        if last_handle {
            locks.remove(&self.session_id);
        }
    }
}
