//! Collaborators injected into the core.

use std::sync::Arc;

use bridge_traits::{
    audit::AuditLog,
    crypto::TokenCipher,
    storage::SessionStore,
    time::{Clock, SystemClock},
};
use core_auth::{TokenRefresher, TracingAuditLog};
use core_gateway::{CacheStore, MemoryCacheStore};
use core_runtime::events::{EventBus, DEFAULT_EVENT_BUFFER_SIZE};

use crate::error::{CoreError, Result};

/// Aggregated handle to all collaborators the core requires.
pub struct CoreDependencies {
    pub session_store: Arc<dyn SessionStore>,
    pub cipher: Arc<dyn TokenCipher>,
    /// Absent when the host never runs OIDC sessions
    pub refresher: Option<Arc<dyn TokenRefresher>>,
    pub audit_log: Arc<dyn AuditLog>,
    pub cache_store: Arc<dyn CacheStore>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,
}

impl CoreDependencies {
    /// Construct a dependency bundle from the two required handles, with
    /// defaults for everything else.
    pub fn new(session_store: Arc<dyn SessionStore>, cipher: Arc<dyn TokenCipher>) -> Self {
        Self {
            session_store,
            cipher,
            refresher: None,
            audit_log: Arc::new(TracingAuditLog),
            cache_store: Arc::new(MemoryCacheStore::new()),
            clock: Arc::new(SystemClock),
            event_bus: EventBus::new(DEFAULT_EVENT_BUFFER_SIZE),
        }
    }

    pub fn builder() -> CoreDependenciesBuilder {
        CoreDependenciesBuilder::default()
    }
}

/// Builder that reports which required collaborator is missing.
#[derive(Default)]
pub struct CoreDependenciesBuilder {
    session_store: Option<Arc<dyn SessionStore>>,
    cipher: Option<Arc<dyn TokenCipher>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    audit_log: Option<Arc<dyn AuditLog>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    clock: Option<Arc<dyn Clock>>,
    event_bus: Option<EventBus>,
}

impl CoreDependenciesBuilder {
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn TokenCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn audit_log(mut self, audit_log: Arc<dyn AuditLog>) -> Self {
        self.audit_log = Some(audit_log);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<CoreDependencies> {
        let session_store = self.session_store.ok_or_else(|| CoreError::CapabilityMissing {
            capability: "SessionStore".to_string(),
            message: "No session store provided. \
                      Enable the desktop-shims feature or inject one."
                .to_string(),
        })?;
        let cipher = self.cipher.ok_or_else(|| CoreError::CapabilityMissing {
            capability: "TokenCipher".to_string(),
            message: "No token cipher provided. Tokens cannot be stored unencrypted.".to_string(),
        })?;

        let mut deps = CoreDependencies::new(session_store, cipher);
        deps.refresher = self.refresher;
        if let Some(audit_log) = self.audit_log {
            deps.audit_log = audit_log;
        }
        if let Some(cache_store) = self.cache_store {
            deps.cache_store = cache_store;
        }
        if let Some(clock) = self.clock {
            deps.clock = clock;
        }
        if let Some(event_bus) = self.event_bus {
            deps.event_bus = event_bus;
        }
        Ok(deps)
    }
}

#[cfg(feature = "desktop-shims")]
pub use desktop::DesktopOptions;

#[cfg(feature = "desktop-shims")]
mod desktop {
    use super::*;
    use bridge_desktop::{ReqwestHttpClient, SqliteSessionStore};
    use core_auth::{AesGcmTokenCipher, OAuthRefreshClient, OAuthRefreshConfig};
    use std::path::PathBuf;

    /// Inputs for wiring the desktop adapters.
    #[derive(Debug, Clone)]
    pub struct DesktopOptions {
        /// SQLite database holding serialized sessions
        pub session_db: PathBuf,
        /// Base64 AES-256 key for tokens at rest
        pub token_key: String,
        /// Token endpoint used for OIDC refreshes
        pub oauth: Option<OAuthRefreshConfig>,
    }

    impl CoreDependencies {
        /// Wire `SqliteSessionStore`, `AesGcmTokenCipher` and, when an OAuth
        /// endpoint is configured, an `OAuthRefreshClient` over reqwest.
        pub async fn desktop(options: DesktopOptions) -> Result<Self> {
            let store = SqliteSessionStore::new(options.session_db).await?;
            let cipher = AesGcmTokenCipher::from_base64(&options.token_key)?;

            let mut deps = Self::new(Arc::new(store), Arc::new(cipher));
            if let Some(oauth) = options.oauth {
                let http = ReqwestHttpClient::new()?;
                deps.refresher = Some(Arc::new(OAuthRefreshClient::new(oauth, Arc::new(http))));
            }
            Ok(deps)
        }
    }
}
