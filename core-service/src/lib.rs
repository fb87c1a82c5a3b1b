//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided collaborators (session store, token cipher,
//! token refresher, audit log) and a validated [`CoreConfig`] into the
//! resilience core. Desktop and server hosts typically enable the
//! `desktop-shims` feature, which depends on `bridge-desktop` for a SQLite
//! session store and a reqwest-backed token refresh client.
//!
//! ```ignore
//! let core = CoreService::new(CoreConfig::from_env()?, deps)?;
//! let _maintenance = core.spawn_maintenance();
//!
//! if let LoginGate::Locked { retry_after_secs } = core.check_login(&actor) {
//!     return too_many_attempts(retry_after_secs);
//! }
//! ```

pub mod dependencies;
pub mod error;
pub mod login;
pub mod maintenance;

pub use dependencies::{CoreDependencies, CoreDependenciesBuilder};
#[cfg(feature = "desktop-shims")]
pub use dependencies::DesktopOptions;
pub use error::{CoreError, Result};
pub use login::LoginGate;
pub use maintenance::{MaintenanceHandle, MaintenanceReport};

use std::sync::Arc;

use core_auth::{ProgressiveLockout, TokenLifecycleManager};
use core_gateway::{RequestScheduler, ResponseCache};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use tracing::info;

/// Primary façade exposed to host applications.
///
/// Cloning is cheap; clones share the scheduler, cache, lockout table and
/// refresh locks.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    scheduler: Arc<RequestScheduler>,
    cache: Arc<ResponseCache>,
    lockout: Arc<ProgressiveLockout>,
    tokens: Arc<TokenLifecycleManager>,
    event_bus: EventBus,
}

impl CoreService {
    /// Validate `config` and build every component from `deps`.
    pub fn new(config: CoreConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;

        let CoreDependencies {
            session_store,
            cipher,
            refresher,
            audit_log,
            cache_store,
            clock,
            event_bus,
        } = deps;

        let scheduler = RequestScheduler::new(&config.scheduler);

        let cache = ResponseCache::with_store(config.cache.clone(), cache_store, Arc::clone(&clock))
            .with_event_bus(event_bus.clone());

        let lockout = ProgressiveLockout::with_clock(&config.lockout, Arc::clone(&clock))
            .with_event_bus(event_bus.clone());

        let mut tokens = TokenLifecycleManager::new(config.token_refresh.clone(), session_store, cipher)
            .with_audit_log(audit_log)
            .with_clock(clock)
            .with_event_bus(event_bus.clone());
        if let Some(refresher) = refresher {
            tokens = tokens.with_refresher(refresher);
        }

        info!(
            concurrency = config.scheduler.max_concurrent_per_actor,
            lockout_tiers = config.lockout.tiers.len(),
            lead_window_secs = config.token_refresh.lead_window.as_secs(),
            "Core service initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            scheduler: Arc::new(scheduler),
            cache: Arc::new(cache),
            lockout: Arc::new(lockout),
            tokens: Arc::new(tokens),
            event_bus,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn lockout(&self) -> &ProgressiveLockout {
        &self.lockout
    }

    pub fn tokens(&self) -> &TokenLifecycleManager {
        &self.tokens
    }

    /// Subscribe to auth and gateway events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Convenience bootstrapper for hosts using the desktop adapters.
///
/// ```ignore
/// use core_service::{bootstrap_desktop, DesktopOptions};
///
/// let core = bootstrap_desktop(CoreConfig::from_env()?, DesktopOptions {
///     session_db: "data/sessions.db".into(),
///     token_key: std::env::var("TOKEN_KEY")?,
///     oauth: None,
/// }).await?;
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(config: CoreConfig, options: DesktopOptions) -> Result<CoreService> {
    let deps = CoreDependencies::desktop(options).await?;
    CoreService::new(config, deps)
}
