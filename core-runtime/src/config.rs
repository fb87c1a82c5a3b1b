//! # Core Configuration Module
//!
//! Numeric tunables for the resilience core: scheduler concurrency, cache
//! TTLs, lockout tiers and the token refresh window.
//!
//! ## Overview
//!
//! `CoreConfig` is assembled with a builder and validated fail-fast on
//! `build()`, so a misconfigured deployment refuses to start instead of
//! running with a lockout table that never triggers or a zero concurrency
//! limit that deadlocks every actor.
//!
//! Collaborators (session store, cipher, audit log, HTTP client) are not part
//! of this struct; they are injected into `core-service` alongside it.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .scheduler_concurrency(2)
//!     .namespace_ttl("artist-search", Duration::from_secs(600))
//!     .token_lead_window(Duration::from_secs(120))
//!     .build()?;
//! ```
//!
//! ## Environment
//!
//! [`CoreConfig::from_env`] layers `CRATEDIGGER_*` variables over the defaults:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `CRATEDIGGER_SCHEDULER_CONCURRENCY` | in-flight tasks per actor |
//! | `CRATEDIGGER_CACHE_TTL_SECS` | default cache TTL |
//! | `CRATEDIGGER_CACHE_TTL_<NAMESPACE>_SECS` | TTL for one namespace (`_` becomes `-`, lowercased) |
//! | `CRATEDIGGER_TOKEN_REFRESH_LEAD_SECS` | refresh lead window |
//! | `CRATEDIGGER_TOKEN_REFRESH_TIMEOUT_SECS` | bound on a single refresh call |
//! | `CRATEDIGGER_LOGIN_PATH` | login page used in redirects |
//! | `CRATEDIGGER_MAINTENANCE_INTERVAL_SECS` | cleanup period |

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

const ENV_PREFIX: &str = "CRATEDIGGER_";
const MAX_CONCURRENCY: usize = 64;

/// Per-actor scheduling limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tasks allowed in flight for one actor at a time
    pub max_concurrent_per_actor: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_actor: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENCY).contains(&self.max_concurrent_per_actor) {
            return Err(Error::Config(format!(
                "Scheduler concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.max_concurrent_per_actor
            )));
        }
        Ok(())
    }
}

/// Response cache lifetimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for namespaces without an override
    pub default_ttl: Duration,
    /// Per-namespace overrides
    pub namespace_ttls: HashMap<String, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            namespace_ttls: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// TTL applied to `namespace` when a caller does not pass one explicitly.
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.namespace_ttls
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(Error::Config(
                "Default cache TTL must be greater than zero".to_string(),
            ));
        }
        if let Some((namespace, _)) = self.namespace_ttls.iter().find(|(_, ttl)| ttl.is_zero()) {
            return Err(Error::Config(format!(
                "Cache TTL for namespace '{}' must be greater than zero",
                namespace
            )));
        }
        Ok(())
    }
}

/// One step of the progressive lockout table: reaching exactly `threshold`
/// consecutive failures locks the identifier for `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutTier {
    pub threshold: u32,
    pub delay: Duration,
}

impl LockoutTier {
    pub const fn new(threshold: u32, delay_secs: u64) -> Self {
        Self {
            threshold,
            delay: Duration::from_secs(delay_secs),
        }
    }
}

/// Brute-force protection tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutConfig {
    /// Ordered by threshold, strictly increasing in both threshold and delay
    pub tiers: Vec<LockoutTier>,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                LockoutTier::new(3, 30),
                LockoutTier::new(5, 120),
                LockoutTier::new(7, 300),
                LockoutTier::new(10, 900),
                LockoutTier::new(15, 1800),
                LockoutTier::new(20, 3600),
            ],
        }
    }
}

impl LockoutConfig {
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.tiers.first() else {
            return Err(Error::Config(
                "Lockout table must contain at least one tier".to_string(),
            ));
        };
        if first.threshold == 0 || first.delay.is_zero() {
            return Err(Error::Config(
                "Lockout tiers need a positive threshold and delay".to_string(),
            ));
        }
        for pair in self.tiers.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.threshold <= prev.threshold || next.delay <= prev.delay {
                return Err(Error::Config(format!(
                    "Lockout tiers must strictly increase: tier at {} failures follows tier at {}",
                    next.threshold, prev.threshold
                )));
            }
        }
        Ok(())
    }
}

/// Session token refresh behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRefreshConfig {
    /// Refresh once the access token expires within this window
    pub lead_window: Duration,
    /// Upper bound on one call to the token endpoint
    pub refresh_timeout: Duration,
    /// Login page that navigations are redirected to after a terminal failure
    pub login_path: String,
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            lead_window: Duration::from_secs(300),
            refresh_timeout: Duration::from_secs(30),
            login_path: "/auth/login".to_string(),
        }
    }
}

impl TokenRefreshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.refresh_timeout.is_zero() {
            return Err(Error::Config(
                "Token refresh timeout must be greater than zero".to_string(),
            ));
        }
        if !self.login_path.starts_with('/') {
            return Err(Error::Config(format!(
                "Login path must be an absolute path, got '{}'",
                self.login_path
            )));
        }
        Ok(())
    }
}

/// Configuration for the resilience core.
///
/// Use [`CoreConfig::builder`] or [`CoreConfig::from_env`] to construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub lockout: LockoutConfig,
    pub token_refresh: TokenRefreshConfig,
    /// Period of the background cleanup task
    pub maintenance_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            cache: CacheConfig::default(),
            lockout: LockoutConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates every section and returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.cache.validate()?;
        self.lockout.validate()?;
        self.token_refresh.validate()?;

        if self.maintenance_interval.is_zero() {
            return Err(Error::Config(
                "Maintenance interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Defaults overridden by `CRATEDIGGER_*` process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by `CRATEDIGGER_*` entries in `vars`.
    ///
    /// Unrelated variables are ignored. Unknown `CRATEDIGGER_*` names are
    /// logged and ignored; malformed values are errors.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = Self::builder();

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();

            builder = match name {
                "SCHEDULER_CONCURRENCY" => {
                    builder.scheduler_concurrency(parse_number(key.as_ref(), value)? as usize)
                }
                "CACHE_TTL_SECS" => builder.cache_default_ttl(parse_secs(key.as_ref(), value)?),
                "TOKEN_REFRESH_LEAD_SECS" => {
                    builder.token_lead_window(parse_secs(key.as_ref(), value)?)
                }
                "TOKEN_REFRESH_TIMEOUT_SECS" => {
                    builder.refresh_timeout(parse_secs(key.as_ref(), value)?)
                }
                "LOGIN_PATH" => builder.login_path(value),
                "MAINTENANCE_INTERVAL_SECS" => {
                    builder.maintenance_interval(parse_secs(key.as_ref(), value)?)
                }
                other => match namespace_from_ttl_var(other) {
                    Some(namespace) => {
                        builder.namespace_ttl(namespace, parse_secs(key.as_ref(), value)?)
                    }
                    None => {
                        tracing::warn!(variable = key.as_ref(), "Ignoring unknown configuration variable");
                        builder
                    }
                },
            };
        }

        builder.build()
    }
}

/// `CACHE_TTL_ARTIST_SEARCH_SECS` -> `artist-search`
fn namespace_from_ttl_var(name: &str) -> Option<String> {
    let middle = name.strip_prefix("CACHE_TTL_")?.strip_suffix("_SECS")?;
    if middle.is_empty() {
        return None;
    }
    Some(middle.to_ascii_lowercase().replace('_', "-"))
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|e| Error::Config(format!("{} must be a non-negative integer: {}", key, e)))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    parse_number(key, value).map(Duration::from_secs)
}

/// Builder for [`CoreConfig`]. Unset values keep their defaults.
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    pub fn scheduler_concurrency(mut self, limit: usize) -> Self {
        self.config.scheduler.max_concurrent_per_actor = limit;
        self
    }

    pub fn cache_default_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.default_ttl = ttl;
        self
    }

    /// Override the TTL for a single cache namespace.
    pub fn namespace_ttl(mut self, namespace: impl Into<String>, ttl: Duration) -> Self {
        self.config.cache.namespace_ttls.insert(namespace.into(), ttl);
        self
    }

    /// Replace the whole lockout table.
    pub fn lockout_tiers(mut self, tiers: Vec<LockoutTier>) -> Self {
        self.config.lockout.tiers = tiers;
        self
    }

    pub fn token_lead_window(mut self, window: Duration) -> Self {
        self.config.token_refresh.lead_window = window;
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.config.token_refresh.refresh_timeout = timeout;
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.config.token_refresh.login_path = path.into();
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<CoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
