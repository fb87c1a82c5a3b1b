//! Default audit sink.

use async_trait::async_trait;
use bridge_traits::audit::{AuditEntry, AuditLog};
use bridge_traits::error::Result as BridgeResult;
use tracing::warn;

/// Writes audit entries to the `audit` tracing target.
///
/// Route that target to its own file or collector with an `EnvFilter`
/// directive such as `audit=info`.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, entry: AuditEntry) -> BridgeResult<()> {
        warn!(
            target: "audit",
            event = %entry.event,
            identity = entry.identity.as_deref().unwrap_or("-"),
            ip = entry.ip.as_deref().unwrap_or("-"),
            user_agent = entry.user_agent.as_deref().unwrap_or("-"),
            reason = %entry.reason,
            timestamp = %entry.timestamp.to_rfc3339(),
            "Security event"
        );
        Ok(())
    }
}
