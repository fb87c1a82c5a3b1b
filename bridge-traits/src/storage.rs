//! Session Storage Abstraction
//!
//! The web layer owns session persistence. The core only needs to read a
//! session, write a mutated one back, and know whether that write is durable.

use async_trait::async_trait;

use crate::error::Result;

/// Session store trait
///
/// Sessions are exchanged as opaque serialized bytes keyed by session id; the
/// core decides the encoding. Implementations:
/// - Desktop/server: SQLite (`bridge-desktop::SqliteSessionStore`)
/// - Tests: in-memory maps
///
/// # Contract
///
/// `save` is atomic: when it returns `Ok(())` the new bytes are durably
/// stored and visible to the next `load`; when it returns `Err` the previous
/// value (if any) is still in place.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SessionStore;
///
/// async fn touch(store: &dyn SessionStore, id: &str) -> Result<()> {
///     if let Some(bytes) = store.load(id).await? {
///         store.save(id, &bytes).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the current serialized session, `None` if it does not exist.
    async fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the serialized session.
    async fn save(&self, session_id: &str, data: &[u8]) -> Result<()>;

    /// Remove the session. Idempotent.
    async fn destroy(&self, session_id: &str) -> Result<()>;

    /// Check whether a session exists without decoding it.
    async fn exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.load(session_id).await?.is_some())
    }
}
