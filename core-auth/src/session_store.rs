//! Session Persistence
//!
//! Typed access to the web layer's [`SessionStore`]. Sessions are encoded as
//! JSON; the store only ever sees opaque bytes.
//!
//! ## Security
//!
//! - Session contents are never logged; token fields are ciphertexts anyway
//! - Undecodable sessions are deleted on read so a corrupted record cannot
//!   keep a half-valid identity alive

use crate::error::{AuthError, Result};
use crate::types::Session;
use bridge_traits::storage::SessionStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// JSON codec over a [`SessionStore`].
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn SessionStore>,
}

impl SessionRepository {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Load a session.
    ///
    /// Returns `Ok(None)` if the session does not exist. A session that
    /// cannot be decoded is deleted and reported as
    /// [`AuthError::SessionCorrupted`].
    pub async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let data = self.store.load(session_id).await.map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to read session");
            AuthError::Storage(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(session_id = %session_id, "Session not found");
            return Ok(None);
        };

        match serde_json::from_slice::<Session>(&data) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to decode session, it may be corrupted"
                );

                if let Err(delete_err) = self.store.destroy(session_id).await {
                    warn!(
                        session_id = %session_id,
                        error = %delete_err,
                        "Failed to delete corrupted session"
                    );
                }

                Err(AuthError::SessionCorrupted {
                    session_id: session_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Atomically persist `session`.
    pub async fn save(&self, session: &Session) -> Result<()> {
        let data = serde_json::to_vec(session).map_err(|e| AuthError::SessionSaveFailed {
            session_id: session.id.clone(),
            reason: format!("encoding failed: {}", e),
        })?;

        self.store
            .save(&session.id, &data)
            .await
            .map_err(|e| {
                warn!(session_id = %session.id, error = %e, "Failed to save session");
                AuthError::SessionSaveFailed {
                    session_id: session.id.clone(),
                    reason: e.to_string(),
                }
            })?;

        debug!(session_id = %session.id, "Session saved");
        Ok(())
    }

    /// Delete a session. Succeeds if it is already gone.
    pub async fn destroy(&self, session_id: &str) -> Result<()> {
        self.store.destroy(session_id).await.map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to destroy session");
            AuthError::Storage(e.to_string())
        })
    }
}

impl std::fmt::Debug for SessionRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRepository").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionTokenSet;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory session store for tests
    #[derive(Default)]
    struct MockSessionStore {
        data: Mutex<HashMap<String, Vec<u8>>>,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for MockSessionStore {
        async fn load(&self, session_id: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.data.lock().unwrap().get(session_id).cloned())
        }

        async fn save(&self, session_id: &str, data: &[u8]) -> BridgeResult<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(BridgeError::StorageError("disk full".to_string()));
            }
            self.data
                .lock()
                .unwrap()
                .insert(session_id.to_string(), data.to_vec());
            Ok(())
        }

        async fn destroy(&self, session_id: &str) -> BridgeResult<()> {
            self.data.lock().unwrap().remove(session_id);
            Ok(())
        }
    }

    fn session() -> Session {
        Session::oidc("s1", SessionTokenSet::new("enc-access").with_refresh_token("enc-refresh"))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let repo = SessionRepository::new(Arc::new(MockSessionStore::default()));

        repo.save(&session()).await.unwrap();
        let loaded = repo.load("s1").await.unwrap();

        assert_eq!(loaded, Some(session()));
    }

    #[tokio::test]
    async fn test_load_missing() {
        let repo = SessionRepository::new(Arc::new(MockSessionStore::default()));
        assert_eq!(repo.load("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupted_session_is_deleted() {
        let store = Arc::new(MockSessionStore::default());
        store.save("s1", b"{not json").await.unwrap();
        let repo = SessionRepository::new(store.clone());

        let result = repo.load("s1").await;

        assert!(matches!(result, Err(AuthError::SessionCorrupted { .. })));
        assert!(!store.exists("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_failure_is_reported() {
        let store = Arc::new(MockSessionStore::default());
        store.fail_saves.store(true, Ordering::SeqCst);
        let repo = SessionRepository::new(store);

        let err = repo.save(&session()).await.unwrap_err();

        assert!(matches!(err, AuthError::SessionSaveFailed { .. }));
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let repo = SessionRepository::new(Arc::new(MockSessionStore::default()));
        repo.save(&session()).await.unwrap();

        repo.destroy("s1").await.unwrap();
        repo.destroy("s1").await.unwrap();

        assert_eq!(repo.load("s1").await.unwrap(), None);
    }
}
