use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Shared handle to an upstream failure. Every single-flight waiter on a key
/// receives a clone of the same handle.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Upstream fetch failed: {0}")]
    Fetch(SharedError),

    #[error("Cache parameters could not be encoded: {0}")]
    InvalidParams(String),

    #[error("Cached value could not be decoded: {0}")]
    Decode(String),

    #[error("Cache store error: {0}")]
    Store(String),
}

impl GatewayError {
    /// The upstream error if this is a fetch failure of type `E`.
    pub fn upstream<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            GatewayError::Fetch(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, GatewayError::Fetch(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
