//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and server hosts.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `SessionStore` using a SQLite table keyed by session id
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteSessionStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let sessions = SqliteSessionStore::new("data/sessions.db".into()).await?;
//!
//!     // Hand both to CoreDependencies
//!     Ok(())
//! }
//! ```

mod http;
mod session_store;

pub use http::ReqwestHttpClient;
pub use session_store::SqliteSessionStore;
