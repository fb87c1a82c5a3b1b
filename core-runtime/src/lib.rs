//! # Core Runtime Module
//!
//! Foundational infrastructure shared by the gateway and auth crates:
//! - Logging and tracing setup
//! - Configuration with fail-fast validation
//! - Event bus
//!
//! Nothing here knows about scheduling, caching or tokens; those crates
//! depend on this one for their ambient concerns.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
