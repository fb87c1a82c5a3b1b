//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-gateway`, `core-auth`). Host
//! applications can depend on `cratedigger` and enable the documented features
//! without needing to wire each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service as service;

#[cfg(feature = "gateway")]
pub use core_gateway as gateway;

#[cfg(feature = "auth")]
pub use core_auth as auth;
