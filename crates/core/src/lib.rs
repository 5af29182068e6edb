//! Shared foundation for the eduVPN discovery client.
//!
//! This crate holds the pieces every other crate in the workspace leans on:
//! the startup configuration, logging initialization, and the configuration error
//! type. It performs no network or cryptographic work itself.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    CacheConfig, Config, DiscoveryConfig, TransportConfig, DEFAULT_CACHE_CAPACITY_BYTES,
    DEFAULT_TIMEOUT_SECS,
};
pub use error::ConfigError;
