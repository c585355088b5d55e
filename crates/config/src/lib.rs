//! Configuration module for RelayBox
//!
//! Handles loading configuration from TOML files, environment variable overrides,
//! and persisting refreshed file-service tokens.

pub mod config;
pub mod store;

pub use config::*;
pub use store::ConfigStore;
