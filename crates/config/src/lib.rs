//! Configuration module for videer
//!
//! Handles loading configuration from TOML files and environment variable overrides,
//! plus the named quality profiles.

pub mod config;
pub mod presets;

pub use config::*;
pub use presets::QualityProfile;
