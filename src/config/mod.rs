//! Configuration management module
//!
//! Provides YAML-based configuration, loaded from a file and then
//! overlaid with environment-variable overrides.

mod config;

pub use config::*;
