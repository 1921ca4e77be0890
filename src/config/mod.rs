//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the engine and the
//! case catalog.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{SeedSummary, build_runner, load_catalog, seed_catalog};
pub use error::ConfigError;
pub use types::{
    ApiConfig, CaseConfig, CatalogConfig, CategoryConfig, EngineConfig, StorageConfig,
};
pub use yaml::YamlLoader;
