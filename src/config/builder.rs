//! Runtime objects built from configuration.
//!
//! Turns an [`EngineConfig`] into a [`ScriptRunner`] and seeds a
//! [`CatalogConfig`] into storage.

use std::path::Path;

use crate::core::case::{Case, SortOrder};
use crate::execution::ScriptRunner;
use crate::storage::{Storage, StorageError};

use super::error::ConfigError;
use super::types::{CatalogConfig, EngineConfig};
use super::yaml::YamlLoader;

/// Counts from a catalog seeding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub categories_created: usize,
    pub cases_created: usize,
    /// Cases already present under the same category and name.
    pub cases_existing: usize,
}

/// Build the script runner described by the engine config.
pub fn build_runner(config: &EngineConfig) -> ScriptRunner {
    ScriptRunner::builder(&config.scripts_dir, &config.logs_dir)
        .timeout(config.script_timeout())
        .python(&config.python)
        .shell(&config.shell)
        .build()
}

/// Insert the catalog's categories and cases.
///
/// Entries that already exist by name are kept as stored, so seeding the same
/// catalog twice is harmless.
pub async fn seed_catalog<S: Storage + ?Sized>(
    storage: &S,
    catalog: &CatalogConfig,
) -> Result<SeedSummary, ConfigError> {
    let mut summary = SeedSummary::default();

    for category_config in &catalog.categories {
        let category = match storage
            .save_category(&category_config.name, SortOrder::from(category_config.sort_order))
            .await
        {
            Ok(category) => {
                summary.categories_created += 1;
                category
            }
            Err(StorageError::DuplicateKey(_)) => storage
                .list_categories()
                .await?
                .into_iter()
                .find(|c| c.name == category_config.name)
                .ok_or_else(|| StorageError::NotFound(category_config.name.clone()))?,
            Err(e) => return Err(e.into()),
        };

        for case_config in &category_config.cases {
            let mut case = Case::new(
                &case_config.name,
                category.id,
                case_config.risk_level,
                &case_config.script,
            )
            .with_enabled(case_config.enabled);
            case.description = case_config.description.clone();
            case.fix_suggestion = case_config.fix_suggestion.clone();

            match storage.save_case(case).await {
                Ok(_) => summary.cases_created += 1,
                Err(StorageError::DuplicateKey(_)) => summary.cases_existing += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    tracing::info!(
        categories = summary.categories_created,
        cases = summary.cases_created,
        existing = summary.cases_existing,
        "catalog seeded"
    );
    Ok(summary)
}

/// Load a catalog file and seed it into storage.
pub async fn load_catalog<S: Storage + ?Sized>(
    path: impl AsRef<Path>,
    storage: &S,
) -> Result<SeedSummary, ConfigError> {
    let catalog = YamlLoader::load_catalog_config(path)?;
    seed_catalog(storage, &catalog).await
}
