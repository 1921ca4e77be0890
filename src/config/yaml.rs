//! YAML configuration parsing.
//!
//! Parses engine settings and the case catalog from YAML files.

use std::collections::HashSet;
use std::path::{Component, Path};

use crate::execution::ScriptKind;

use super::error::ConfigError;
use super::types::{CatalogConfig, EngineConfig, StorageConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load engine configuration from a file.
    pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_engine_config(&config)?;
        Ok(config)
    }

    /// Parse engine configuration from a YAML string.
    pub fn parse_engine_config(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        Self::validate_engine_config(&config)?;
        Ok(config)
    }

    /// Load a case catalog from a file.
    pub fn load_catalog_config(path: impl AsRef<Path>) -> Result<CatalogConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let config: CatalogConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_catalog_config(&config)?;
        Ok(config)
    }

    /// Parse a case catalog from a YAML string.
    pub fn parse_catalog_config(yaml: &str) -> Result<CatalogConfig, ConfigError> {
        let config: CatalogConfig = serde_yaml::from_str(yaml)?;
        Self::validate_catalog_config(&config)?;
        Ok(config)
    }

    fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.script_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "script_timeout_secs must be greater than zero".into(),
            ));
        }
        if config.worker_concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker_concurrency cannot be zero".into(),
            ));
        }
        if config.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue_capacity cannot be zero".into(),
            ));
        }
        if config.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "heartbeat_interval_secs must be greater than zero".into(),
            ));
        }
        if config.python.trim().is_empty() {
            return Err(ConfigError::MissingField("python".into()));
        }
        if config.shell.trim().is_empty() {
            return Err(ConfigError::MissingField("shell".into()));
        }
        if let StorageConfig::Sqlite { path } = &config.storage
            && path.trim().is_empty()
        {
            return Err(ConfigError::MissingField("storage.path".into()));
        }
        Ok(())
    }

    fn validate_catalog_config(config: &CatalogConfig) -> Result<(), ConfigError> {
        let mut category_names = HashSet::new();
        for category in &config.categories {
            if category.name.trim().is_empty() {
                return Err(ConfigError::MissingField("category name".into()));
            }
            if !category_names.insert(category.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate category: {}",
                    category.name
                )));
            }

            let mut case_names = HashSet::new();
            for case in &category.cases {
                if case.name.trim().is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "case name in category '{}'",
                        category.name
                    )));
                }
                if !case_names.insert(case.name.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "duplicate case '{}' in category '{}'",
                        case.name, category.name
                    )));
                }
                let escapes_root = case.script.is_absolute()
                    || case
                        .script
                        .components()
                        .any(|c| matches!(c, Component::ParentDir));
                if escapes_root {
                    return Err(ConfigError::InvalidConfig(format!(
                        "case '{}': script must stay inside the scripts dir",
                        case.name
                    )));
                }
                ScriptKind::detect(&case.script).map_err(|e| {
                    ConfigError::InvalidConfig(format!("case '{}': {}", case.name, e))
                })?;
            }
        }
        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::case::RiskLevel;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_engine_config_uses_defaults() {
        let config = YamlLoader::parse_engine_config("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.script_timeout(), Duration::from_secs(300));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.api.bind_addr(), "127.0.0.1:8565");
    }

    #[test]
    fn test_parse_engine_config() {
        let yaml = r#"
scripts_dir: /opt/checks
logs_dir: /var/log/secdet
script_timeout_secs: 60
worker_concurrency: 2
max_retries: 5
heartbeat_interval_secs: 10
storage:
  type: sqlite
  path: secdet.db
api:
  host: 0.0.0.0
  port: 9000
"#;
        let config = YamlLoader::parse_engine_config(yaml).unwrap();

        assert_eq!(config.scripts_dir, PathBuf::from("/opt/checks"));
        assert_eq!(config.script_timeout(), Duration::from_secs(60));
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.shell, "bash");
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: "secdet.db".into()
            }
        );
        assert_eq!(config.api.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_engine_config_rejects_zero_values() {
        for yaml in [
            "script_timeout_secs: 0",
            "worker_concurrency: 0",
            "queue_capacity: 0",
            "heartbeat_interval_secs: 0",
        ] {
            let err = YamlLoader::parse_engine_config(yaml).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidConfig(_)), "{}", yaml);
        }
    }

    #[test]
    fn test_engine_config_rejects_empty_sqlite_path() {
        let yaml = "storage:\n  type: sqlite\n  path: \"\"";
        let err = YamlLoader::parse_engine_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "storage.path"));
    }

    #[test]
    fn test_load_engine_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_retries: 1").unwrap();

        let config = YamlLoader::load_engine_config(file.path()).unwrap();
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let err = YamlLoader::load_engine_config("/nonexistent/secdet.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/secdet.yaml"));
    }

    #[test]
    fn test_bad_yaml_in_file_names_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "worker_concurrency: [").unwrap();

        let err = YamlLoader::load_engine_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::YamlFileError { .. }));
    }

    const CATALOG: &str = r#"
categories:
  - name: network
    sort_order: 0
    cases:
      - name: open ports
        risk_level: medium
        script: network/ports.py
        description: Scan common ports
      - name: telnet
        risk_level: high
        script: network/telnet.sh
        enabled: false
        fix_suggestion: Disable telnetd
  - name: web
    cases:
      - name: default creds
        risk_level: high
        script: web/creds.py
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = YamlLoader::parse_catalog_config(CATALOG).unwrap();

        assert_eq!(catalog.categories.len(), 2);
        let network = &catalog.categories[0];
        assert_eq!(network.sort_order, Some(0));
        assert_eq!(network.cases[0].risk_level, RiskLevel::Medium);
        assert!(network.cases[0].enabled);
        assert!(!network.cases[1].enabled);
        assert_eq!(catalog.categories[1].sort_order, None);
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let yaml = "categories:\n  - name: a\n  - name: a\n";
        assert!(matches!(
            YamlLoader::parse_catalog_config(yaml).unwrap_err(),
            ConfigError::InvalidConfig(_)
        ));

        let yaml = r#"
categories:
  - name: a
    cases:
      - {name: x, risk_level: low, script: x.sh}
      - {name: x, risk_level: low, script: y.sh}
"#;
        assert!(matches!(
            YamlLoader::parse_catalog_config(yaml).unwrap_err(),
            ConfigError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_catalog_rejects_bad_scripts() {
        for script in ["../escape.sh", "/etc/passwd.sh", "check.rb"] {
            let yaml = format!(
                "categories:\n  - name: a\n    cases:\n      - {{name: x, risk_level: low, script: \"{}\"}}\n",
                script
            );
            let err = YamlLoader::parse_catalog_config(&yaml).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidConfig(_)), "{}", script);
        }
    }

    #[test]
    fn test_catalog_rejects_unknown_risk_level() {
        let yaml = "categories:\n  - name: a\n    cases:\n      - {name: x, risk_level: severe, script: x.sh}\n";
        assert!(matches!(
            YamlLoader::parse_catalog_config(yaml).unwrap_err(),
            ConfigError::YamlError(_)
        ));
    }
}
