//! Configuration for the F1 prediction service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::Hyperparameters;
use crate::pipeline::TrainingOptions;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding ingested session rows
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Directory of per-race CSV session exports
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/f1.db")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("data/sessions")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            sessions_dir: default_sessions_dir(),
        }
    }
}

/// Raw session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache/sessions")
}

fn default_ttl_hours() -> i64 {
    24 * 7
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

/// Model registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_dir")]
    pub dir: PathBuf,
}

fn default_registry_dir() -> PathBuf {
    PathBuf::from("data/models")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: default_registry_dir(),
        }
    }
}

/// Feature engineering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Number of most recent races in rolling aggregates
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
}

fn default_rolling_window() -> usize {
    5
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rolling_window: default_rolling_window(),
        }
    }
}

/// Train/test split configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            seed: default_seed(),
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    /// Unlimited when absent
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Abandon training after this many seconds; nothing is published.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_ensemble_size() -> usize {
    100
}

fn default_min_samples_leaf() -> usize {
    1
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            ensemble_size: default_ensemble_size(),
            random_seed: default_seed(),
            max_depth: None,
            min_samples_leaf: default_min_samples_leaf(),
            timeout_secs: None,
        }
    }
}

impl TrainingConfig {
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            ensemble_size: self.ensemble_size,
            random_seed: self.random_seed,
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file.
    ///
    /// `file` replaces the optional `./config.*` lookup.
    pub fn load_from(file: Option<&Path>) -> anyhow::Result<Self> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(file_source)
            // Override with environment variables (F1__TRAINING__ENSEMBLE_SIZE, etc.)
            .add_source(
                config::Environment::with_prefix("F1")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: Self = config.try_deserialize()?;
        app.training_options().validate()?;
        Ok(app)
    }

    pub fn training_options(&self) -> TrainingOptions {
        TrainingOptions {
            rolling_window: self.features.rolling_window,
            test_fraction: self.dataset.test_fraction,
            split_seed: self.dataset.seed,
            hyperparameters: self.training.hyperparameters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.features.rolling_window, 5);
        assert_eq!(config.dataset.test_fraction, 0.2);
        assert_eq!(config.training.ensemble_size, 100);
        assert_eq!(config.training.timeout_secs, None);

        let options = config.training_options();
        assert_eq!(options, TrainingOptions::default());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f1.toml");
        std::fs::write(
            &path,
            r#"
            [features]
            rolling_window = 3

            [training]
            ensemble_size = 10
            max_depth = 6
            timeout_secs = 120
            "#,
        )
        .unwrap();

        let config = AppConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.features.rolling_window, 3);
        assert_eq!(config.training.ensemble_size, 10);
        assert_eq!(config.training.max_depth, Some(6));
        assert_eq!(config.training.random_seed, 42);
        assert_eq!(config.training.timeout_secs, Some(120));
        assert_eq!(config.dataset.seed, 42);
    }

    #[test]
    fn test_zero_rolling_window_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f1.toml");
        std::fs::write(&path, "[features]\nrolling_window = 0\n").unwrap();

        let err = AppConfig::load_from(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("rolling_window"));
    }
}
