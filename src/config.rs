use crate::ml::encoder::UnseenCategoryPolicy;
use crate::ml::gbdt::BoostingParams;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const MODEL_FILE_NAME: &str = "latest_model.bin";
pub const METADATA_FILE_NAME: &str = "model_metadata.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fraction of rows held out for validation.
    pub test_size: f64,
    pub random_state: u64,
    pub min_data_count: usize,
    pub remove_outliers: bool,
    pub outlier_n_std: f64,
    pub unseen_categories: UnseenCategoryPolicy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_state: 42,
            min_data_count: 100,
            remove_outliers: true,
            outlier_n_std: 3.0,
            unseen_categories: UnseenCategoryPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub model_dir: PathBuf,
    /// Percent; listings at or above this discount are bargains.
    pub min_discount_rate: f64,
    pub bargain_limit: usize,
    pub retention_days: i64,
    /// Re-score the store on this interval; run once and exit when unset.
    pub rescore_interval_seconds: Option<u64>,
    /// Synthetic listings to seed an empty store with.
    pub sample_listings: usize,
    pub training: TrainingConfig,
    pub boosting: BoostingParams,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/properties.db"),
            model_dir: PathBuf::from("data/models"),
            min_discount_rate: 20.0,
            bargain_limit: 100,
            retention_days: 365,
            rescore_interval_seconds: None,
            sample_listings: 0,
            training: TrainingConfig::default(),
            boosting: BoostingParams::default(),
        }
    }
}

impl AppConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILE_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.model_dir.join(METADATA_FILE_NAME)
    }
}

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "min_discount_rate": 15.0,
                "training": { "min_data_count": 50, "unseen_categories": "reserve_bucket" },
                "boosting": { "n_estimators": 200 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.min_discount_rate, 15.0);
        assert_eq!(config.bargain_limit, 100);
        assert_eq!(config.training.min_data_count, 50);
        assert_eq!(config.training.test_size, 0.2);
        assert_eq!(config.training.unseen_categories, UnseenCategoryPolicy::ReserveBucket);
        assert_eq!(config.boosting.n_estimators, 200);
        assert_eq!(config.boosting.max_depth, 5);
        assert_eq!(config.model_path(), PathBuf::from("data/models/latest_model.bin"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_config("definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
