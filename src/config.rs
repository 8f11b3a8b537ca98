//! Pipeline configuration.
//!
//! Every directory, file name and hyper-parameter used by the three stages
//! lives here as a named field with an enumerated default. Stages receive a
//! `ForecastConfig` at construction; nothing reads module-level constants.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

/// Top-level configuration shared by all stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub paths: PathsConfig,
    pub preprocess: PreprocessConfig,
    pub training: TrainingConfig,
    pub prediction: PredictionConfig,
}

/// Input, intermediate and output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub model_dir: PathBuf,
    pub sales_file: String,
    pub calendar_file: String,
    pub prices_file: String,
    pub long_table_file: String,
    pub predictions_file: String,
    pub model_text_file: String,
    pub model_binary_file: String,
    pub feature_names_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("uploads"),
            processed_dir: PathBuf::from("data/processed"),
            model_dir: PathBuf::from("models"),
            sales_file: "sales_train_validation.csv".to_string(),
            calendar_file: "calendar.csv".to_string(),
            prices_file: "sell_prices.csv".to_string(),
            long_table_file: "m5_preprocessed_sample.csv".to_string(),
            predictions_file: "predictions.csv".to_string(),
            model_text_file: "demand_model.json".to_string(),
            model_binary_file: "demand_model.bin".to_string(),
            feature_names_file: "feature_names.json".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn sales_path(&self) -> PathBuf {
        self.input_dir.join(&self.sales_file)
    }

    pub fn calendar_path(&self) -> PathBuf {
        self.input_dir.join(&self.calendar_file)
    }

    pub fn prices_path(&self) -> PathBuf {
        self.input_dir.join(&self.prices_file)
    }

    pub fn long_table_path(&self) -> PathBuf {
        self.processed_dir.join(&self.long_table_file)
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.processed_dir.join(&self.predictions_file)
    }

    pub fn model_text_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_text_file)
    }

    pub fn model_binary_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_binary_file)
    }

    pub fn feature_names_path(&self) -> PathBuf {
        self.model_dir.join(&self.feature_names_file)
    }
}

/// Preprocessing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Cap on the number of product rows loaded (None = all)
    pub max_products: Option<usize>,
    /// Calendar event columns to label-encode when present
    pub event_columns: Vec<String>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_products: Some(200),
            event_columns: vec![
                "event_name_1".to_string(),
                "event_type_1".to_string(),
                "event_name_2".to_string(),
                "event_type_2".to_string(),
            ],
        }
    }
}

/// Training split policy and boosting hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub target_column: String,
    /// Trailing window held out for validation (days)
    pub validation_days: i64,
    /// Validation share for the random split fallback
    pub random_validation_fraction: f64,
    pub seed: u64,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_rounds: usize,
    pub early_stopping_rounds: usize,
    pub min_data_in_leaf: usize,
    pub lambda_l2: f64,
    /// Row subsampling per round (1.0 = no bagging)
    pub bagging_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            target_column: "demand".to_string(),
            validation_days: 28,
            random_validation_fraction: 0.2,
            seed: 42,
            learning_rate: 0.05,
            num_leaves: 31,
            max_rounds: 100,
            early_stopping_rounds: 10,
            min_data_in_leaf: 20,
            lambda_l2: 0.0,
            bagging_fraction: 1.0,
        }
    }
}

/// Prediction defaults and heuristic constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub default_start: NaiveDate,
    pub default_end: NaiveDate,
    pub default_price: f64,
    pub preview_limit: usize,
    pub base_confidence: f64,
    pub confidence_noise_sd: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    /// Historical demand mean above which scale correction is considered
    pub scale_demand_threshold: f64,
    /// Prediction mean below which scale correction fires
    pub scale_prediction_threshold: f64,
    pub fallback_store: String,
    pub fallback_category: String,
    pub history_placeholder: String,
    /// Fixed seed for the confidence noise (None = entropy)
    pub confidence_seed: Option<u64>,
    pub model_version: String,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            default_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            default_end: NaiveDate::from_ymd_opt(2024, 1, 7).unwrap_or_default(),
            default_price: 10.0,
            preview_limit: 20,
            base_confidence: 0.85,
            confidence_noise_sd: 0.05,
            min_confidence: 0.7,
            max_confidence: 0.95,
            scale_demand_threshold: 10.0,
            scale_prediction_threshold: 1.0,
            fallback_store: "CA_1".to_string(),
            fallback_category: "HOBBIES".to_string(),
            history_placeholder: "UNKNOWN".to_string(),
            confidence_seed: None,
            model_version: "GBDT_v1".to_string(),
        }
    }
}

impl ForecastConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ForecastResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ForecastError::missing_file(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: ForecastConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rebase relative directories onto `base`.
    pub fn with_base_dir<P: AsRef<Path>>(mut self, base: P) -> Self {
        let base = base.as_ref();
        let rebase = |dir: &PathBuf| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                base.join(dir)
            }
        };
        self.paths.input_dir = rebase(&self.paths.input_dir);
        self.paths.processed_dir = rebase(&self.paths.processed_dir);
        self.paths.model_dir = rebase(&self.paths.model_dir);
        self
    }

    /// Reject hyper-parameters the trainer cannot work with.
    pub fn validate(&self) -> ForecastResult<()> {
        let t = &self.training;
        if !(t.learning_rate > 0.0) {
            return Err(ForecastError::invalid_param("learning_rate", "must be positive"));
        }
        if t.num_leaves < 2 {
            return Err(ForecastError::invalid_param("num_leaves", "must be at least 2"));
        }
        if t.max_rounds == 0 {
            return Err(ForecastError::invalid_param("max_rounds", "must be positive"));
        }
        if t.min_data_in_leaf == 0 {
            return Err(ForecastError::invalid_param("min_data_in_leaf", "must be positive"));
        }
        if !(t.bagging_fraction > 0.0 && t.bagging_fraction <= 1.0) {
            return Err(ForecastError::invalid_param("bagging_fraction", "must be in (0, 1]"));
        }
        if !(t.random_validation_fraction > 0.0 && t.random_validation_fraction < 1.0) {
            return Err(ForecastError::invalid_param(
                "random_validation_fraction",
                "must be in (0, 1)",
            ));
        }
        if t.validation_days < 0 {
            return Err(ForecastError::invalid_param("validation_days", "must not be negative"));
        }
        let p = &self.prediction;
        if p.min_confidence > p.max_confidence {
            return Err(ForecastError::invalid_param(
                "min_confidence",
                "must not exceed max_confidence",
            ));
        }
        Ok(())
    }
}
