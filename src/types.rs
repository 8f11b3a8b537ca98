//! Core data structures shared between the pipeline stages.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::PredictionConfig;
use crate::error::{ForecastError, ForecastResult};

/// Identity columns of the wide sales table, carried through the reshape.
pub const IDENTITY_COLUMNS: [&str; 6] = ["id", "item_id", "dept_id", "cat_id", "store_id", "state_id"];

/// Prefix of the per-day demand columns in the wide sales table.
pub const DAY_COLUMN_PREFIX: &str = "d_";

/// Feature names in training order.
pub const FEATURE_NAMES: [&str; 4] = ["sell_price", "weekday", "month", "year"];

/// Fixed-order numeric features fed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub sell_price: f64,
    /// Day of week, Monday = 0
    pub weekday: f64,
    /// Month, 1-12
    pub month: f64,
    pub year: f64,
}

impl FeatureVector {
    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "sell_price" => Some(self.sell_price),
            "weekday" => Some(self.weekday),
            "month" => Some(self.month),
            "year" => Some(self.year),
            _ => None,
        }
    }

    /// Values in the canonical training order.
    pub fn to_array(&self) -> [f64; 4] {
        [self.sell_price, self.weekday, self.month, self.year]
    }

    /// Assemble values in the order given by `names`.
    ///
    /// Unknown names are reported together as missing features.
    pub fn ordered(&self, names: &[String]) -> ForecastResult<Vec<f64>> {
        let mut values = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.get(name) {
                Some(v) => values.push(v),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(ForecastError::missing_features(missing));
        }
        Ok(values)
    }
}

/// Default feature-name list as owned strings.
pub fn default_feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// One forecast row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub date: NaiveDate,
    pub store_id: String,
    pub cat_id: String,
    pub predicted_demand: f64,
    /// Heuristic score, not a calibrated probability
    pub confidence: f64,
}

/// Prediction request as accepted on the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionRequest {
    pub category: Option<String>,
    pub store: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl PredictionRequest {
    /// Parse a request from its JSON argument form.
    ///
    /// A malformed request is invalid inference input.
    pub fn from_json(text: &str) -> ForecastResult<Self> {
        serde_json::from_str(text).map_err(|e| {
            ForecastError::invalid_shape(format!("malformed prediction request: {}", e))
        })
    }

    /// The request used when no argument is given.
    pub fn builtin_default(config: &PredictionConfig) -> Self {
        Self {
            category: Some(config.fallback_category.clone()),
            store: Some(config.fallback_store.clone()),
            start_date: Some(config.default_start),
            end_date: Some(config.default_end),
        }
    }

    /// Resolve the date range; a missing bound selects the default range.
    pub fn period(&self, config: &PredictionConfig) -> (NaiveDate, NaiveDate) {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => (start, end),
            _ => (config.default_start, config.default_end),
        }
    }
}

/// Every date from `start` to `end`, both inclusive.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Round to a fixed number of decimal places for reporting.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Success payload of the preprocessing stage.
#[derive(Debug, Clone, Serialize)]
pub struct PreprocessSummary {
    pub rows_processed: usize,
    pub products_loaded: usize,
    pub day_columns: usize,
    pub files_created: Vec<String>,
    pub processing_time: String,
}

/// Success payload of the training stage.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub rmse: f64,
    pub mae: f64,
    pub r2_score: f64,
    pub training_time: String,
    pub model_file: String,
    pub features_used: Vec<String>,
    pub training_samples: usize,
    pub test_samples: usize,
    pub best_iteration: usize,
    pub split_policy: String,
}

/// Preview entry embedded in the prediction summary.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionPreview {
    pub date: String,
    pub store_id: String,
    pub cat_id: String,
    pub prediction: f64,
    pub confidence: f64,
}

/// Success payload of the prediction stage.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionSummary {
    pub predictions: Vec<PredictionPreview>,
    pub total_predictions: usize,
    pub prediction_period: String,
    pub model_version: String,
    pub features_used: Vec<String>,
    pub feature_source: String,
    pub predictions_file: String,
}

/// Format elapsed seconds the way stage summaries report them.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.2}s", seconds)
    } else {
        format!("{}m {:.1}s", (seconds / 60.0).floor() as u64, seconds % 60.0)
    }
}
