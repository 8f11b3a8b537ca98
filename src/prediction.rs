//! Prediction stage.
//!
//! Two independent decisions drive a run:
//! - which persisted model form is loaded (text first, binary fallback)
//! - which [`FeatureSource`] produces the per-day feature rows, chosen once
//!   by whether the long table exists on disk
//!
//! The history source approximates each day with the average observed
//! price and rescales implausibly small outputs by the historical demand
//! mean. The synthetic source uses a constant price and applies fixed
//! category and store multipliers. Both heuristics are kept as-is.

use std::collections::HashMap;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::config::{ForecastConfig, PredictionConfig};
use crate::error::{ForecastError, ForecastResult};
use crate::features::{FeatureBuilder, PRICE_COLUMN};
use crate::gbdt::TrainedModel;
use crate::logger::Logger;
use crate::persistence::{ArtifactStore, ModelFormat};
use crate::types::{
    date_range, round_to, FeatureVector, PredictionPreview, PredictionRecord, PredictionRequest,
    PredictionSummary,
};

lazy_static! {
    static ref CATEGORY_MULTIPLIERS: HashMap<&'static str, f64> = HashMap::from([
        ("HOBBIES", 1.2),
        ("HOUSEHOLD", 0.9),
        ("FOODS", 1.5),
        ("ELECTRONICS", 0.8),
        ("CLOTHING", 1.1),
        ("SPORTS", 1.0),
    ]);
    static ref STORE_MULTIPLIERS: HashMap<&'static str, f64> = HashMap::from([
        ("CA_1", 1.3),
        ("CA_2", 1.1),
        ("CA_3", 0.9),
        ("TX_1", 1.2),
        ("TX_2", 1.0),
        ("TX_3", 0.8),
        ("WI_1", 0.9),
        ("WI_2", 1.1),
        ("WI_3", 1.0),
    ]);
}

/// Multiplier for a category; unknown or absent categories get 1.0.
pub fn category_multiplier(category: Option<&str>) -> f64 {
    category
        .and_then(|c| CATEGORY_MULTIPLIERS.get(c).copied())
        .unwrap_or(1.0)
}

/// Multiplier for a store; unknown or absent stores get 1.0.
pub fn store_multiplier(store: Option<&str>) -> f64 {
    store
        .and_then(|s| STORE_MULTIPLIERS.get(s).copied())
        .unwrap_or(1.0)
}

// ============================================================================
// Feature sources
// ============================================================================

/// Producer of dated feature rows and the post-processing of their outputs.
pub trait FeatureSource {
    /// `history` or `synthetic`
    fn name(&self) -> &'static str;

    fn feature_row(&self, date: NaiveDate) -> FeatureVector;

    /// Adjust raw model outputs in place.
    fn calibrate(&self, predictions: &mut [f64]);

    /// `(store_id, cat_id)` written on every record.
    fn labels(&self) -> (&str, &str);
}

/// Rows informed by the preprocessed history.
#[derive(Debug, Clone)]
pub struct FromHistory {
    builder: FeatureBuilder,
    demand_mean: Option<f64>,
    demand_threshold: f64,
    prediction_threshold: f64,
    store_id: String,
    cat_id: String,
    logger: Logger,
}

impl FromHistory {
    /// Summarise a long table into the average price and demand mean.
    pub fn from_long_table(
        df: &DataFrame,
        request: &PredictionRequest,
        config: &PredictionConfig,
    ) -> ForecastResult<Self> {
        // Missing prices count as 0, as they do in the feature rows
        let average_price = column_mean(df, PRICE_COLUMN, true)?.unwrap_or(config.default_price);
        let demand_mean = column_mean(df, "demand", false)?;
        Ok(Self::new(average_price, demand_mean, request, config))
    }

    pub fn new(
        average_price: f64,
        demand_mean: Option<f64>,
        request: &PredictionRequest,
        config: &PredictionConfig,
    ) -> Self {
        Self {
            builder: FeatureBuilder::new(average_price),
            demand_mean,
            demand_threshold: config.scale_demand_threshold,
            prediction_threshold: config.scale_prediction_threshold,
            store_id: request
                .store
                .clone()
                .unwrap_or_else(|| config.history_placeholder.clone()),
            cat_id: request
                .category
                .clone()
                .unwrap_or_else(|| config.history_placeholder.clone()),
            logger: Logger::new("predict"),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn average_price(&self) -> f64 {
        self.builder.fallback_price()
    }

    pub fn demand_mean(&self) -> Option<f64> {
        self.demand_mean
    }
}

impl FeatureSource for FromHistory {
    fn name(&self) -> &'static str {
        "history"
    }

    fn feature_row(&self, date: NaiveDate) -> FeatureVector {
        self.builder.vector(Some(date), self.builder.fallback_price())
    }

    /// Multiply by the demand mean when history is large but outputs are tiny.
    fn calibrate(&self, predictions: &mut [f64]) {
        let Some(demand_mean) = self.demand_mean else {
            return;
        };
        if predictions.is_empty() {
            return;
        }
        let prediction_mean = predictions.iter().sum::<f64>() / predictions.len() as f64;
        if demand_mean > self.demand_threshold && prediction_mean < self.prediction_threshold {
            self.logger.log_scale_correction(demand_mean);
            for p in predictions.iter_mut() {
                *p *= demand_mean;
            }
        }
    }

    fn labels(&self) -> (&str, &str) {
        (&self.store_id, &self.cat_id)
    }
}

/// Placeholder rows used when no preprocessed history exists.
#[derive(Debug, Clone)]
pub struct Synthetic {
    builder: FeatureBuilder,
    multiplier: f64,
    store_id: String,
    cat_id: String,
}

impl Synthetic {
    pub fn new(request: &PredictionRequest, config: &PredictionConfig) -> Self {
        let multiplier = category_multiplier(request.category.as_deref())
            * store_multiplier(request.store.as_deref());
        Self {
            builder: FeatureBuilder::new(config.default_price),
            multiplier,
            store_id: request
                .store
                .clone()
                .unwrap_or_else(|| config.fallback_store.clone()),
            cat_id: request
                .category
                .clone()
                .unwrap_or_else(|| config.fallback_category.clone()),
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl FeatureSource for Synthetic {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn feature_row(&self, date: NaiveDate) -> FeatureVector {
        self.builder.vector(Some(date), self.builder.fallback_price())
    }

    /// Apply the multipliers, clamp at zero and round to whole units.
    fn calibrate(&self, predictions: &mut [f64]) {
        for p in predictions.iter_mut() {
            *p = (*p * self.multiplier).max(0.0).round();
        }
    }

    fn labels(&self) -> (&str, &str) {
        (&self.store_id, &self.cat_id)
    }
}

/// Mean of a numeric column; `None` when the column is absent or empty.
fn column_mean(df: &DataFrame, name: &str, nulls_as_zero: bool) -> ForecastResult<Option<f64>> {
    let Ok(column) = df.column(name) else {
        return Ok(None);
    };
    let cast = column.cast(&DataType::Float64)?;
    let values = cast.f64()?;
    if !nulls_as_zero {
        return Ok(values.mean());
    }
    if values.is_empty() {
        return Ok(None);
    }
    let total: f64 = values.into_iter().map(|v| v.unwrap_or(0.0)).sum();
    Ok(Some(total / values.len() as f64))
}

// ============================================================================
// Confidence
// ============================================================================

/// Bounded noisy confidence: `clamp(base + N(0, sd), min, max)`.
pub struct ConfidenceScorer {
    rng: StdRng,
    noise: Normal<f64>,
    base: f64,
    min: f64,
    max: f64,
}

impl ConfidenceScorer {
    pub fn new(config: &PredictionConfig) -> ForecastResult<Self> {
        if !(config.min_confidence <= config.max_confidence) {
            return Err(ForecastError::invalid_param(
                "min_confidence",
                "must not exceed max_confidence",
            ));
        }
        let noise = Normal::new(0.0, config.confidence_noise_sd)
            .map_err(|e| ForecastError::invalid_param("confidence_noise_sd", e.to_string()))?;
        let rng = match config.confidence_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            noise,
            base: config.base_confidence,
            min: config.min_confidence,
            max: config.max_confidence,
        })
    }

    pub fn next_score(&mut self) -> f64 {
        let raw = self.base + self.noise.sample(&mut self.rng);
        raw.clamp(self.min, self.max)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Result of a forecast before it is persisted.
#[derive(Debug, Clone)]
pub struct Forecast {
    pub records: Vec<PredictionRecord>,
    pub feature_names: Vec<String>,
    pub source: &'static str,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

pub struct PredictionEngine {
    config: ForecastConfig,
    store: ArtifactStore,
    logger: Logger,
}

impl PredictionEngine {
    pub fn new(config: &ForecastConfig) -> Self {
        let mut logger = Logger::new("predict");
        logger.start_correlation();
        Self {
            config: config.clone(),
            store: ArtifactStore::new(config.paths.clone()),
            logger,
        }
    }

    /// Load the persisted model, text form first.
    pub fn load_model(&self) -> ForecastResult<(TrainedModel, ModelFormat)> {
        let (model, format, path) = self.store.load_model()?;
        self.logger
            .log_model_loaded(&path, format.as_str(), model.trees.len());
        Ok((model, format))
    }

    /// Feature order for inference, checked against what the model records.
    pub fn feature_names(&self, model: &TrainedModel) -> ForecastResult<Vec<String>> {
        let listed = self.store.load_feature_names()?;
        resolve_feature_names(model, listed)
    }

    /// Pick the feature source once, by whether history exists.
    pub fn select_source(&self, request: &PredictionRequest) -> ForecastResult<Box<dyn FeatureSource>> {
        let config = &self.config.prediction;
        if self.store.has_long_table() {
            let df = self.store.load_long_table()?;
            let source = FromHistory::from_long_table(&df, request, config)?
                .with_logger(self.logger.clone());
            self.logger.debug(&format!(
                "History: average price {:.3}, demand mean {:?}",
                source.average_price(),
                source.demand_mean()
            ));
            Ok(Box::new(source))
        } else {
            self.logger
                .warn("No preprocessed data found, using synthetic features");
            Ok(Box::new(Synthetic::new(request, config)))
        }
    }

    /// Produce forecast records for a request without writing anything.
    pub fn forecast(&self, request: &PredictionRequest) -> ForecastResult<Forecast> {
        self.config.validate()?;
        let (model, _) = self.load_model()?;
        let feature_names = self.feature_names(&model)?;

        let (start, end) = request.period(&self.config.prediction);
        let dates = date_range(start, end);
        if dates.is_empty() {
            return Err(ForecastError::invalid_shape(format!(
                "empty prediction period: {} is after {}",
                start, end
            )));
        }

        let source = self.select_source(request)?;
        self.logger.log_feature_source(source.name(), dates.len());

        let rows = dates
            .iter()
            .map(|d| source.feature_row(*d).ordered(&feature_names))
            .collect::<ForecastResult<Vec<_>>>()?;
        let mut predictions = model.predict_batch(&rows)?;
        source.calibrate(&mut predictions);

        let mut scorer = ConfidenceScorer::new(&self.config.prediction)?;
        let (store_id, cat_id) = source.labels();
        let records = dates
            .into_iter()
            .zip(predictions)
            .map(|(date, predicted_demand)| PredictionRecord {
                date,
                store_id: store_id.to_string(),
                cat_id: cat_id.to_string(),
                predicted_demand,
                confidence: scorer.next_score(),
            })
            .collect();

        Ok(Forecast {
            records,
            feature_names,
            source: source.name(),
            start,
            end,
        })
    }

    /// Run the full prediction stage: forecast, persist, summarise.
    pub fn predict(&self, request: &PredictionRequest) -> ForecastResult<PredictionSummary> {
        let forecast = self.forecast(request)?;

        let path = self.store.save_predictions(&forecast.records)?;
        self.logger
            .log_artifact_written(&path, Some(forecast.records.len()));

        let preview = forecast
            .records
            .iter()
            .take(self.config.prediction.preview_limit)
            .map(|r| PredictionPreview {
                date: r.date.format("%Y-%m-%d").to_string(),
                store_id: r.store_id.clone(),
                cat_id: r.cat_id.clone(),
                prediction: round_to(r.predicted_demand, 2),
                confidence: r.confidence,
            })
            .collect();

        Ok(PredictionSummary {
            predictions: preview,
            total_predictions: forecast.records.len(),
            prediction_period: format!("{} to {}", forecast.start, forecast.end),
            model_version: self.config.prediction.model_version.clone(),
            features_used: forecast.feature_names,
            feature_source: forecast.source.to_string(),
            predictions_file: path.display().to_string(),
        })
    }
}

/// Check a persisted feature-name list against the model's own list.
///
/// Without a list the model's order is used. Every model feature must be
/// listed, in the same order. Model features absent from the list and
/// listed names the model cannot supply are reported together as missing.
pub fn resolve_feature_names(
    model: &TrainedModel,
    listed: Option<Vec<String>>,
) -> ForecastResult<Vec<String>> {
    let Some(listed) = listed else {
        return Ok(model.feature_names.clone());
    };

    let missing: Vec<&String> = model
        .feature_names
        .iter()
        .filter(|name| !listed.contains(name))
        .chain(listed.iter().filter(|name| !model.feature_names.contains(name)))
        .collect();
    if !missing.is_empty() {
        return Err(ForecastError::missing_features(missing));
    }
    if listed != model.feature_names {
        return Err(ForecastError::FeatureOrderMismatch {
            expected: model.feature_names.clone(),
            found: listed,
        });
    }
    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbdt::{BoosterParams, Node, Tree};
    use crate::types::default_feature_names;

    fn constant_model(value: f64) -> TrainedModel {
        TrainedModel {
            trees: vec![Tree {
                nodes: vec![Node::Leaf { value: 0.0 }],
            }],
            base_score: value,
            feature_names: default_feature_names(),
            best_iteration: 1,
            params: BoosterParams::default(),
            trained_at: String::new(),
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_multiplier_tables() {
        assert_eq!(category_multiplier(Some("FOODS")), 1.5);
        assert_eq!(category_multiplier(Some("TOYS")), 1.0);
        assert_eq!(category_multiplier(None), 1.0);
        assert_eq!(store_multiplier(Some("TX_3")), 0.8);
        assert_eq!(store_multiplier(Some("NY_1")), 1.0);
    }

    #[test]
    fn test_synthetic_calibration_clamps_and_rounds() {
        let request = PredictionRequest {
            category: Some("HOBBIES".into()),
            store: Some("CA_1".into()),
            ..Default::default()
        };
        let source = Synthetic::new(&request, &PredictionConfig::default());
        assert!((source.multiplier() - 1.56).abs() < 1e-12);

        let mut predictions = vec![-3.0, 10.0];
        source.calibrate(&mut predictions);
        assert_eq!(predictions, vec![0.0, 16.0]);
    }

    #[test]
    fn test_synthetic_labels_default() {
        let source = Synthetic::new(&PredictionRequest::default(), &PredictionConfig::default());
        assert_eq!(source.labels(), ("CA_1", "HOBBIES"));
        assert_eq!(source.multiplier(), 1.0);
        assert_eq!(source.feature_row(ymd(2024, 1, 1)).sell_price, 10.0);
    }

    #[test]
    fn test_history_scale_correction_fires() {
        let config = PredictionConfig::default();
        let source = FromHistory::new(2.0, Some(25.0), &PredictionRequest::default(), &config);
        let mut predictions = vec![0.2, 0.4];
        source.calibrate(&mut predictions);
        assert!((predictions[0] - 5.0).abs() < 1e-9);
        assert!((predictions[1] - 10.0).abs() < 1e-9);
        assert_eq!(source.labels(), ("UNKNOWN", "UNKNOWN"));
    }

    #[test]
    fn test_history_scale_correction_skipped() {
        let config = PredictionConfig::default();
        let request = PredictionRequest::default();

        // Small history: no correction
        let source = FromHistory::new(2.0, Some(5.0), &request, &config);
        let mut predictions = vec![0.2, 0.4];
        source.calibrate(&mut predictions);
        assert_eq!(predictions, vec![0.2, 0.4]);

        // Plausible outputs: no correction
        let source = FromHistory::new(2.0, Some(25.0), &request, &config);
        let mut predictions = vec![3.0, 4.0];
        source.calibrate(&mut predictions);
        assert_eq!(predictions, vec![3.0, 4.0]);
    }

    #[test]
    fn test_history_uses_average_price() {
        let df = df!(
            "sell_price" => [1.0f64, 3.0],
            "demand" => [10.0f64, 30.0]
        )
        .unwrap();
        let source = FromHistory::from_long_table(
            &df,
            &PredictionRequest::default(),
            &PredictionConfig::default(),
        )
        .unwrap();
        assert_eq!(source.average_price(), 2.0);
        assert_eq!(source.demand_mean(), Some(20.0));
        assert_eq!(source.feature_row(ymd(2024, 3, 1)).sell_price, 2.0);
    }

    #[test]
    fn test_average_price_counts_null_as_zero() {
        let df = df!(
            "sell_price" => [Some(4.0f64), None],
            "demand" => [Some(12.0f64), None]
        )
        .unwrap();
        let source = FromHistory::from_long_table(
            &df,
            &PredictionRequest::default(),
            &PredictionConfig::default(),
        )
        .unwrap();
        assert_eq!(source.average_price(), 2.0);
        // Demand nulls carry no information and are skipped
        assert_eq!(source.demand_mean(), Some(12.0));
    }

    #[test]
    fn test_inverted_confidence_bounds_rejected() {
        let config = PredictionConfig {
            min_confidence: 0.95,
            max_confidence: 0.7,
            ..Default::default()
        };
        assert!(matches!(
            ConfidenceScorer::new(&config),
            Err(ForecastError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_confidence_bounds() {
        let config = PredictionConfig {
            confidence_seed: Some(7),
            confidence_noise_sd: 0.5,
            ..Default::default()
        };
        let mut scorer = ConfidenceScorer::new(&config).unwrap();
        for _ in 0..1000 {
            let c = scorer.next_score();
            assert!((0.7..=0.95).contains(&c));
        }
    }

    #[test]
    fn test_resolve_feature_names() {
        let model = constant_model(1.0);
        assert_eq!(
            resolve_feature_names(&model, None).unwrap(),
            default_feature_names()
        );

        let listed = vec!["sell_price".to_string(), "weekday".to_string(), "month".to_string()];
        match resolve_feature_names(&model, Some(listed)) {
            Err(ForecastError::MissingFeatures { features }) => {
                assert_eq!(features, vec!["year".to_string()]);
            }
            other => panic!("Expected MissingFeatures, got {:?}", other),
        }

        let mut extended = default_feature_names();
        extended.push("lag_7".to_string());
        match resolve_feature_names(&model, Some(extended)) {
            Err(err @ ForecastError::MissingFeatures { .. }) => {
                assert!(err.to_string().contains("lag_7"));
            }
            other => panic!("Expected MissingFeatures, got {:?}", other),
        }

        let mut reversed = default_feature_names();
        reversed.reverse();
        assert!(matches!(
            resolve_feature_names(&model, Some(reversed)),
            Err(ForecastError::FeatureOrderMismatch { .. })
        ));
    }
}
