//! Model training stage.
//!
//! Loads the long table, derives features, splits by time (or randomly
//! when undated), fits the boosted ensemble with early stopping, scores it
//! on the validation side and persists the model artifacts. Every check
//! runs before the first artifact is written.

use std::time::Instant;

use chrono::NaiveDate;
use polars::prelude::*;

use crate::config::ForecastConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::features::FeatureBuilder;
use crate::gbdt::{BoostOutcome, BoosterParams, GbdtTrainer};
use crate::logger::Logger;
use crate::metrics::RegressionMetrics;
use crate::persistence::ArtifactStore;
use crate::split::DatasetSplitter;
use crate::types::{default_feature_names, format_duration, round_to, TrainingSummary};

/// Feature rows and targets ready for fitting.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub dates: Option<Vec<Option<NaiveDate>>>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn select(&self, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
        let rows = indices.iter().map(|&i| self.rows[i].clone()).collect();
        let targets = indices.iter().map(|&i| self.targets[i]).collect();
        (rows, targets)
    }
}

pub struct ModelTrainer {
    config: ForecastConfig,
    store: ArtifactStore,
    logger: Logger,
}

impl ModelTrainer {
    pub fn new(config: &ForecastConfig) -> Self {
        let mut logger = Logger::new("train");
        logger.start_correlation();
        Self {
            config: config.clone(),
            store: ArtifactStore::new(config.paths.clone()),
            logger,
        }
    }

    /// Derive the training set from a long table.
    ///
    /// Rows with a null target are dropped.
    pub fn prepare(&self, df: &DataFrame) -> ForecastResult<TrainingSet> {
        let target_name = self.config.training.target_column.as_str();
        let target = df
            .column(target_name)
            .map_err(|_| ForecastError::missing_column(target_name, "preprocessed data"))?
            .cast(&DataType::Float64)?;
        let target: Vec<Option<f64>> = target.f64()?.into_iter().collect();

        let frame = FeatureBuilder::new(self.config.prediction.default_price).build(df)?;

        let keep: Vec<usize> = target
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.map(|_| i))
            .collect();
        let dropped = target.len() - keep.len();
        if dropped > 0 {
            self.logger
                .warn(&format!("Dropping {} rows with a null {}", dropped, target_name));
        }

        let rows = keep
            .iter()
            .map(|&i| frame.vectors[i].to_array().to_vec())
            .collect();
        let targets = keep.iter().filter_map(|&i| target[i]).collect();
        let dates = frame
            .dates
            .map(|dates| keep.iter().map(|&i| dates[i]).collect());

        Ok(TrainingSet {
            rows,
            targets,
            dates,
        })
    }

    /// Run the full training stage.
    pub fn train(&self) -> ForecastResult<TrainingSummary> {
        let started = Instant::now();
        self.config.validate()?;

        self.logger.info("Loading preprocessed data...");
        let df = self.store.load_long_table()?;
        let set = self.prepare(&df)?;
        if set.is_empty() {
            return Err(ForecastError::invalid_shape("no rows with a target value"));
        }

        let split = DatasetSplitter::new(&self.config.training).split(set.len(), set.dates.as_deref());
        let policy = split.policy.describe();
        self.logger
            .log_split(&policy, split.train.len(), split.validation.len());

        let (train_x, train_y) = set.select(&split.train);
        let (valid_x, valid_y) = set.select(&split.validation);

        self.logger.info("Training model...");
        let feature_names = default_feature_names();
        let BoostOutcome { model, .. } =
            GbdtTrainer::new(BoosterParams::from(&self.config.training))
                .with_logger(self.logger.clone())
                .fit(&train_x, &train_y, &valid_x, &valid_y, &feature_names)?;

        let predicted = model.predict_batch(&valid_x)?;
        let metrics = RegressionMetrics::compute(&valid_y, &predicted);
        self.logger.info(&format!(
            "Validation RMSE {:.4}, MAE {:.4}, R2 {:.4}",
            metrics.rmse, metrics.mae, metrics.r2
        ));

        let written = self.store.save_model(&model)?;
        for path in &written {
            self.logger.log_artifact_written(path, None);
        }

        Ok(TrainingSummary {
            rmse: round_to(metrics.rmse, 2),
            mae: round_to(metrics.mae, 2),
            r2_score: round_to(metrics.r2, 3),
            training_time: format_duration(started.elapsed().as_secs_f64()),
            model_file: self.store.paths().model_text_path().display().to_string(),
            features_used: feature_names,
            training_samples: train_x.len(),
            test_samples: valid_x.len(),
            best_iteration: model.best_iteration,
            split_policy: policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trainer() -> ModelTrainer {
        ModelTrainer::new(&ForecastConfig::default())
    }

    #[test]
    fn test_prepare_drops_null_targets() {
        let df = df!(
            "date" => ["2016-01-01", "2016-01-02", "2016-01-03"],
            "sell_price" => [1.0f64, 2.0, 3.0],
            "demand" => [Some(1.0f64), None, Some(3.0)]
        )
        .unwrap();
        let set = trainer().prepare(&df).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.targets, vec![1.0, 3.0]);
        assert_eq!(set.rows[1][0], 3.0);
        assert_eq!(set.dates.unwrap().len(), 2);
    }

    #[test]
    fn test_prepare_missing_target_names_column() {
        let df = df!("sell_price" => [1.0f64]).unwrap();
        match trainer().prepare(&df) {
            Err(err @ ForecastError::MissingColumn { .. }) => {
                assert!(err.to_string().contains("demand"));
            }
            other => panic!("Expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_without_date_has_no_dates() {
        let df = df!("demand" => [1i64, 2, 3]).unwrap();
        let set = trainer().prepare(&df).unwrap();
        assert!(set.dates.is_none());
        // Fallback price and placeholder calendar features
        assert_eq!(set.rows[0], vec![10.0, 0.0, 1.0, 2024.0]);
    }
}
