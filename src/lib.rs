//! Demand Forecast Core
//!
//! Retail demand forecasting pipeline: reshapes wide daily sales into a
//! long table, trains a gradient-boosted regression model with a time-based
//! holdout, and serves forecasts for arbitrary date ranges.

pub mod config;
pub mod data_loader;
pub mod data_pipeline;
pub mod error;
pub mod features;
pub mod gbdt;
pub mod logger;
pub mod metrics;
pub mod persistence;
pub mod prediction;
pub mod report;
pub mod split;
pub mod trainer;
pub mod types;

pub use config::{ForecastConfig, PathsConfig, PredictionConfig, PreprocessConfig, TrainingConfig};
pub use data_loader::{DataIngestor, RawTables};
pub use data_pipeline::{preprocess, CategoryEncoder, TableTransformer, TransformOutput};
pub use error::{ErrorKind, ForecastError, ForecastResult};
pub use features::{FeatureBuilder, FeatureFrame};
pub use gbdt::{BoostOutcome, BoosterParams, GbdtTrainer, TrainedModel};
pub use logger::{init_tracing, LogLevel, Logger};
pub use metrics::RegressionMetrics;
pub use persistence::{ArtifactStore, ModelFormat};
pub use prediction::{FeatureSource, Forecast, FromHistory, PredictionEngine, Synthetic};
pub use report::{run_stage, StageReport};
pub use split::{DatasetSplitter, SplitIndices, SplitPolicy};
pub use trainer::{ModelTrainer, TrainingSet};
pub use types::*;
