//! Structured logging module for the forecasting pipeline.
//!
//! Provides a named logger with levels, run correlation IDs and
//! structured event helpers. Events are emitted through `tracing`;
//! the binary installs a subscriber that writes to stderr so stdout
//! only ever carries the final JSON result line.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

/// Log levels; filtering is left to the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

/// Global correlation ID counter.
static CORRELATION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Structured logger with correlation ID support.
#[derive(Debug, Clone)]
pub struct Logger {
    /// Current correlation ID for tracing related events
    correlation_id: u64,
    /// Logger name/context (usually the stage)
    name: String,
}

impl Logger {
    /// Create a new logger with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            correlation_id: 0,
            name: name.to_string(),
        }
    }

    /// Generate a new correlation ID.
    pub fn new_correlation_id() -> u64 {
        CORRELATION_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    }

    /// Set a new correlation ID and return it.
    pub fn start_correlation(&mut self) -> u64 {
        self.correlation_id = Self::new_correlation_id();
        self.correlation_id
    }

    /// Get the current correlation ID.
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// Get the logger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log a message at the given level.
    pub fn log(&self, level: LogLevel, message: &str) {
        let stage = self.name.as_str();
        let cid = self.correlation_id;
        match level {
            LogLevel::Debug => tracing::debug!(stage, cid, "{}", message),
            LogLevel::Info => tracing::info!(stage, cid, "{}", message),
            LogLevel::Warn => tracing::warn!(stage, cid, "{}", message),
            LogLevel::Error => tracing::error!(stage, cid, "{}", message),
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    // Structured logging methods for pipeline events

    /// Log the raw tables being loaded.
    pub fn log_tables_loaded(&self, sales_rows: usize, calendar_rows: usize, price_rows: usize) {
        self.info(&format!(
            "TABLES_LOADED: sales={}, calendar={}, prices={}",
            sales_rows, calendar_rows, price_rows
        ));
    }

    /// Log the wide-to-long reshape.
    pub fn log_reshape(&self, products: usize, day_columns: usize, rows: usize) {
        self.info(&format!(
            "RESHAPED: products={}, days={}, rows={}",
            products, day_columns, rows
        ));
    }

    /// Log a left join.
    pub fn log_join(&self, table: &str, rows: usize) {
        self.info(&format!("JOINED: table={}, rows={}", table, rows));
    }

    /// Log a label-encoded column.
    pub fn log_encoded(&self, column: &str, categories: usize) {
        self.debug(&format!(
            "ENCODED: column={}, categories={}",
            column, categories
        ));
    }

    /// Log an artifact written to disk.
    pub fn log_artifact_written(&self, path: &Path, rows: Option<usize>) {
        match rows {
            Some(rows) => self.info(&format!(
                "ARTIFACT_WRITTEN: path={}, rows={}",
                path.display(),
                rows
            )),
            None => self.info(&format!("ARTIFACT_WRITTEN: path={}", path.display())),
        }
    }

    /// Log the train/validation split.
    pub fn log_split(&self, policy: &str, train_rows: usize, validation_rows: usize) {
        self.info(&format!(
            "SPLIT: policy={}, train={}, validation={}",
            policy, train_rows, validation_rows
        ));
    }

    /// Log one boosting round.
    pub fn log_round(&self, round: usize, validation_rmse: f64) {
        self.debug(&format!(
            "BOOST_ROUND: round={}, valid_rmse={:.6}",
            round, validation_rmse
        ));
    }

    /// Log early stopping.
    pub fn log_early_stop(&self, best_iteration: usize, best_rmse: f64) {
        self.info(&format!(
            "EARLY_STOP: best_iteration={}, best_rmse={:.6}",
            best_iteration, best_rmse
        ));
    }

    /// Log a model load.
    pub fn log_model_loaded(&self, path: &Path, format: &str, trees: usize) {
        self.info(&format!(
            "MODEL_LOADED: path={}, format={}, trees={}",
            path.display(),
            format,
            trees
        ));
    }

    /// Log the feature source chosen for prediction.
    pub fn log_feature_source(&self, source: &str, days: usize) {
        self.info(&format!("FEATURE_SOURCE: source={}, days={}", source, days));
    }

    /// Log the prediction scale correction.
    pub fn log_scale_correction(&self, factor: f64) {
        self.warn(&format!("SCALE_CORRECTION: factor={:.4}", factor));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("demand-forecast")
    }
}

/// Install the global `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the `verbose` flag. Calling this
/// twice is harmless; the second installation is ignored.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_creation() {
        let logger = Logger::new("train");
        assert_eq!(logger.name(), "train");
        assert_eq!(logger.correlation_id(), 0);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_correlation_id() {
        let mut logger = Logger::new("Test");
        let id1 = logger.start_correlation();
        let id2 = Logger::new_correlation_id();
        assert!(id2 > id1);
        assert_eq!(logger.correlation_id(), id1);
    }

    #[test]
    fn test_structured_logging() {
        let logger = Logger::new("Test");

        // These should not panic without a subscriber
        logger.log_tables_loaded(10, 1969, 6_841_121);
        logger.log_reshape(10, 1913, 19_130);
        logger.log_join("calendar", 19_130);
        logger.log_encoded("event_name_1", 30);
        logger.log_artifact_written(Path::new("out.csv"), Some(19_130));
        logger.log_split("time", 100, 28);
        logger.log_round(1, 2.5);
        logger.log_early_stop(12, 2.1);
        logger.log_model_loaded(Path::new("model.json"), "text", 12);
        logger.log_feature_source("synthetic", 7);
        logger.log_scale_correction(14.2);
    }
}
