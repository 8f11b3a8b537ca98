//! Raw table ingestion using Polars.
//!
//! Confirms the three required input files exist, loads them as-is and
//! optionally caps the number of product rows read from the sales table.

use std::path::Path;

use polars::prelude::*;

use crate::config::{PathsConfig, PreprocessConfig};
use crate::error::{ForecastError, ForecastResult};
use crate::logger::Logger;

/// The three raw inputs of a preprocessing run.
#[derive(Debug, Clone)]
pub struct RawTables {
    /// Wide sales table: identity columns plus one `d_*` column per day
    pub sales: DataFrame,
    pub calendar: DataFrame,
    pub prices: DataFrame,
}

/// Loader for the raw sales, calendar and price tables.
#[derive(Debug, Clone)]
pub struct DataIngestor {
    paths: PathsConfig,
    /// Maximum number of product rows to load (None = all)
    max_products: Option<usize>,
    logger: Logger,
}

impl DataIngestor {
    /// Create an ingestor from path and preprocessing configuration.
    pub fn new(paths: PathsConfig, preprocess: &PreprocessConfig) -> Self {
        Self {
            paths,
            max_products: preprocess.max_products,
            logger: Logger::new("ingest"),
        }
    }

    /// Override the product cap.
    pub fn with_max_products(mut self, max_products: Option<usize>) -> Self {
        self.max_products = max_products;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Fail with `MissingFile` naming the first absent input.
    pub fn check_inputs(&self) -> ForecastResult<()> {
        for path in [
            self.paths.sales_path(),
            self.paths.calendar_path(),
            self.paths.prices_path(),
        ] {
            if !path.exists() {
                return Err(ForecastError::missing_file(path.display().to_string()));
            }
        }
        Ok(())
    }

    /// Load all three tables.
    pub fn load(&self) -> ForecastResult<RawTables> {
        self.check_inputs()?;

        self.logger.info("Loading sales...");
        let sales = self.load_csv(&self.paths.sales_path(), self.max_products)?;

        self.logger.info("Loading calendar...");
        let calendar = self.load_csv(&self.paths.calendar_path(), None)?;

        self.logger.info("Loading prices...");
        let prices = self.load_csv(&self.paths.prices_path(), None)?;

        self.logger
            .log_tables_loaded(sales.height(), calendar.height(), prices.height());

        Ok(RawTables {
            sales,
            calendar,
            prices,
        })
    }

    /// Load a CSV, reading at most `n_rows` data rows when given.
    fn load_csv(&self, path: &Path, n_rows: Option<usize>) -> ForecastResult<DataFrame> {
        CsvReadOptions::default()
            .with_has_header(true)
            .with_n_rows(n_rows)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .map_err(|e| ForecastError::Polars(format!("Failed to create CSV reader: {}", e)))?
            .finish()
            .map_err(|e| ForecastError::Polars(format!("Failed to read {}: {}", path.display(), e)))
    }
}
