//! Data Pipeline module: wide-to-long reshape and context joins.
//!
//! Steps:
//! - Melt the wide sales table into one row per (product, day)
//! - Left-join calendar context on the day index
//! - Left-join weekly prices on (store_id, item_id, wm_yr_wk)
//! - Label-encode calendar event columns
//! - Zero-fill prices missing after the join

use std::collections::HashMap;
use std::time::Instant;

use polars::prelude::*;

use crate::config::{ForecastConfig, PreprocessConfig};
use crate::data_loader::{DataIngestor, RawTables};
use crate::error::{ForecastError, ForecastResult};
use crate::logger::Logger;
use crate::persistence::ArtifactStore;
use crate::types::{format_duration, PreprocessSummary, DAY_COLUMN_PREFIX, IDENTITY_COLUMNS};

/// Composite key of the price table.
pub const PRICE_KEYS: [&str; 3] = ["store_id", "item_id", "wm_yr_wk"];

/// Output of a full transform.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// The long-format table
    pub frame: DataFrame,
    pub products: usize,
    pub day_columns: usize,
}

/// Assigns dense integer codes to categories in first-seen order.
///
/// Nulls are encoded as -1.
#[derive(Debug, Default, Clone)]
pub struct CategoryEncoder {
    codes: HashMap<String, i32>,
}

impl CategoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&mut self, value: Option<&str>) -> i32 {
        match value {
            Some(v) => {
                let next = self.codes.len() as i32;
                *self.codes.entry(v.to_string()).or_insert(next)
            }
            None => -1,
        }
    }

    /// Number of distinct categories seen.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Encode a whole column, keeping its name.
    pub fn encode_column(&mut self, column: &Column) -> ForecastResult<Series> {
        let as_text = column.cast(&DataType::String)?;
        let values = as_text.str()?;
        let encoded: Vec<i32> = values.into_iter().map(|v| self.code(v)).collect();
        Ok(Series::new(column.name().clone(), encoded))
    }
}

/// The reshape-and-join processor.
#[derive(Debug, Clone)]
pub struct TableTransformer {
    event_columns: Vec<String>,
    logger: Logger,
}

impl TableTransformer {
    pub fn new(config: &PreprocessConfig) -> Self {
        Self {
            event_columns: config.event_columns.clone(),
            logger: Logger::new("transform"),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Run the full transform over freshly ingested tables.
    pub fn transform(&self, tables: &RawTables) -> ForecastResult<TransformOutput> {
        let products = tables.sales.height();
        let day_columns = day_columns(&tables.sales).len();

        self.logger.info("Transforming sales data (melt)...");
        let long = self.melt(&tables.sales)?;
        let reshaped_rows = long.height();
        self.logger.log_reshape(products, day_columns, reshaped_rows);

        self.logger.info("Merging calendar...");
        let long = self.join_calendar(long, &tables.calendar)?;
        ensure_row_count("calendar", reshaped_rows, long.height())?;
        self.logger.log_join("calendar", long.height());

        self.logger.info("Merging prices...");
        let long = self.join_prices(long, &tables.prices)?;
        ensure_row_count("prices", reshaped_rows, long.height())?;
        self.logger.log_join("prices", long.height());

        self.logger.info("Encoding categorical columns...");
        let long = self.encode_events(long)?;
        let long = self.fill_missing_prices(long)?;

        Ok(TransformOutput {
            frame: long,
            products,
            day_columns,
        })
    }

    /// Unpivot every `d_*` column into (`d`, `demand`) rows.
    ///
    /// Output order is day-major: all products for `d_1`, then `d_2`, ...
    pub fn melt(&self, sales: &DataFrame) -> ForecastResult<DataFrame> {
        require_columns(sales, &IDENTITY_COLUMNS, "sales table")?;
        let days = day_columns(sales);
        if days.is_empty() {
            return Err(ForecastError::invalid_shape(format!(
                "sales table has no {}* day columns",
                DAY_COLUMN_PREFIX
            )));
        }

        let identity = sales.select(IDENTITY_COLUMNS)?;
        let height = sales.height();
        let mut long: Option<DataFrame> = None;

        for day in &days {
            let demand = sales
                .column(day)?
                .as_materialized_series()
                .cast(&DataType::Float64)?
                .with_name("demand".into());

            let mut frame = identity.clone();
            frame.with_column(Series::new("d".into(), vec![day.as_str(); height]))?;
            frame.with_column(demand)?;

            if let Some(acc) = long.as_mut() {
                acc.vstack_mut(&frame)?;
            } else {
                long = Some(frame);
            }
        }

        long.ok_or_else(|| ForecastError::internal("melt produced no frames"))
    }

    /// Left-join the calendar on the day index.
    pub fn join_calendar(&self, long: DataFrame, calendar: &DataFrame) -> ForecastResult<DataFrame> {
        require_columns(calendar, &["d"], "calendar")?;
        long.lazy()
            .join(
                calendar.clone().lazy(),
                [col("d")],
                [col("d")],
                JoinArgs::new(JoinType::Left),
            )
            .collect()
            .map_err(|e| ForecastError::Polars(format!("Calendar join failed: {}", e)))
    }

    /// Left-join weekly prices on (store_id, item_id, wm_yr_wk).
    pub fn join_prices(&self, long: DataFrame, prices: &DataFrame) -> ForecastResult<DataFrame> {
        require_columns(&long, &PRICE_KEYS, "long table")?;
        require_columns(prices, &PRICE_KEYS, "price table")?;
        require_columns(prices, &["sell_price"], "price table")?;

        let keys: Vec<Expr> = PRICE_KEYS.iter().map(|k| col(*k)).collect();
        long.lazy()
            .join(
                prices.clone().lazy(),
                keys.clone(),
                keys,
                JoinArgs::new(JoinType::Left),
            )
            .collect()
            .map_err(|e| ForecastError::Polars(format!("Price join failed: {}", e)))
    }

    /// Replace each configured event column that is present with integer codes.
    pub fn encode_events(&self, mut df: DataFrame) -> ForecastResult<DataFrame> {
        for name in &self.event_columns {
            let Ok(column) = df.column(name) else {
                self.logger.debug(&format!("Event column {} absent, skipping", name));
                continue;
            };
            let mut encoder = CategoryEncoder::new();
            let encoded = encoder.encode_column(column)?;
            self.logger.log_encoded(name, encoder.len());
            df.with_column(encoded)?;
        }
        Ok(df)
    }

    /// Zero-fill `sell_price` nulls. Not an imputation: 0 marks "no price that week".
    pub fn fill_missing_prices(&self, df: DataFrame) -> ForecastResult<DataFrame> {
        if df.column("sell_price").is_err() {
            return Ok(df);
        }
        df.lazy()
            .with_column(
                col("sell_price")
                    .cast(DataType::Float64)
                    .fill_null(lit(0.0))
                    .alias("sell_price"),
            )
            .collect()
            .map_err(|e| ForecastError::Polars(format!("Price fill failed: {}", e)))
    }
}

/// Run ingestion and the transform, then persist the long table.
///
/// `max_products` overrides the configured cap when given. Nothing is
/// written unless every step succeeds.
pub fn preprocess(
    config: &ForecastConfig,
    max_products: Option<Option<usize>>,
) -> ForecastResult<PreprocessSummary> {
    let started = Instant::now();
    let mut logger = Logger::new("preprocess");
    logger.start_correlation();

    let mut ingestor = DataIngestor::new(config.paths.clone(), &config.preprocess)
        .with_logger(logger.clone());
    if let Some(cap) = max_products {
        ingestor = ingestor.with_max_products(cap);
    }
    let tables = ingestor.load()?;

    let output = TableTransformer::new(&config.preprocess)
        .with_logger(logger.clone())
        .transform(&tables)?;
    let TransformOutput {
        mut frame,
        products,
        day_columns,
    } = output;

    logger.info("Saving processed data...");
    let store = ArtifactStore::new(config.paths.clone());
    let path = store.save_long_table(&mut frame)?;
    logger.log_artifact_written(&path, Some(frame.height()));

    Ok(PreprocessSummary {
        rows_processed: frame.height(),
        products_loaded: products,
        day_columns,
        files_created: vec![path.display().to_string()],
        processing_time: format_duration(started.elapsed().as_secs_f64()),
    })
}

/// Names of the `d_*` day columns, in table order.
pub fn day_columns(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .filter(|name| name.starts_with(DAY_COLUMN_PREFIX))
        .map(|name| name.to_string())
        .collect()
}

fn require_columns(df: &DataFrame, columns: &[&str], table: &str) -> ForecastResult<()> {
    for column in columns {
        if df.column(column).is_err() {
            return Err(ForecastError::missing_column(*column, table));
        }
    }
    Ok(())
}

fn ensure_row_count(join: &str, expected: usize, actual: usize) -> ForecastResult<()> {
    if expected != actual {
        return Err(ForecastError::invalid_shape(format!(
            "{} join changed row count from {} to {} (duplicate join keys?)",
            join, expected, actual
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
