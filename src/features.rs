//! Feature derivation shared by training and prediction.
//!
//! Every row becomes `(sell_price, weekday, month, year)`. Missing inputs
//! never fail: a table without a date column gets placeholder calendar
//! features, and a table without a price column gets the fallback price.

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;

use crate::error::{ForecastError, ForecastResult};
use crate::types::FeatureVector;

pub const DATE_COLUMN: &str = "date";
pub const PRICE_COLUMN: &str = "sell_price";

const PLACEHOLDER_WEEKDAY: f64 = 0.0;
const PLACEHOLDER_MONTH: f64 = 1.0;
const PLACEHOLDER_YEAR: f64 = 2024.0;

/// Features for every row of a table, plus the parsed dates when the
/// table has a date column.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    pub vectors: Vec<FeatureVector>,
    pub dates: Option<Vec<Option<NaiveDate>>>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    /// Price used when the table has no price column at all
    fallback_price: f64,
}

impl FeatureBuilder {
    pub fn new(fallback_price: f64) -> Self {
        Self { fallback_price }
    }

    pub fn fallback_price(&self) -> f64 {
        self.fallback_price
    }

    /// `(weekday, month, year)` with Monday = 0; placeholders without a date.
    pub fn calendar_features(date: Option<NaiveDate>) -> (f64, f64, f64) {
        match date {
            Some(d) => (
                d.weekday().num_days_from_monday() as f64,
                d.month() as f64,
                d.year() as f64,
            ),
            None => (PLACEHOLDER_WEEKDAY, PLACEHOLDER_MONTH, PLACEHOLDER_YEAR),
        }
    }

    /// Build one vector from an optional date and a known price.
    pub fn vector(&self, date: Option<NaiveDate>, sell_price: f64) -> FeatureVector {
        let (weekday, month, year) = Self::calendar_features(date);
        FeatureVector {
            sell_price,
            weekday,
            month,
            year,
        }
    }

    /// Derive features for every row of `df`.
    pub fn build(&self, df: &DataFrame) -> ForecastResult<FeatureFrame> {
        let height = df.height();
        let dates = match df.column(DATE_COLUMN) {
            Ok(column) => Some(parse_dates(column)?),
            Err(_) => None,
        };
        let prices = match df.column(PRICE_COLUMN) {
            // Present column: null cells count as no price
            Ok(column) => {
                let cast = column.cast(&DataType::Float64)?;
                cast.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect()
            }
            Err(_) => vec![self.fallback_price; height],
        };

        let vectors = (0..height)
            .map(|i| {
                let date = dates.as_ref().and_then(|d| d[i]);
                self.vector(date, prices[i])
            })
            .collect();

        Ok(FeatureFrame { vectors, dates })
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(10.0)
    }
}

/// Parse a date column (`YYYY-MM-DD`, optionally followed by a time part).
pub fn parse_dates(column: &Column) -> ForecastResult<Vec<Option<NaiveDate>>> {
    let as_text = column.cast(&DataType::String)?;
    as_text
        .str()?
        .into_iter()
        .map(|value| match value {
            None => Ok(None),
            Some(raw) => {
                let day = raw.get(..10).unwrap_or(raw);
                NaiveDate::parse_from_str(day, "%Y-%m-%d")
                    .map(Some)
                    .map_err(|_| ForecastError::parse_error(DATE_COLUMN, raw))
            }
        })
        .collect()
}
