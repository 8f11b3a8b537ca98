//! Persistence module for pipeline artifacts.
//!
//! Provides functionality to:
//! - Write any artifact atomically (temp file in the same directory, then rename)
//! - Save the long-format table and the predictions table as CSV
//! - Save/load the trained model in a text (JSON) and a binary (bincode) form
//! - Save/load the ordered feature-name list
//!
//! Readers never observe a half-written file: the destination is replaced
//! only once the new content is fully flushed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tempfile::NamedTempFile;

use crate::config::PathsConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::gbdt::TrainedModel;
use crate::types::PredictionRecord;

/// Which serialized form a model was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Text,
    Binary,
}

impl ModelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Text => "text",
            ModelFormat::Binary => "binary",
        }
    }
}

/// Write `path` atomically using `write` to produce the content.
pub fn write_atomic<F>(path: &Path, write: F) -> ForecastResult<()>
where
    F: FnOnce(&mut File) -> ForecastResult<()>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .map_err(|e| ForecastError::Io(format!("Failed to create {}: {}", parent.display(), e)))?;

    let mut temp = NamedTempFile::new_in(&parent)
        .map_err(|e| ForecastError::Io(format!("Failed to create temp file: {}", e)))?;
    write(temp.as_file_mut())?;
    temp.as_file_mut().sync_all()?;
    temp.persist(path)
        .map_err(|e| ForecastError::Io(format!("Failed to replace {}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Write a DataFrame as CSV, atomically.
pub fn write_csv_atomic(path: &Path, df: &mut DataFrame) -> ForecastResult<()> {
    write_atomic(path, |file| {
        CsvWriter::new(file)
            .include_header(true)
            .finish(df)
            .map_err(|e| ForecastError::Polars(format!("Failed to write CSV: {}", e)))
    })
}

/// Read a CSV with a header row.
pub fn read_csv(path: &Path) -> ForecastResult<DataFrame> {
    if !path.exists() {
        return Err(ForecastError::missing_file(path.display().to_string()));
    }
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|e| ForecastError::Polars(format!("Failed to create CSV reader: {}", e)))?
        .finish()
        .map_err(|e| ForecastError::Polars(format!("Failed to read {}: {}", path.display(), e)))
}

/// File-backed store for every artifact the stages exchange.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    paths: PathsConfig,
}

impl ArtifactStore {
    pub fn new(paths: PathsConfig) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    // ------------------------------------------------------------------
    // Long-format table
    // ------------------------------------------------------------------

    pub fn has_long_table(&self) -> bool {
        self.paths.long_table_path().exists()
    }

    /// Persist the long table, replacing any previous one.
    pub fn save_long_table(&self, df: &mut DataFrame) -> ForecastResult<PathBuf> {
        let path = self.paths.long_table_path();
        write_csv_atomic(&path, df)?;
        Ok(path)
    }

    pub fn load_long_table(&self) -> ForecastResult<DataFrame> {
        read_csv(&self.paths.long_table_path())
    }

    // ------------------------------------------------------------------
    // Model
    // ------------------------------------------------------------------

    /// Persist the model in both forms and the feature-name list.
    pub fn save_model(&self, model: &TrainedModel) -> ForecastResult<Vec<PathBuf>> {
        let text_path = self.paths.model_text_path();
        write_atomic(&text_path, |file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, model)?;
            writer.flush()?;
            Ok(())
        })?;

        let binary_path = self.paths.model_binary_path();
        let bytes = bincode::serialize(model)?;
        write_atomic(&binary_path, |file| {
            file.write_all(&bytes)?;
            Ok(())
        })?;

        let names_path = self.save_feature_names(&model.feature_names)?;
        Ok(vec![text_path, binary_path, names_path])
    }

    /// Load the model, preferring the text form over the binary form.
    pub fn load_model(&self) -> ForecastResult<(TrainedModel, ModelFormat, PathBuf)> {
        let text_path = self.paths.model_text_path();
        if text_path.exists() {
            let text = std::fs::read_to_string(&text_path)?;
            let model: TrainedModel = serde_json::from_str(&text)?;
            return Ok((model, ModelFormat::Text, text_path));
        }

        let binary_path = self.paths.model_binary_path();
        if binary_path.exists() {
            let bytes = std::fs::read(&binary_path)?;
            let model: TrainedModel = bincode::deserialize(&bytes)?;
            return Ok((model, ModelFormat::Binary, binary_path));
        }

        Err(ForecastError::missing_file(format!(
            "trained model ({} or {})",
            text_path.display(),
            binary_path.display()
        )))
    }

    // ------------------------------------------------------------------
    // Feature names
    // ------------------------------------------------------------------

    pub fn save_feature_names(&self, names: &[String]) -> ForecastResult<PathBuf> {
        let path = self.paths.feature_names_path();
        let json = serde_json::to_string(names)?;
        write_atomic(&path, |file| {
            file.write_all(json.as_bytes())?;
            Ok(())
        })?;
        Ok(path)
    }

    /// Load the feature-name list; `None` when the file does not exist.
    pub fn load_feature_names(&self) -> ForecastResult<Option<Vec<String>>> {
        let path = self.paths.feature_names_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    // ------------------------------------------------------------------
    // Predictions
    // ------------------------------------------------------------------

    /// Persist `date, store_id, cat_id, predicted_demand`.
    pub fn save_predictions(&self, records: &[PredictionRecord]) -> ForecastResult<PathBuf> {
        let dates: Vec<String> = records.iter().map(|r| r.date.format("%Y-%m-%d").to_string()).collect();
        let stores: Vec<&str> = records.iter().map(|r| r.store_id.as_str()).collect();
        let cats: Vec<&str> = records.iter().map(|r| r.cat_id.as_str()).collect();
        let demand: Vec<f64> = records.iter().map(|r| r.predicted_demand).collect();

        let mut df = DataFrame::new(vec![
            Series::new("date".into(), dates).into_column(),
            Series::new("store_id".into(), stores).into_column(),
            Series::new("cat_id".into(), cats).into_column(),
            Series::new("predicted_demand".into(), demand).into_column(),
        ])?;

        let path = self.paths.predictions_path();
        write_csv_atomic(&path, &mut df)?;
        Ok(path)
    }
}
