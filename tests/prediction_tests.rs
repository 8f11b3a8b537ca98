//! Integration tests for the prediction stage: synthetic fallback, feature
//! name checks and model format fallback.

use std::fs;

use chrono::NaiveDate;
use demand_forecast::config::ForecastConfig;
use demand_forecast::error::ForecastError;
use demand_forecast::gbdt::{BoosterParams, Node, Tree, TrainedModel};
use demand_forecast::persistence::{ArtifactStore, ModelFormat};
use demand_forecast::prediction::PredictionEngine;
use demand_forecast::report::run_stage;
use demand_forecast::types::{default_feature_names, PredictionRequest};
use serde_json::Value;
use tempfile::TempDir;

/// Weekend rows (weekday >= 5) get +4 over a base of `base`.
fn weekend_model(base: f64) -> TrainedModel {
    TrainedModel {
        trees: vec![Tree {
            nodes: vec![
                Node::Split {
                    feature: 1,
                    threshold: 4.5,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: 0.0 },
                Node::Leaf { value: 4.0 },
            ],
        }],
        base_score: base,
        feature_names: default_feature_names(),
        best_iteration: 1,
        params: BoosterParams::default(),
        trained_at: "2024-01-01T00:00:00+00:00".to_string(),
    }
}

fn setup(model: &TrainedModel) -> (TempDir, ForecastConfig) {
    let dir = TempDir::new().unwrap();
    let mut config = ForecastConfig::default().with_base_dir(dir.path());
    config.prediction.confidence_seed = Some(3);
    ArtifactStore::new(config.paths.clone())
        .save_model(model)
        .unwrap();
    (dir, config)
}

fn week_request() -> PredictionRequest {
    PredictionRequest::from_json(r#"{"start_date": "2024-01-01", "end_date": "2024-01-07"}"#)
        .unwrap()
}

#[test]
fn test_synthetic_fallback_seven_days() {
    let (_dir, config) = setup(&weekend_model(10.0));
    let engine = PredictionEngine::new(&config);

    let forecast = engine.forecast(&week_request()).unwrap();
    assert_eq!(forecast.source, "synthetic");
    assert_eq!(forecast.records.len(), 7);
    assert_eq!(
        forecast.records[0].date,
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    );
    for record in &forecast.records {
        assert!(record.predicted_demand >= 0.0);
        assert!((0.7..=0.95).contains(&record.confidence));
        assert_eq!(record.store_id, "CA_1");
        assert_eq!(record.cat_id, "HOBBIES");
    }
    // 2024-01-06 is a Saturday; no category/store given, so multiplier 1.0
    assert_eq!(forecast.records[0].predicted_demand, 10.0);
    assert_eq!(forecast.records[5].predicted_demand, 14.0);
}

#[test]
fn test_synthetic_applies_multipliers_and_clamps() {
    let (_dir, config) = setup(&weekend_model(10.0));
    let request = PredictionRequest::builtin_default(&config.prediction);
    let forecast = PredictionEngine::new(&config).forecast(&request).unwrap();
    // HOBBIES 1.2 × CA_1 1.3, rounded
    assert_eq!(forecast.records[0].predicted_demand, 16.0);

    let (_dir, config) = setup(&weekend_model(-50.0));
    let forecast = PredictionEngine::new(&config).forecast(&week_request()).unwrap();
    assert!(forecast.records.iter().all(|r| r.predicted_demand == 0.0));
}

#[test]
fn test_predict_writes_csv_and_preview() {
    let (_dir, mut config) = setup(&weekend_model(2.0));
    config.prediction.preview_limit = 3;
    let summary = PredictionEngine::new(&config).predict(&week_request()).unwrap();

    assert_eq!(summary.total_predictions, 7);
    assert_eq!(summary.predictions.len(), 3);
    assert_eq!(summary.prediction_period, "2024-01-01 to 2024-01-07");
    assert_eq!(summary.model_version, "GBDT_v1");
    assert_eq!(summary.features_used, default_feature_names());

    let csv = fs::read_to_string(config.paths.predictions_path()).unwrap();
    assert_eq!(csv.lines().count(), 8);
}

#[test]
fn test_feature_file_missing_feature_is_reported() {
    let (_dir, config) = setup(&weekend_model(1.0));
    fs::write(
        config.paths.feature_names_path(),
        r#"["sell_price", "weekday", "year"]"#,
    )
    .unwrap();

    let report = run_stage("Prediction", || {
        PredictionEngine::new(&config).predict(&week_request())
    });
    let value: Value = serde_json::from_str(&report.to_json_line()).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["error_type"], "SchemaError");
    assert!(value["message"].as_str().unwrap().contains("month"));
    assert!(!config.paths.predictions_path().exists());
}

#[test]
fn test_absent_feature_file_uses_model_order() {
    let (_dir, config) = setup(&weekend_model(1.0));
    fs::remove_file(config.paths.feature_names_path()).unwrap();

    let forecast = PredictionEngine::new(&config).forecast(&week_request()).unwrap();
    assert_eq!(forecast.feature_names, default_feature_names());
}

#[test]
fn test_binary_model_fallback() {
    let (_dir, config) = setup(&weekend_model(5.0));
    fs::remove_file(config.paths.model_text_path()).unwrap();

    let engine = PredictionEngine::new(&config);
    let (model, format) = engine.load_model().unwrap();
    assert_eq!(format, ModelFormat::Binary);
    assert_eq!(model.base_score, 5.0);
    assert_eq!(engine.forecast(&week_request()).unwrap().records.len(), 7);
}

#[test]
fn test_reversed_period_is_invalid_shape() {
    let (_dir, config) = setup(&weekend_model(1.0));
    let request = PredictionRequest::from_json(
        r#"{"start_date": "2024-01-07", "end_date": "2024-01-01"}"#,
    )
    .unwrap();
    let result = PredictionEngine::new(&config).forecast(&request);
    assert!(matches!(result, Err(ForecastError::InvalidShape(_))));
}

#[test]
fn test_invalid_request_json_is_invalid_shape() {
    assert!(matches!(
        PredictionRequest::from_json("{not json"),
        Err(ForecastError::InvalidShape(_))
    ));
    assert!(matches!(
        PredictionRequest::from_json(r#"{"start_date": "01/02/2024"}"#),
        Err(ForecastError::InvalidShape(_))
    ));
}

#[test]
fn test_inverted_confidence_bounds_reported_not_panicking() {
    let (_dir, mut config) = setup(&weekend_model(1.0));
    config.prediction.min_confidence = 0.95;
    config.prediction.max_confidence = 0.7;

    let report = run_stage("Prediction", || {
        PredictionEngine::new(&config).predict(&week_request())
    });
    let value: Value = serde_json::from_str(&report.to_json_line()).unwrap();
    assert_eq!(value["status"], "error");
    assert!(value["message"]
        .as_str()
        .unwrap()
        .contains("min_confidence"));
    assert!(!config.paths.predictions_path().exists());
}

#[test]
fn test_unknown_listed_feature_is_reported_missing() {
    let (_dir, config) = setup(&weekend_model(1.0));
    fs::write(
        config.paths.feature_names_path(),
        r#"["sell_price", "weekday", "month", "year", "lag_7"]"#,
    )
    .unwrap();

    match PredictionEngine::new(&config).forecast(&week_request()) {
        Err(ForecastError::MissingFeatures { features }) => {
            assert_eq!(features, vec!["lag_7".to_string()]);
        }
        other => panic!("Expected MissingFeatures, got {:?}", other),
    }
}
