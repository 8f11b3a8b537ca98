//! End-to-end tests: preprocess → train → predict inside a temp directory,
//! plus the stage-level error reports.

use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use demand_forecast::config::ForecastConfig;
use demand_forecast::data_pipeline::preprocess;
use demand_forecast::prediction::PredictionEngine;
use demand_forecast::report::run_stage;
use demand_forecast::trainer::ModelTrainer;
use demand_forecast::types::PredictionRequest;
use serde_json::Value;
use tempfile::TempDir;

const PRODUCTS: usize = 3;
const DAYS: usize = 60;

fn write_raw_inputs(dir: &Path) {
    let input = dir.join("uploads");
    fs::create_dir_all(&input).unwrap();

    let mut sales = String::from("id,item_id,dept_id,cat_id,store_id,state_id");
    for d in 1..=DAYS {
        sales.push_str(&format!(",d_{}", d));
    }
    sales.push('\n');
    for p in 0..PRODUCTS {
        sales.push_str(&format!("ITEM_{p}_CA_1,ITEM_{p},FOODS_1,FOODS,CA_1,CA"));
        for d in 0..DAYS {
            // Weekend bump on top of a per-product level
            let demand = 3 * (p + 1) + if d % 7 >= 5 { 6 } else { 0 };
            sales.push_str(&format!(",{}", demand));
        }
        sales.push('\n');
    }
    fs::write(input.join("sales_train_validation.csv"), sales).unwrap();

    let start = NaiveDate::from_ymd_opt(2016, 1, 4).unwrap();
    let mut calendar = String::from("date,wm_yr_wk,weekday,d,event_name_1,event_type_1\n");
    for d in 0..DAYS {
        let date = start + Duration::days(d as i64);
        let event = if d == 10 { "SuperBowl,Sporting" } else { "," };
        calendar.push_str(&format!(
            "{},{},{},d_{},{}\n",
            date.format("%Y-%m-%d"),
            11600 + d / 7,
            date.format("%A"),
            d + 1,
            event
        ));
    }
    fs::write(input.join("calendar.csv"), calendar).unwrap();

    let mut prices = String::from("store_id,item_id,wm_yr_wk,sell_price\n");
    for p in 0..PRODUCTS {
        // Last week has no price: exercises the zero fill
        for w in 0..(DAYS / 7) {
            prices.push_str(&format!("CA_1,ITEM_{},{},{:.2}\n", p, 11600 + w, 1.5 + p as f64));
        }
    }
    fs::write(input.join("sell_prices.csv"), prices).unwrap();
}

fn config_for(dir: &Path) -> ForecastConfig {
    let mut config = ForecastConfig::default().with_base_dir(dir);
    config.training.min_data_in_leaf = 5;
    config.prediction.confidence_seed = Some(11);
    config
}

fn parse(line: &str) -> Value {
    serde_json::from_str(line).unwrap()
}

#[test]
fn test_full_pipeline_with_history() {
    let dir = TempDir::new().unwrap();
    write_raw_inputs(dir.path());
    let config = config_for(dir.path());

    let report = run_stage("Preprocessing", || preprocess(&config, None));
    let value = parse(&report.to_json_line());
    assert_eq!(value["status"], "success");
    assert_eq!(value["rows_processed"], (PRODUCTS * DAYS) as u64);
    assert_eq!(value["products_loaded"], PRODUCTS as u64);
    assert!(config.paths.long_table_path().exists());

    let summary = ModelTrainer::new(&config).train().unwrap();
    assert_eq!(summary.training_samples + summary.test_samples, PRODUCTS * DAYS);
    // Last 28 days of 60 validate
    assert_eq!(summary.test_samples, PRODUCTS * 28);
    assert!(summary.rmse.is_finite());
    assert!(summary.best_iteration >= 1);
    assert!(config.paths.model_text_path().exists());
    assert!(config.paths.model_binary_path().exists());
    assert!(config.paths.feature_names_path().exists());

    let request = PredictionRequest::from_json(
        r#"{"category": "FOODS", "store": "CA_1", "start_date": "2016-03-01", "end_date": "2016-03-10"}"#,
    )
    .unwrap();
    let summary = PredictionEngine::new(&config).predict(&request).unwrap();
    assert_eq!(summary.total_predictions, 10);
    assert_eq!(summary.feature_source, "history");
    assert_eq!(summary.prediction_period, "2016-03-01 to 2016-03-10");
    assert_eq!(summary.predictions[0].cat_id, "FOODS");
    for p in &summary.predictions {
        assert!((0.7..=0.95).contains(&p.confidence));
    }

    let csv = fs::read_to_string(config.paths.predictions_path()).unwrap();
    assert_eq!(csv.lines().next().unwrap(), "date,store_id,cat_id,predicted_demand");
    assert_eq!(csv.lines().count(), 11);
}

#[test]
fn test_preprocess_product_cap() {
    let dir = TempDir::new().unwrap();
    write_raw_inputs(dir.path());
    let config = config_for(dir.path());

    let summary = preprocess(&config, Some(Some(1))).unwrap();
    assert_eq!(summary.products_loaded, 1);
    assert_eq!(summary.rows_processed, DAYS);
}

#[test]
fn test_preprocess_missing_input_reports_error() {
    let dir = TempDir::new().unwrap();
    write_raw_inputs(dir.path());
    fs::remove_file(dir.path().join("uploads").join("sell_prices.csv")).unwrap();
    let config = config_for(dir.path());

    let value = parse(&run_stage("Preprocessing", || preprocess(&config, None)).to_json_line());
    assert_eq!(value["status"], "error");
    assert_eq!(value["error_type"], "MissingFile");
    assert!(value["message"].as_str().unwrap().contains("sell_prices.csv"));
    assert!(!config.paths.long_table_path().exists());
}

#[test]
fn test_train_without_demand_names_target() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let long_table = config.paths.long_table_path();
    fs::create_dir_all(long_table.parent().unwrap()).unwrap();
    fs::write(&long_table, "date,sell_price\n2016-01-01,2.0\n2016-01-02,2.5\n").unwrap();

    let value = parse(
        &run_stage("Training", || ModelTrainer::new(&config).train()).to_json_line(),
    );
    assert_eq!(value["status"], "error");
    assert_eq!(value["error_type"], "SchemaError");
    assert!(value["message"].as_str().unwrap().contains("demand"));
    assert!(!config.paths.model_text_path().exists());
}

#[test]
fn test_train_without_long_table_is_missing_file() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());

    let value = parse(
        &run_stage("Training", || ModelTrainer::new(&config).train()).to_json_line(),
    );
    assert_eq!(value["status"], "error");
    assert_eq!(value["error_type"], "MissingFile");
}

#[test]
fn test_predict_without_model_is_missing_file() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let request = PredictionRequest::builtin_default(&config.prediction);

    let value = parse(
        &run_stage("Prediction", || PredictionEngine::new(&config).predict(&request))
            .to_json_line(),
    );
    assert_eq!(value["status"], "error");
    assert_eq!(value["error_type"], "MissingFile");
}
