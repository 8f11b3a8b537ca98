//! Stage results and the top-level stage boundary.
//!
//! Each stage ends by printing one JSON object carrying `status`
//! (`success` | `error`) and `message`. Success objects also carry the
//! stage summary fields at the top level.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ErrorKind, ForecastError, ForecastResult};
use crate::logger::Logger;

/// Outcome of a whole stage.
#[derive(Debug, Clone)]
pub enum StageReport<T> {
    Success { message: String, payload: T },
    Error { message: String, kind: ErrorKind },
}

impl<T: Serialize> StageReport<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, StageReport::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            StageReport::Success { message, .. } | StageReport::Error { message, .. } => message,
        }
    }

    /// Flat JSON object: status, message, then payload fields or the error kind.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        match self {
            StageReport::Success { message, payload } => {
                object.insert("status".into(), Value::from("success"));
                object.insert("message".into(), Value::from(message.as_str()));
                match serde_json::to_value(payload) {
                    Ok(Value::Object(fields)) => object.extend(fields),
                    Ok(Value::Null) => {}
                    Ok(other) => {
                        object.insert("result".into(), other);
                    }
                    Err(e) => {
                        object.insert("status".into(), Value::from("error"));
                        object.insert(
                            "message".into(),
                            Value::from(format!("Failed to serialize result: {}", e)),
                        );
                        object.insert("error_type".into(), json_kind(ErrorKind::Other));
                    }
                }
            }
            StageReport::Error { message, kind } => {
                object.insert("status".into(), Value::from("error"));
                object.insert("message".into(), Value::from(message.as_str()));
                object.insert("error_type".into(), json_kind(*kind));
            }
        }
        Value::Object(object)
    }

    /// The single trailing stdout line.
    pub fn to_json_line(&self) -> String {
        self.to_value().to_string()
    }
}

fn json_kind(kind: ErrorKind) -> Value {
    serde_json::to_value(kind).unwrap_or(Value::Null)
}

/// Run a stage body, converting any failure into an error report.
///
/// A panic inside the body is caught and reported like any other error.
pub fn run_stage<T, F>(stage: &str, body: F) -> StageReport<T>
where
    F: FnOnce() -> ForecastResult<T>,
{
    let logger = Logger::new(stage);
    let result = catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        Err(ForecastError::internal(format!(
            "panic: {}",
            panic_message(payload.as_ref())
        )))
    });
    match result {
        Ok(payload) => StageReport::Success {
            message: format!("{} completed successfully", stage),
            payload,
        },
        Err(err) => {
            logger.error(&err.to_string());
            StageReport::Error {
                message: format!("{} failed: {}", stage, err),
                kind: err.kind(),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Rows {
        rows_processed: usize,
    }

    #[test]
    fn test_success_flattens_payload() {
        let report = run_stage("Preprocessing", || Ok(Rows { rows_processed: 4 }));
        assert!(report.is_success());

        let value: Value = serde_json::from_str(&report.to_json_line()).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["rows_processed"], 4);
        assert_eq!(value["message"], "Preprocessing completed successfully");
    }

    #[test]
    fn test_error_carries_kind_and_message() {
        let report: StageReport<Rows> = run_stage("Training", || {
            Err(ForecastError::missing_column("demand", "preprocessed data"))
        });
        assert!(!report.is_success());
        assert!(report.message().starts_with("Training failed: "));

        let value = report.to_value();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_type"], "SchemaError");
        assert!(value["message"].as_str().unwrap().contains("demand"));
    }

    #[test]
    fn test_json_line_is_single_line() {
        let report = run_stage("Prediction", || Ok(Rows { rows_processed: 1 }));
        assert!(!report.to_json_line().contains('\n'));
    }

    #[test]
    fn test_panic_becomes_error_report() {
        let report: StageReport<Rows> = run_stage("Prediction", || {
            let bounds: Vec<f64> = Vec::new();
            Ok(Rows {
                rows_processed: bounds[3] as usize,
            })
        });
        assert!(!report.is_success());

        let value = report.to_value();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_type"], "Other");
        assert!(value["message"]
            .as_str()
            .unwrap()
            .starts_with("Prediction failed: "));
    }
}
