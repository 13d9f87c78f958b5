//! Wire types for the worker protocol.
//!
//! Requests are JSON objects, one per line, on stdin. Responses are
//! prefix-tagged lines on stdout: `READY:`, `ERROR:` and `RESULT:<json>`.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::WorkerError;
use crate::results::{DetectionRecord, StatsSummary};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PredictRequest {
    /// Required; a missing or non-string value is reported as a failed RESULT.
    pub image_path: Option<String>,
    pub model_path: Option<String>,
    pub output_dir: Option<String>,
}

/// One decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Predict(PredictRequest),
    Reload { model_path: Option<String> },
    Shutdown,
    /// Any other action value; `None` when the field was missing.
    Unknown(Option<String>),
}

/// String value of `field`; absent, null and non-string values read as `None`.
fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    object.get(field).and_then(Value::as_str).map(str::to_string)
}

impl Command {
    /// Decode one non-blank request line. Only a line that is not a JSON
    /// object is a decode error; each action reads the fields it uses and
    /// ignores the rest.
    pub fn decode(line: &str) -> Result<Command, WorkerError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| WorkerError::Decode(e.to_string()))?;
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(WorkerError::Decode(format!("Expected a JSON object, got {other}")))
            }
        };

        let action = match object.get("action") {
            None | Some(Value::Null) => return Ok(Command::Unknown(None)),
            Some(Value::String(action)) => action.as_str(),
            Some(other) => return Ok(Command::Unknown(Some(other.to_string()))),
        };

        Ok(match action {
            "predict" => Command::Predict(PredictRequest {
                image_path: string_field(&object, "image_path"),
                model_path: string_field(&object, "model_path"),
                output_dir: string_field(&object, "output_dir"),
            }),
            "reload" => Command::Reload {
                model_path: string_field(&object, "model_path"),
            },
            "shutdown" => Command::Shutdown,
            other => Command::Unknown(Some(other.to_string())),
        })
    }
}

/// Body of a `RESULT:` line.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Outcome {
    Detections {
        input_image: String,
        output_image: String,
        detections: Vec<DetectionRecord>,
        stats: StatsSummary,
        model_used: String,
    },
    Failure {
        error: String,
        error_kind: String,
    },
}

impl InferenceResponse {
    pub fn ok(
        input_image: String,
        output_image: String,
        detections: Vec<DetectionRecord>,
        stats: StatsSummary,
        model_used: String,
    ) -> Self {
        Self {
            success: true,
            outcome: Outcome::Detections {
                input_image,
                output_image,
                detections,
                stats,
                model_used,
            },
        }
    }

    pub fn error(err: &WorkerError) -> Self {
        Self::error_message(err.to_string(), err.kind())
    }

    pub fn error_message(message: impl Into<String>, kind: &str) -> Self {
        Self {
            success: false,
            outcome: Outcome::Failure {
                error: message.into(),
                error_kind: kind.to_string(),
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":"Failed to serialize response: {e}","error_kind":"io"}}"#)
        })
    }
}

/// One line written to the response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseLine {
    /// Untagged progress text (startup banner, shutdown acknowledgement).
    Plain(String),
    Ready(String),
    Error(String),
    Result(InferenceResponse),
}

/// Keep every response on a single line.
fn single_line(message: &str) -> String {
    message.replace(['\r', '\n'], " ")
}

impl fmt::Display for ResponseLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseLine::Plain(message) => write!(f, "{}", single_line(message)),
            ResponseLine::Ready(message) => write!(f, "READY:{}", single_line(message)),
            ResponseLine::Error(message) => write!(f, "ERROR:{}", single_line(message)),
            ResponseLine::Result(response) => write!(f, "RESULT:{}", response.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_decode_predict_full() {
        let cmd = Command::decode(
            r#"{"action":"predict","image_path":"a.jpg","model_path":"best.onnx","output_dir":"out"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Predict(PredictRequest {
                image_path: Some("a.jpg".into()),
                model_path: Some("best.onnx".into()),
                output_dir: Some("out".into()),
            })
        );
    }

    #[test]
    fn test_decode_predict_nulls() {
        let cmd =
            Command::decode(r#"{"action":"predict","image_path":"a.jpg","model_path":null,"output_dir":null}"#)
                .unwrap();
        let Command::Predict(req) = cmd else { panic!("expected predict") };
        assert_eq!(req.model_path, None);
        assert_eq!(req.output_dir, None);
    }

    #[test]
    fn test_decode_reload_and_shutdown() {
        assert_eq!(
            Command::decode(r#"{"action":"reload","model_path":"/missing/path.onnx"}"#).unwrap(),
            Command::Reload { model_path: Some("/missing/path.onnx".into()) }
        );
        assert_eq!(
            Command::decode(r#"{"action":"reload"}"#).unwrap(),
            Command::Reload { model_path: None }
        );
        assert_eq!(Command::decode(r#"{"action":"shutdown"}"#).unwrap(), Command::Shutdown);
    }

    #[test]
    fn test_decode_unknown_and_missing_action() {
        assert_eq!(
            Command::decode(r#"{"action":"dance"}"#).unwrap(),
            Command::Unknown(Some("dance".into()))
        );
        assert_eq!(Command::decode(r#"{"image_path":"a.jpg"}"#).unwrap(), Command::Unknown(None));
    }

    #[test]
    fn test_decode_malformed() {
        assert_eq!(Command::decode("not-json").unwrap_err().kind(), "decode");
        assert_eq!(Command::decode("[1,2,3]").unwrap_err().kind(), "decode");
        assert_eq!(Command::decode("\"predict\"").unwrap_err().kind(), "decode");
    }

    #[test]
    fn test_decode_mistyped_fields() {
        assert_eq!(
            Command::decode(r#"{"action":"shutdown","model_path":5}"#).unwrap(),
            Command::Shutdown
        );
        assert_eq!(
            Command::decode(r#"{"action":"reload","model_path":["a.onnx"]}"#).unwrap(),
            Command::Reload { model_path: None }
        );
        assert_eq!(
            Command::decode(r#"{"action":"predict","image_path":5,"output_dir":"out"}"#).unwrap(),
            Command::Predict(PredictRequest {
                image_path: None,
                model_path: None,
                output_dir: Some("out".into()),
            })
        );
        assert_eq!(
            Command::decode(r#"{"action":5}"#).unwrap(),
            Command::Unknown(Some("5".into()))
        );
        assert_eq!(Command::decode(r#"{"action":null}"#).unwrap(), Command::Unknown(None));
    }

    #[test]
    fn test_response_line_framing() {
        assert_eq!(ResponseLine::Ready("Model reloaded".into()).to_string(), "READY:Model reloaded");
        assert_eq!(ResponseLine::Error("bad\nthing".into()).to_string(), "ERROR:bad thing");
        assert_eq!(ResponseLine::Plain("Loading".into()).to_string(), "Loading");
    }

    #[test]
    fn test_failure_response_json() {
        let err = WorkerError::ImageIo("cannot decode x.jpg".into());
        let line = ResponseLine::Result(InferenceResponse::error(&err)).to_string();
        let json: Value = serde_json::from_str(line.strip_prefix("RESULT:").unwrap()).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "image_io");
        assert!(json["error"].as_str().unwrap().contains("x.jpg"));
        assert!(json.get("detections").is_none());
    }

    #[test]
    fn test_success_response_json() {
        let response = InferenceResponse::ok(
            "a.jpg".into(),
            "a_predicted.jpg".into(),
            Vec::new(),
            StatsSummary::default(),
            "yolov8n.onnx".into(),
        );
        let json: Value = serde_json::from_str(&response.to_json()).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["output_image"], "a_predicted.jpg");
        assert_eq!(json["detections"], serde_json::json!([]));
        assert_eq!(json["stats"]["total_detections"], 0);
        assert!(json.get("error").is_none());
    }
}
