use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::detector::Device;
use crate::error::{WorkerError, WorkerResult};

/// Worker configuration. Every field has a default so a partial JSON file
/// (or none at all) is valid.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Identifier loaded when no usable model path is requested.
    pub default_model: String,
    pub device: Device,
    pub intra_threads: usize,
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Appended to the input stem when naming the annotated image.
    pub output_suffix: String,
    pub log_level: String,
    pub log_dir: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_model: "yolov8n.onnx".to_string(),
            device: Device::Cpu,
            intra_threads: 2,
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
            output_suffix: "_predicted".to_string(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

const ENV_DEFAULT_MODEL: &str = "YOLO_WORKER_DEFAULT_MODEL";
const ENV_DEVICE: &str = "YOLO_WORKER_DEVICE";
const ENV_THREADS: &str = "YOLO_WORKER_THREADS";
const ENV_LOG_LEVEL: &str = "YOLO_WORKER_LOG_LEVEL";
const ENV_LOG_DIR: &str = "YOLO_WORKER_LOG_DIR";

impl WorkerConfig {
    /// Defaults, then the optional JSON file, then environment overrides.
    pub fn load(config_path: Option<&str>) -> WorkerResult<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> WorkerResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            WorkerError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            WorkerError::Config(format!("Invalid config file {}: {e}", path.display()))
        })
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> WorkerResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup(ENV_DEFAULT_MODEL).filter(|v| !v.trim().is_empty()) {
            self.default_model = model;
        }
        if let Some(device) = lookup(ENV_DEVICE) {
            self.device = device
                .parse()
                .map_err(|e| WorkerError::Config(format!("{ENV_DEVICE}: {e}")))?;
        }
        if let Some(threads) = lookup(ENV_THREADS) {
            self.intra_threads = threads.trim().parse().map_err(|_| {
                WorkerError::Config(format!("{ENV_THREADS} must be a positive integer, got {threads:?}"))
            })?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            self.log_dir = if dir.trim().is_empty() { None } else { Some(dir) };
        }
        Ok(())
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if self.default_model.trim().is_empty() {
            return Err(WorkerError::Config("default_model must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return Err(WorkerError::Config("conf_threshold must be between 0.0 and 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(WorkerError::Config("iou_threshold must be between 0.0 and 1.0".into()));
        }
        if self.input_size == 0 || self.input_size % 32 != 0 {
            return Err(WorkerError::Config(format!(
                "input_size must be a positive multiple of 32, got {}",
                self.input_size
            )));
        }
        if self.intra_threads == 0 {
            return Err(WorkerError::Config("intra_threads must be at least 1".into()));
        }
        if self.max_detections == 0 {
            return Err(WorkerError::Config("max_detections must be at least 1".into()));
        }
        if self.output_suffix.is_empty() {
            return Err(WorkerError::Config("output_suffix must not be empty".into()));
        }
        Ok(())
    }
}
