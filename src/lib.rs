//! YOLO object detection exposed as a long-lived worker process.

pub mod config;
pub mod detector;
pub mod error;
pub mod logger;
pub mod model_manager;
pub mod predict;
pub mod results;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use model_manager::ModelManager;
