use thiserror::Error;

/// Every failure the worker can report. Each variant maps to one stable
/// `kind()` tag that is echoed back to callers in failed responses.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to load model at startup: {0}")]
    StartupLoad(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Invalid JSON command: {0}")]
    Decode(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Image error: {0}")]
    ImageIo(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::StartupLoad(_) => "startup_load",
            WorkerError::ModelLoad(_) => "model_load",
            WorkerError::Decode(_) => "decode",
            WorkerError::InvalidCommand(_) => "invalid_command",
            WorkerError::ImageIo(_) => "image_io",
            WorkerError::Inference(_) => "inference",
            WorkerError::UnknownAction(_) => "unknown_action",
            WorkerError::Config(_) => "config",
            WorkerError::Io(_) => "io",
        }
    }

    /// Only a failed startup load takes the whole process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::StartupLoad(_))
    }
}

impl From<image::ImageError> for WorkerError {
    fn from(e: image::ImageError) -> Self {
        WorkerError::ImageIo(e.to_string())
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(WorkerError::ModelLoad("x".into()).kind(), "model_load");
        assert_eq!(WorkerError::ImageIo("x".into()).kind(), "image_io");
        assert_eq!(WorkerError::UnknownAction("x".into()).kind(), "unknown_action");
    }

    #[test]
    fn test_only_startup_load_is_fatal() {
        assert!(WorkerError::StartupLoad("boom".into()).is_fatal());
        assert!(!WorkerError::ModelLoad("boom".into()).is_fatal());
        assert!(!WorkerError::Inference("boom".into()).is_fatal());
    }

    #[test]
    fn test_io_error_converts() {
        let err: WorkerError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("gone"));
    }
}
