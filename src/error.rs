//! Error types for voxhold.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxholdError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Model lifecycle errors
    #[error("Model file not found at {path}")]
    ModelNotFound { path: String },

    #[error("Failed to load {backend} model: {message}")]
    ModelLoad { backend: String, message: String },

    #[error("No model is prepared")]
    NotPrepared,

    #[error("Recognizer manager has been shut down")]
    ManagerClosed,

    // Stream errors
    #[error("Failed to create recognition stream: {message}")]
    StreamCreate { message: String },

    #[error("Stream {operation} failed: {message}")]
    StreamOperation { operation: String, message: String },

    #[error("Sample rate mismatch: model expects {expected} Hz, got {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("Inference backend panicked during {operation}")]
    BackendPanicked { operation: String },

    // Audio file errors
    #[error("Audio file error: {message}")]
    Audio { message: String },

    // Runtime errors
    #[error("Background task failed: {message}")]
    Task { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxholdError>;

impl From<tokio::task::JoinError> for VoxholdError {
    fn from(e: tokio::task::JoinError) -> Self {
        VoxholdError::Task {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxholdError::ConfigInvalidValue {
            key: "retention.idle_timeout".to_string(),
            message: "expected a duration like 30s".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for retention.idle_timeout: expected a duration like 30s"
        );
    }

    #[test]
    fn test_model_load_display() {
        let error = VoxholdError::ModelLoad {
            backend: "whisper".to_string(),
            message: "out of memory".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to load whisper model: out of memory"
        );
    }

    #[test]
    fn test_stream_operation_display() {
        let error = VoxholdError::StreamOperation {
            operation: "decode".to_string(),
            message: "invalid state".to_string(),
        };
        assert_eq!(error.to_string(), "Stream decode failed: invalid state");
    }

    #[test]
    fn test_sample_rate_mismatch_display() {
        let error = VoxholdError::SampleRateMismatch {
            expected: 16000,
            actual: 44100,
        };
        assert_eq!(
            error.to_string(),
            "Sample rate mismatch: model expects 16000 Hz, got 44100 Hz"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxholdError = io_error.into();
        assert!(error.to_string().contains("file not found"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxholdError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[tokio::test]
    async fn test_from_join_error() {
        let handle = tokio::spawn(async { panic!("boom") });
        let join_error = handle.await.unwrap_err();
        let error: VoxholdError = join_error.into();
        assert!(matches!(error, VoxholdError::Task { .. }));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxholdError>();
        assert_sync::<VoxholdError>();
    }
}
