use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Network request failed outside of a job (e.g. client construction)
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Submitted request is malformed or empty
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Credentials were rejected or no session could be established
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
    /// Invalid URL format
    #[error("Invalid URL: {0}")]
    UrlError(String),
    /// Unknown task identifier
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    /// Another task is still running and tasks are exclusive
    #[error("Task {0} is already running; wait for it to finish")]
    TaskAlreadyRunning(String),
    /// A download task ended without any successful download
    #[error("Download task {0} did not complete: {1}")]
    TaskFailed(String, String),
    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// IO operation failed
    #[error("IO error: {0}")]
    IoError(String),
}

// Conversion implementations for common errors
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::NetworkError(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::UrlError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

// Custom type alias for Results in this application
pub type AppResult<T> = Result<T, AppError>;
