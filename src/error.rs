use thiserror::Error;

/// Main error type for the deep search engine
#[derive(Error, Debug)]
pub enum DeepScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Root path unavailable: {path} ({reason})")]
    RootPathUnavailable { path: String, reason: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Memory mapping error: {0}")]
    Mmap(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

/// Result type alias for deep search operations
pub type Result<T> = std::result::Result<T, DeepScanError>;
