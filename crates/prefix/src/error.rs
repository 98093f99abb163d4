use thiserror::Error;

/// Errors raised while building or running a prefix encoder.
#[derive(Debug, Error)]
pub enum PrefixError {
    /// The configuration cannot describe a valid encoder.
    #[error("invalid prefix configuration: {0}")]
    Configuration(String),
    /// An input tensor does not satisfy the documented shape or range contract.
    #[error("shape error: {0}")]
    Shape(String),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PrefixError>;
