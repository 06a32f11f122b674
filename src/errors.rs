use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendFailure),

    #[error("Vision error: {0}")]
    Vision(String),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Store data error: {0}")]
    StoreData(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Serialize for AnchorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AnchorResult<T> = Result<T, AnchorError>;

/// A structural query against the OS backend raised.
///
/// Serializable so it can travel back from an isolated worker unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{operation} failed: {message}")]
pub struct BackendFailure {
    pub operation: String,
    pub message: String,
}

impl BackendFailure {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
