/// Result alias that carries the custom [`TessellationError`] type.
pub type Result<T> = std::result::Result<T, TessellationError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum TessellationError {
    /// Free-form failure surfaced with a readable message.
    #[error("{0}")]
    Message(String),
    /// The audio output context could not be acquired. Audio stays off for
    /// the rest of the session.
    #[error("audio initialization failed: {0}")]
    AudioInit(String),
    /// A single audio node operation failed.
    #[error("audio node failure: {0}")]
    Audio(String),
    /// Subdivision depth outside what the caller accepts.
    #[error("unsupported complexity {0}")]
    InvalidComplexity(u32),
    #[error("unknown transformation kind `{0}`")]
    UnknownTransform(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl TessellationError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a per-node audio failure.
    pub fn audio<T: Into<String>>(msg: T) -> Self {
        Self::Audio(msg.into())
    }
}

impl From<&str> for TessellationError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for TessellationError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
