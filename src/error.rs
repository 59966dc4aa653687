use thiserror::Error;

/// Errors surfaced by the analysis, translation and image controllers.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Rejected before any network call was made.
    #[error("{0}")]
    Validation(String),

    /// The server answered with a non-success status.
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// The server reported a terminal failure frame.
    #[error("{0}")]
    Remote(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn validation(msg: impl Into<String>) -> Self {
        IngestError::Validation(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IngestError::Decode(err.to_string())
        } else {
            IngestError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Decode(err.to_string())
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
