//! Crate-level error types.
//!
//! Every fallible operation in the crate returns [`ClientError`]. Input
//! problems that are caught before any network call are grouped under
//! [`ValidationError`] so front ends can show them as warnings instead of
//! failures.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Input rejected before any request is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("the question is empty")]
    EmptyQuestion,
    #[error("select at least one model")]
    NoModelsSelected,
    #[error("no OCR model selected")]
    MissingOcrModel,
    #[error("no image provided for OCR")]
    MissingImage,
    #[error("a generation is already in progress")]
    SessionActive,
    #[error("there is no completed answer to regenerate")]
    NothingToRegenerate,
    #[error("model identifier '{0}' must look like 'provider::model'")]
    InvalidModelId(String),
    #[error("image is {bytes} bytes, the limit is 4 MiB")]
    WallpaperTooLarge { bytes: usize },
    #[error("'{0}' is not an image type")]
    NotAnImage(String),
    #[error("{field} must be between 0 and 100, got {value}")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("unsupported language '{0}' (expected zh or en)")]
    UnknownLanguage(String),
    #[error("unsupported theme '{0}' (expected dark or light)")]
    UnknownTheme(String),
}

/// Errors surfaced by the client library.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The TCP connection or request could not be established.
    #[error("could not reach {url}: {detail}")]
    Connect { url: String, detail: String },

    /// The backend replied with a non-2xx status.
    #[error("HTTP {status} from {url}: {detail}")]
    Http {
        status: u16,
        url: String,
        detail: String,
    },

    /// A response body did not have the expected JSON shape.
    #[error("unexpected response from {url}: {detail}")]
    Decode { url: String, detail: String },

    /// The response body failed mid-stream.
    #[error("stream interrupted: {0}")]
    Transport(String),

    /// The backend sent an `error` event.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("stream ended before a final result arrived")]
    IncompleteStream,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// True when the error was raised locally before any request.
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
