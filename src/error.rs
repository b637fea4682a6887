//! Error taxonomy shared by the pipeline, storage, and federation code.

use thiserror::Error;

/// Everything that can go wrong while saving or replicating a post.
#[derive(Error, Debug)]
pub enum Error {
    /// A save was rejected before anything was written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Rendering the raw body to HTML failed.
    #[error("rendering failed: {0}")]
    Render(String),

    /// A remote post URL does not match `scheme://domain/slug[.json]`.
    #[error("malformed post url: {0}")]
    MalformedUrl(String),

    /// A fetched representation disagrees with the address it was served
    /// from, or with its own body.
    #[error("corrupted post data: {0}")]
    CorruptData(String),

    /// Transport failure, timeout, or non-success response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Another post already holds a unique value. Callers may retry their
    /// read-merge-write sequence.
    #[error("{field} already taken: {value}")]
    Conflict { field: &'static str, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
