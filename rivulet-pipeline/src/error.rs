//! Error types for rivulet-pipeline
//!
//! Construction failures are returned synchronously through `Result`.
//! Failures reported by the running engine never come back as `Err`; they are
//! published as `PipelineEvent::Error`.

use thiserror::Error;

/// Main error type for the pipeline controller
#[derive(Error, Debug)]
pub enum Error {
    /// The processing graph could not be assembled; the instance must be discarded
    #[error("Graph build failed: {0}")]
    GraphBuildFailed(String),

    /// Two stages could not be linked
    #[error("Cannot link {from} to {to}")]
    Link { from: String, to: String },

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A location the engine cannot be given
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors bubbled up from the common crate
    #[error(transparent)]
    Common(#[from] rivulet_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the pipeline Error
pub type Result<T> = std::result::Result<T, Error>;
