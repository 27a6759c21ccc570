//! Error types for the entity-service client.
//!
//! # Design
//! Validation problems are caught before any network traffic and land in
//! `Validation`. Remote faults keep the server's code and message so callers
//! can branch on them. The semantic failures of the side endpoints (upload,
//! download, thumbnail lookup) get their own variants so they are not
//! mistaken for a plain transport failure.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by `Shotgun` operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The client configuration is unusable (bad URL, bad proxy, zero page size).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The request was rejected locally before anything was sent.
    #[error("{0}")]
    Validation(String),

    /// The remote service answered with a fault instead of a result.
    #[error("fault {code}: {message}")]
    Fault { code: i64, message: String },

    /// Connection failure or unexpected HTTP status.
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The response did not have the shape the protocol promises.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The upload endpoint answered without the success marker.
    #[error("could not upload file successfully\npath: {path}\nurl: {url}\nerror: {response}")]
    UploadFailed {
        path: String,
        url: String,
        response: String,
    },

    /// The download endpoint served an HTML error page instead of the file.
    #[error("the server generated an error trying to download the attachment\nurl: {url}\nserver response: {response}")]
    DownloadFailed { url: String, response: String },

    /// The thumbnail resolver reported an error or never gave a usable answer.
    #[error("thumbnail lookup for {entity_type}:{entity_id} failed: {detail}")]
    Thumbnail {
        entity_type: String,
        entity_id: i64,
        detail: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApiError {
    /// Returns the remote fault code if this error came from the server.
    pub fn fault_code(&self) -> Option<i64> {
        match self {
            ApiError::Fault { code, .. } => Some(*code),
            _ => None,
        }
    }
}
