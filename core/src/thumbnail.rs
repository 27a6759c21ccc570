//! Thumbnail URL resolution.
//!
//! The resolver endpoint answers with a status line followed by either a
//! path (`1`) or a diagnostic message (`0`). Anything else, typically an
//! HTML error page, is treated as a hiccup and the request is re-issued,
//! at most `MAX_ATTEMPTS` times in total.

use tracing::warn;

use crate::error::{ApiError, Result};

pub const MAX_ATTEMPTS: usize = 3;

/// Decoded resolver response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailStatus {
    /// Status `0`: the server reports an error; the message follows.
    NoThumbnail(String),
    /// Status `1` with a server-relative path.
    Found(String),
    /// Unrecognised status line, or `1` without a path.
    Ambiguous(String),
}

pub fn decode(body: &str) -> ThumbnailStatus {
    let (status, rest) = body.split_once('\n').unwrap_or((body, ""));
    match status.trim() {
        "0" => ThumbnailStatus::NoThumbnail(rest.trim().to_string()),
        "1" => {
            let path = rest.lines().next().unwrap_or("").trim();
            if path.is_empty() {
                ThumbnailStatus::Ambiguous(rest.trim().to_string())
            } else {
                ThumbnailStatus::Found(path.to_string())
            }
        }
        _ => ThumbnailStatus::Ambiguous(rest.trim().to_string()),
    }
}

/// Fetch and decode until a definite answer arrives or attempts run out.
///
/// Returns the server-relative path on success.
pub fn resolve<F>(entity_type: &str, entity_id: i64, mut fetch: F) -> Result<String>
where
    F: FnMut() -> Result<String>,
{
    let mut detail = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
        match decode(&fetch()?) {
            ThumbnailStatus::Found(path) => return Ok(path),
            ThumbnailStatus::NoThumbnail(message) => {
                detail = message;
                break;
            }
            ThumbnailStatus::Ambiguous(rest) => {
                warn!(entity_type, entity_id, attempt, "ambiguous thumbnail response");
                detail = rest;
            }
        }
    }
    if detail.is_empty() {
        detail = format!("no usable response after {MAX_ATTEMPTS} attempts");
    }
    Err(ApiError::Thumbnail {
        entity_type: entity_type.to_string(),
        entity_id,
        detail,
    })
}
