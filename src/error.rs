//! Error types for swfpatch
//!
//! Uses `thiserror` for library errors; the binary wraps these in `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for swfpatch operations
pub type SwfPatchResult<T> = Result<T, SwfPatchError>;

/// Main error type for swfpatch operations
#[derive(Error, Debug)]
pub enum SwfPatchError {
    /// Connection-level failure while fetching a resource
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// No response within the configured timeout
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    /// Server answered with an error status
    #[error("HTTP {status} fetching {url}")]
    Http { url: String, status: u16 },

    /// Redirect chain exceeded the hop limit
    #[error("too many redirects fetching {url} (limit {limit})")]
    TooManyRedirects { url: String, limit: u32 },

    /// The external decompiler (or its Java runtime) is not available
    #[error("script tool unavailable: {reason}")]
    ToolMissing { reason: String },

    /// The external decompiler exited with a failure status
    #[error("script tool failed with exit code {exit_code:?}: {stderr_excerpt}")]
    ToolInvocation {
        exit_code: Option<i32>,
        stderr_excerpt: String,
    },

    /// Tool subprocess exited 0 but its expected output is missing
    #[error("script tool reported success but {expected} was not produced")]
    ExtractionIncomplete { expected: PathBuf },

    /// Downloaded tool archive does not match the pinned digest
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// No replacement rule matched in any script file (stale patch set)
    #[error("no replacement applied for hack '{hack_id}' - upstream asset may have changed")]
    NoReplacementApplied { hack_id: String },

    /// Every port in the configured range is occupied
    #[error("no available port in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// Requested path resolves outside the serving root
    #[error("path '{path}' escapes serving root '{root}'")]
    PathEscape { path: PathBuf, root: PathBuf },

    /// Hack definition cannot be deployed as written
    #[error("invalid hack '{hack_id}': {reason}")]
    InvalidHack { hack_id: String, reason: String },

    /// URL could not be parsed
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
