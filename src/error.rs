//! Closed error-kind set for the retrieval/arbitration core.
//!
//! Library functions return `Result<T, CoreError>` so the dispatcher can
//! match on `.code()` to build the envelope's `result.error = {code, message}`
//! without downcasting strings. `anyhow::Result` is still used at the
//! CLI/server boundary for I/O that isn't part of the closed set.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid ref: {0}")]
    InvalidRef(String),

    #[error("traversal blocked in ref: {0}")]
    TraversalBlocked(String),

    #[error("baseline commit could not be resolved and no fallback cache exists: {0}")]
    CanonTargetUnknown(String),

    #[error("fetch failed and no fallback cache exists: {0}")]
    FetchFailed(String),

    #[error("document not found: {0}")]
    DocNotFound(String),

    #[error("index stale, rebuild required")]
    IndexStale,

    #[error("uri collision: {0}")]
    UriCollision(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("input required for action {0}")]
    InputRequired(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// The stable string code surfaced in `result.error.code` (§7).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidRef(_) => "INVALID_REF",
            CoreError::TraversalBlocked(_) => "TRAVERSAL_BLOCKED",
            CoreError::CanonTargetUnknown(_) => "CANON_TARGET_UNKNOWN",
            CoreError::FetchFailed(_) => "FETCH_FAILED",
            CoreError::DocNotFound(_) => "DOC_NOT_FOUND",
            CoreError::IndexStale => "INDEX_STALE",
            CoreError::UriCollision(_) => "URI_COLLISION",
            CoreError::UnknownAction(_) => "UNKNOWN_ACTION",
            CoreError::InputRequired(_) => "INPUT_REQUIRED",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Json(_) => "JSON_ERROR",
        }
    }

    /// Does this error invalidate the whole request (§7 policy), or can the
    /// pipeline recover locally and just record a warning?
    pub fn invalidates_request(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownAction(_)
                | CoreError::InputRequired(_)
                | CoreError::InvalidRef(_)
                | CoreError::TraversalBlocked(_)
        )
    }

    pub fn to_error_object(&self) -> serde_json::Value {
        serde_json::json!({ "code": self.code(), "message": self.to_string() })
    }
}
