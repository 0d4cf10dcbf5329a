// Error types for query compilation and request handling.

use thiserror::Error;

/// Errors raised for caller specification problems.
///
/// Per-feature data issues (missing properties, unparseable feature geometry)
/// never surface here; they only make a predicate fail for that feature.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A clause whose range, category set or shape is invalid.
    #[error("Malformed clause: {0}")]
    MalformedClause(String),

    /// Spatial relation name that is not supported.
    #[error("Unknown spatial relation: {0}")]
    UnknownRelation(String),

    /// Reference geometry of a spatial clause could not be parsed.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Spatial clause refers to a layer that was not supplied.
    #[error("Unknown structure: {0}")]
    UnknownStructure(String),

    /// Request envelope is missing fields or has the wrong shape.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
