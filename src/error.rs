use serde_json::json;
use thiserror::Error;

/// Failures raised by the grading engine.
///
/// Batch paths capture these per row; single-entry paths hand them straight
/// back to the caller via [`EngineError::code`] and the message.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Out-of-range or malformed value.
    #[error("{0}")]
    Validation(String),

    /// Unresolvable identifier or unknown entity.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Missing maxMarks, malformed grade scale, or bad stored settings.
    /// Always fatal for the assessment being graded.
    #[error("{0}")]
    Configuration(String),

    /// Optimistic version check failed on a single-entry upsert.
    #[error("grade record version is {actual}, expected {expected}")]
    Conflict { expected: i64, actual: i64 },

    /// Structurally unusable input (bad CSV header, oversized batch).
    #[error("{0}")]
    Malformed(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "bad_params",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Configuration(_) => "config_invalid",
            EngineError::Conflict { .. } => "conflict",
            EngineError::Malformed(_) => "bad_input",
            EngineError::Store(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::NotFound { what, id } => Some(json!({ "entity": what, "id": id })),
            EngineError::Conflict { expected, actual } => {
                Some(json!({ "expectedVersion": expected, "actualVersion": actual }))
            }
            _ => None,
        }
    }
}
