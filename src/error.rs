//! Error types for Strata
//!
//! All modules use `StrataResult<T>` as their return type. A compilation is
//! all-or-nothing: every error aborts the invocation and no partial state is
//! returned to the caller.

use thiserror::Error;

/// Result type alias for Strata operations
pub type StrataResult<T> = Result<T, StrataError>;

/// All errors that can occur while compiling a build plan
#[derive(Error, Debug)]
pub enum StrataError {
    // Graph structure errors
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("dependency violation: {step} waiting for unprocessed parent {parent}")]
    DependencyViolation { step: String, parent: String },

    #[error("parent {parent} of {step} has nil state")]
    MissingParentState { step: String, parent: String },

    // Plan reference errors
    #[error("cache with key \"{0}\" not found")]
    CacheNotFound(String),

    #[error("asset \"{asset}\" not found in step {step}")]
    AssetNotFound { asset: String, step: String },

    #[error("first input of step {0} must not have include or exclude paths")]
    FirstInputFiltered(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StrataError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
