//! Error types for the traversal engine
//!
//! Each layer has its own enum; the resolver classifies recoverable
//! evaluator failures into warnings, so only the variants of [`EngineError`]
//! ever escape a traversal.

use thiserror::Error;

/// Failures reported by a [`crate::traits::graph_store::GraphStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphStoreError {
    /// The per-call deadline elapsed before the query finished.
    #[error("query timeout")]
    Timeout,

    /// The store rejected or failed the statement.
    #[error("query failed: {0}")]
    Query(String),

    /// The store cannot be reached at all.
    #[error("graph database unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by a [`crate::traits::script_sandbox::ScriptSandbox`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// The expression exceeded its deadline.
    #[error("evaluation timeout")]
    Timeout,

    /// The expression touched something outside the whitelist.
    #[error("forbidden operation: {0}")]
    Denied(String),

    /// The expression failed to parse or raised during evaluation.
    #[error("evaluation failed: {0}")]
    Eval(String),
}

/// Errors that escape the traversal and reach the caller.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing or malformed `sectionId`, or a declared input parameter was
    /// not supplied.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No active version exists for the requested section.
    #[error("section '{0}' not found")]
    SectionNotFound(String),

    /// An action body failed; action side effects are meant to be
    /// observable, so this is not downgraded to a warning.
    #[error("action '{action_id}' failed: {message}")]
    ActionFailed { action_id: String, message: String },

    /// The graph store cannot be reached.
    #[error("graph database unavailable: {0}")]
    Unavailable(String),

    /// A bug, not an expected failure mode.
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable kind string for the error body's `errorType` field.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "InvalidRequest",
            EngineError::SectionNotFound(_) => "SectionNotFound",
            EngineError::ActionFailed { .. } => "QueryError",
            EngineError::Unavailable(_) => "Unavailable",
            EngineError::Internal(_) => "Internal",
        }
    }

    /// True for domain errors the HTTP layer maps to 409; unavailability and
    /// internal faults map to 500.
    pub fn is_domain_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidRequest(_)
                | EngineError::SectionNotFound(_)
                | EngineError::ActionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            EngineError::SectionNotFound("SEC_PI".to_string()).to_string(),
            "section 'SEC_PI' not found"
        );
        assert_eq!(GraphStoreError::Timeout.to_string(), "query timeout");
        assert_eq!(
            SandboxError::Denied("dunder access".to_string()).to_string(),
            "forbidden operation: dunder access"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            EngineError::InvalidRequest("x".to_string()).kind(),
            "InvalidRequest"
        );
        assert_eq!(
            EngineError::ActionFailed {
                action_id: "A1".to_string(),
                message: "boom".to_string()
            }
            .kind(),
            "QueryError"
        );
        assert!(EngineError::SectionNotFound("s".to_string()).is_domain_error());
        assert!(!EngineError::Unavailable("down".to_string()).is_domain_error());
    }
}
