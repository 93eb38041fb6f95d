//! Error taxonomy shared by every pipeline stage

use iql_ast::ParseError;
use iql_registry::{OperationKind, ParamType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Kind of a pipeline failure. Metrics attribute failures by kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SyntaxError,
    UnsupportedOperation,
    ArityMismatch,
    TypeMismatch,
    UnresolvedSimilarityValue,
    RuntimeInvocationFault,
}

impl ErrorKind {
    pub fn is_syntax(&self) -> bool {
        matches!(self, ErrorKind::SyntaxError)
    }

    /// Failures of a well-formed text against the registry
    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnsupportedOperation
                | ErrorKind::ArityMismatch
                | ErrorKind::TypeMismatch
                | ErrorKind::UnresolvedSimilarityValue
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a similarity-hinted value could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// The resolver found no close catalog value
    NotFound,
    /// No resolver is registered under the hinted name
    NoResolver(String),
    Timeout(Duration),
    Backend(String),
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::NotFound => write!(f, "no matching catalog value"),
            Unresolved::NoResolver(name) => write!(f, "no resolver named {}", name),
            Unresolved::Timeout(after) => write!(f, "resolution timed out after {:?}", after),
            Unresolved::Backend(msg) => write!(f, "resolver failed: {}", msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum IqlError {
    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error("Unsupported {kind}: {name}")]
    UnsupportedOperation { kind: OperationKind, name: String },

    #[error("{name} takes {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Argument {param} of {name} expects {expected}, got {found} literal {value}")]
    TypeMismatch {
        name: String,
        param: String,
        expected: ParamType,
        found: &'static str,
        value: String,
    },

    #[error("Cannot resolve {value:?} for argument {param} of {name}: {reason}")]
    UnresolvedSimilarityValue {
        name: String,
        param: String,
        value: String,
        reason: Unresolved,
    },
}

impl IqlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IqlError::Syntax(_) => ErrorKind::SyntaxError,
            IqlError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            IqlError::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            IqlError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            IqlError::UnresolvedSimilarityValue { .. } => ErrorKind::UnresolvedSimilarityValue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_disjoint() {
        for kind in [
            ErrorKind::SyntaxError,
            ErrorKind::UnsupportedOperation,
            ErrorKind::ArityMismatch,
            ErrorKind::TypeMismatch,
            ErrorKind::UnresolvedSimilarityValue,
            ErrorKind::RuntimeInvocationFault,
        ] {
            assert!(!(kind.is_syntax() && kind.is_semantic()), "{}", kind);
        }
        assert!(!ErrorKind::RuntimeInvocationFault.is_semantic());
    }

    #[test]
    fn test_parse_error_is_syntax_kind() {
        let err: IqlError = iql_ast::parse_filters("a(").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::SyntaxError);
    }
}
