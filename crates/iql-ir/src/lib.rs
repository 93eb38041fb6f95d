//! IQL validated representation
//!
//! Output of semantic validation: calls bound to the operations they name,
//! with arguments already coerced to the declared parameter types. This is
//! what the compiler consumes.

use iql_ast::Value;
use iql_registry::ExposedOperation;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

mod error;
mod similarity;
mod validate;

pub use error::{ErrorKind, IqlError, Unresolved};
pub use similarity::{CatalogResolver, SimilarityError, SimilarityResolver};
pub use validate::{Validator, DEFAULT_SIMILARITY_TIMEOUT};

/// A call resolved against the registry.
///
/// `args.len() == operation.arity()` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCall {
    pub operation: Arc<ExposedOperation>,
    pub args: Vec<Value>,
}

impl ValidatedCall {
    pub fn name(&self) -> &str {
        &self.operation.name
    }
}

impl fmt::Display for ValidatedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// Validated filters and actions for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedQuery {
    pub filters: Vec<ValidatedCall>,
    pub actions: Vec<ValidatedCall>,
}

#[derive(Serialize)]
struct CanonicalCall<'a> {
    name: &'a str,
    args: &'a [Value],
}

#[derive(Serialize)]
struct CanonicalQuery<'a> {
    filters: Vec<CanonicalCall<'a>>,
    actions: Vec<CanonicalCall<'a>>,
}

fn canonical(calls: &[ValidatedCall]) -> Vec<CanonicalCall<'_>> {
    calls
        .iter()
        .map(|c| CanonicalCall {
            name: c.name(),
            args: &c.args,
        })
        .collect()
}

impl ValidatedQuery {
    /// SHA-256 of the canonical JSON form, for caching and provenance
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(&CanonicalQuery {
            filters: canonical(&self.filters),
            actions: canonical(&self.actions),
        })?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}
