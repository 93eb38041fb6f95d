//! Semantic validation: parsed calls -> validated calls
//!
//! Each call is resolved against the view's operations by exact name, its
//! argument count is checked, and every literal is coerced to the declared
//! parameter type. Hinted parameters go through a similarity resolver.
//! Validation stops at the first error.

use iql_ast::{parse_actions, parse_filters, Call, ParsedExpression, Value};
use iql_registry::{ExposedOperation, OperationKind, OperationSet, ParamSpec, ParamType, ViewDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{IqlError, Unresolved};
use crate::similarity::SimilarityResolver;
use crate::{ValidatedCall, ValidatedQuery};

pub const DEFAULT_SIMILARITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Validates IQL against view descriptors
///
/// Holds no per-request state; one instance can serve concurrent requests.
#[derive(Clone)]
pub struct Validator {
    resolvers: HashMap<String, Arc<dyn SimilarityResolver>>,
    similarity_timeout: Duration,
    resolve_similarity: bool,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
            similarity_timeout: DEFAULT_SIMILARITY_TIMEOUT,
            resolve_similarity: true,
        }
    }

    /// Register the resolver a [`ParamSpec::similarity`] hint refers to
    pub fn with_resolver(mut self, name: impl Into<String>, resolver: Arc<dyn SimilarityResolver>) -> Self {
        self.resolvers.insert(name.into(), resolver);
        self
    }

    /// Upper bound for each individual resolution
    pub fn with_similarity_timeout(mut self, timeout: Duration) -> Self {
        self.similarity_timeout = timeout;
        self
    }

    /// Keep hinted values as written instead of resolving them.
    ///
    /// Offline evaluation uses this when no similarity index is available.
    pub fn without_similarity(mut self) -> Self {
        self.resolve_similarity = false;
        self
    }

    /// Validate every call of `expr` against `operations`
    pub async fn validate(
        &self,
        expr: &ParsedExpression,
        operations: &OperationSet,
    ) -> Result<Vec<ValidatedCall>, IqlError> {
        let kind = match expr {
            ParsedExpression::Conjunction(_) => OperationKind::Filter,
            ParsedExpression::Sequence(_) => OperationKind::Action,
        };

        let mut validated = Vec::with_capacity(expr.len());
        for call in expr.calls() {
            validated.push(self.validate_call(kind, call, operations).await?);
        }
        Ok(validated)
    }

    /// Parse and validate filters text for `view`
    pub async fn validate_filters(
        &self,
        source: &str,
        view: &ViewDescriptor,
    ) -> Result<Vec<ValidatedCall>, IqlError> {
        let expr = parse_filters(source)?;
        self.validate(&expr, view.filters()).await
    }

    /// Parse and validate actions text for `view`
    pub async fn validate_actions(
        &self,
        source: &str,
        view: &ViewDescriptor,
    ) -> Result<Vec<ValidatedCall>, IqlError> {
        let expr = parse_actions(source)?;
        self.validate(&expr, view.actions()).await
    }

    /// Filters first, then actions
    pub async fn validate_query(
        &self,
        filters: &str,
        actions: &str,
        view: &ViewDescriptor,
    ) -> Result<ValidatedQuery, IqlError> {
        let filters = self.validate_filters(filters, view).await?;
        let actions = self.validate_actions(actions, view).await?;
        debug!(
            view = view.name(),
            filters = filters.len(),
            actions = actions.len(),
            "Validated IQL"
        );
        Ok(ValidatedQuery { filters, actions })
    }

    async fn validate_call(
        &self,
        kind: OperationKind,
        call: &Call,
        operations: &OperationSet,
    ) -> Result<ValidatedCall, IqlError> {
        let operation = operations
            .get(&call.name)
            .ok_or_else(|| IqlError::UnsupportedOperation {
                kind,
                name: call.name.clone(),
            })?;

        if call.args.len() != operation.arity() {
            return Err(IqlError::ArityMismatch {
                name: call.name.clone(),
                expected: operation.arity(),
                found: call.args.len(),
            });
        }

        let mut args = Vec::with_capacity(call.args.len());
        for (param, value) in operation.params.iter().zip(&call.args) {
            let value = coerce(operation, param, value)?;
            let value = match (&param.similarity, value) {
                (Some(resolver), Value::String(raw)) if self.resolve_similarity => {
                    Value::String(self.resolve(operation, param, resolver, raw).await?)
                }
                (_, value) => value,
            };
            args.push(value);
        }

        Ok(ValidatedCall {
            operation: operation.clone(),
            args,
        })
    }

    async fn resolve(
        &self,
        operation: &ExposedOperation,
        param: &ParamSpec,
        resolver_name: &str,
        raw: String,
    ) -> Result<String, IqlError> {
        let unresolved = |value: String, reason: Unresolved| IqlError::UnresolvedSimilarityValue {
            name: operation.name.clone(),
            param: param.name.clone(),
            value,
            reason,
        };

        let Some(resolver) = self.resolvers.get(resolver_name) else {
            return Err(unresolved(raw, Unresolved::NoResolver(resolver_name.to_string())));
        };

        match tokio::time::timeout(self.similarity_timeout, resolver.resolve(&raw)).await {
            Ok(Ok(Some(resolved))) => {
                debug!(resolver = resolver_name, raw = %raw, resolved = %resolved, "Resolved similar value");
                Ok(resolved)
            }
            Ok(Ok(None)) => Err(unresolved(raw, Unresolved::NotFound)),
            Ok(Err(e)) => {
                warn!(resolver = resolver_name, error = %e, "Similarity resolver failed");
                Err(unresolved(raw, Unresolved::Backend(e.to_string())))
            }
            Err(_) => {
                warn!(resolver = resolver_name, timeout = ?self.similarity_timeout, "Similarity resolution timed out");
                Err(unresolved(raw, Unresolved::Timeout(self.similarity_timeout)))
            }
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Literal -> declared type. Integers widen to floats; nothing else converts.
fn coerce(operation: &ExposedOperation, param: &ParamSpec, value: &Value) -> Result<Value, IqlError> {
    match (param.ty, value) {
        (ParamType::Int, Value::Int(_))
        | (ParamType::Float, Value::Float(_))
        | (ParamType::Str, Value::String(_))
        | (ParamType::Bool, Value::Bool(_)) => Ok(value.clone()),
        (ParamType::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
        _ => Err(IqlError::TypeMismatch {
            name: operation.name.clone(),
            param: param.name.clone(),
            expected: param.ty,
            found: value.type_name(),
            value: value.to_string(),
        }),
    }
}
