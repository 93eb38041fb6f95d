//! Validated calls -> SQL
//!
//! Filters are evaluated first and their predicates ANDed onto the view's
//! base query; actions then transform the query strictly left to right. Any
//! failing bound operation fails the whole compile.

use iql_ir::{ErrorKind, IqlError, ValidatedCall, ValidatedQuery, Validator};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::exec::{DuckExecutor, ExecutionBudget, ExecutionError, QueryResult};
use crate::query::{Select, SqlExpr};
use crate::view::{Args, InvocationError, SqlView, ViewBindings};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Iql(#[from] IqlError),

    #[error("Operation {name} is exposed by view {view} but not bound")]
    Unbound { view: String, name: String },

    #[error("Operation {name} failed: {source}")]
    Invocation {
        name: String,
        #[source]
        source: InvocationError,
    },
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Iql(e) => e.kind(),
            CompileError::Unbound { .. } | CompileError::Invocation { .. } => {
                ErrorKind::RuntimeInvocationFault
            }
        }
    }
}

/// Query produced by one compile
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    select: Select,
}

impl CompiledQuery {
    pub fn select(&self) -> &Select {
        &self.select
    }

    pub fn into_select(self) -> Select {
        self.select
    }

    pub fn sql(&self) -> String {
        self.select.to_sql()
    }
}

/// Apply `filters` then `actions` to the base query of `view`
pub fn compile<V: SqlView>(
    filters: &[ValidatedCall],
    actions: &[ValidatedCall],
    view: &V,
    bindings: &ViewBindings<V>,
) -> Result<CompiledQuery, CompileError> {
    let query = apply_filters(view.base_query(), filters, view, bindings)?;
    let select = apply_actions(query, actions, view, bindings)?;
    debug!(view = bindings.name(), sql = %select.to_sql(), "Compiled IQL");
    Ok(CompiledQuery { select })
}

fn apply_filters<V>(
    query: Select,
    calls: &[ValidatedCall],
    view: &V,
    bindings: &ViewBindings<V>,
) -> Result<Select, CompileError> {
    let mut predicates: Vec<SqlExpr> = Vec::with_capacity(calls.len());
    for call in calls {
        let filter = bindings.filter(call.name()).ok_or_else(|| unbound(bindings, call))?;
        let predicate = filter(view, Args::new(&call.args)).map_err(|source| invocation(call, source))?;
        predicates.push(predicate);
    }
    Ok(query.filter_all(predicates))
}

fn apply_actions<V>(
    mut query: Select,
    calls: &[ValidatedCall],
    view: &V,
    bindings: &ViewBindings<V>,
) -> Result<Select, CompileError> {
    for call in calls {
        let action = bindings.action(call.name()).ok_or_else(|| unbound(bindings, call))?;
        query = action(view, query, Args::new(&call.args)).map_err(|source| invocation(call, source))?;
    }
    Ok(query)
}

fn unbound<V>(bindings: &ViewBindings<V>, call: &ValidatedCall) -> CompileError {
    CompileError::Unbound {
        view: bindings.name().to_string(),
        name: call.name().to_string(),
    }
}

fn invocation(call: &ValidatedCall, source: InvocationError) -> CompileError {
    CompileError::Invocation {
        name: call.name().to_string(),
        source,
    }
}

/// Incremental pipeline over one view instance
///
/// Each `apply_*` call parses, validates and applies its text in one step.
/// On error the runner keeps the query it had before the call.
pub struct Runner<V> {
    view: Arc<V>,
    bindings: Arc<ViewBindings<V>>,
    validator: Arc<Validator>,
    query: Select,
    validated: ValidatedQuery,
}

impl<V: SqlView> Runner<V> {
    pub fn new(view: Arc<V>, bindings: Arc<ViewBindings<V>>, validator: Arc<Validator>) -> Self {
        let query = view.base_query();
        Self {
            view,
            bindings,
            validator,
            query,
            validated: ValidatedQuery::default(),
        }
    }

    pub async fn apply_filters(&mut self, source: &str) -> Result<(), CompileError> {
        let calls = self
            .validator
            .validate_filters(source, self.bindings.descriptor())
            .await?;
        self.query = apply_filters(self.query.clone(), &calls, &*self.view, &*self.bindings)?;
        self.validated.filters.extend(calls);
        Ok(())
    }

    pub async fn apply_actions(&mut self, source: &str) -> Result<(), CompileError> {
        let calls = self
            .validator
            .validate_actions(source, self.bindings.descriptor())
            .await?;
        self.query = apply_actions(self.query.clone(), &calls, &*self.view, &*self.bindings)?;
        self.validated.actions.extend(calls);
        Ok(())
    }

    /// Every call applied so far
    pub fn validated(&self) -> &ValidatedQuery {
        &self.validated
    }

    pub fn query(&self) -> &Select {
        &self.query
    }

    pub fn generate_sql(&self) -> String {
        self.query.to_sql()
    }

    pub fn into_compiled(self) -> CompiledQuery {
        CompiledQuery { select: self.query }
    }

    pub fn execute(
        &self,
        executor: &DuckExecutor,
        budget: Option<&ExecutionBudget>,
    ) -> Result<QueryResult, ExecutionError> {
        executor.execute_sql(&self.generate_sql(), budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{col, lit};
    use iql_registry::{ExposedOperation, ParamType};

    struct Numbers;

    impl SqlView for Numbers {
        fn base_query(&self) -> Select {
            Select::from_table("numbers")
        }
    }

    fn bindings() -> Arc<ViewBindings<Numbers>> {
        let bindings = ViewBindings::<Numbers>::builder("Numbers")
            .filter(
                ExposedOperation::new("above").param("n", ParamType::Int),
                |_, args| Ok(col("n").gt(lit(args.int(0)?))),
            )
            .filter(
                ExposedOperation::new("broken"),
                |_, _| Err(InvocationError::Invalid("no such column".into())),
            )
            .action(
                ExposedOperation::new("limit").param("n", ParamType::Int),
                |_, query, args| Ok(query.limit(args.count(0)?)),
            )
            .build()
            .unwrap();
        Arc::new(bindings)
    }

    fn runner() -> Runner<Numbers> {
        Runner::new(Arc::new(Numbers), bindings(), Arc::new(Validator::new()))
    }

    #[tokio::test]
    async fn test_runner_applies_in_order() {
        let mut runner = runner();
        runner.apply_filters("above(2)").await.unwrap();
        runner.apply_actions("limit(3)").await.unwrap();
        assert_eq!(runner.generate_sql(), "SELECT * FROM numbers WHERE n > 2 LIMIT 3");
        assert_eq!(runner.validated().filters.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_filters_are_identity() {
        let mut runner = runner();
        runner.apply_filters("").await.unwrap();
        assert_eq!(runner.generate_sql(), "SELECT * FROM numbers");
    }

    #[tokio::test]
    async fn test_invocation_fault_keeps_previous_query() {
        let mut runner = runner();
        runner.apply_filters("above(1)").await.unwrap();

        let err = runner.apply_filters("above(2) and broken()").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuntimeInvocationFault);
        assert_eq!(runner.generate_sql(), "SELECT * FROM numbers WHERE n > 1");

        let err = runner.apply_actions("limit(-1)").await.unwrap_err();
        assert!(matches!(err, CompileError::Invocation { ref name, .. } if name == "limit"));
    }

    #[tokio::test]
    async fn test_validation_errors_keep_their_kind() {
        let mut runner = runner();
        let err = runner.apply_filters("above(1) or above(2)").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyntaxError);
        let err = runner.apply_actions("shuffle()").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_unbound_call_is_a_runtime_fault() {
        let other = ViewBindings::<Numbers>::builder("Other")
            .filter(ExposedOperation::new("elsewhere"), |_, _| Ok(lit(true)))
            .build()
            .unwrap();
        let call = ValidatedCall {
            operation: other.descriptor().filters().get("elsewhere").unwrap().clone(),
            args: vec![],
        };
        let err = compile(&[call], &[], &Numbers, &bindings()).unwrap_err();
        assert!(matches!(err, CompileError::Unbound { .. }));
        assert_eq!(err.kind(), ErrorKind::RuntimeInvocationFault);
    }
}
