//! Views and their bound operations
//!
//! A view supplies a base query. Each exposed operation is registered
//! together with the callable that implements it: filters return a
//! predicate, actions reshape the query. The descriptor the validator sees
//! is derived from the same registrations, so a name can never be exposed
//! without an implementation.

use iql_ast::Value;
use iql_registry::{ExposedOperation, ParamType, RegistryError, ViewDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::query::{Select, SqlExpr};

/// A queryable data view
pub trait SqlView: Send + Sync {
    /// Query every compile starts from
    fn base_query(&self) -> Select;
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("Missing argument {index}")]
    MissingArgument { index: usize },

    #[error("Argument {index} is not {expected}")]
    WrongType { index: usize, expected: ParamType },

    #[error("{0}")]
    Invalid(String),
}

/// Validated arguments handed to a bound operation
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Result<&'a Value, InvocationError> {
        self.values
            .get(index)
            .ok_or(InvocationError::MissingArgument { index })
    }

    pub fn int(&self, index: usize) -> Result<i64, InvocationError> {
        self.value(index)?.as_int().ok_or(InvocationError::WrongType {
            index,
            expected: ParamType::Int,
        })
    }

    pub fn float(&self, index: usize) -> Result<f64, InvocationError> {
        self.value(index)?.as_float().ok_or(InvocationError::WrongType {
            index,
            expected: ParamType::Float,
        })
    }

    pub fn str(&self, index: usize) -> Result<&'a str, InvocationError> {
        self.value(index)?.as_str().ok_or(InvocationError::WrongType {
            index,
            expected: ParamType::Str,
        })
    }

    pub fn bool(&self, index: usize) -> Result<bool, InvocationError> {
        self.value(index)?.as_bool().ok_or(InvocationError::WrongType {
            index,
            expected: ParamType::Bool,
        })
    }

    /// Non-negative integer argument, e.g. a row count
    pub fn count(&self, index: usize) -> Result<u64, InvocationError> {
        let n = self.int(index)?;
        u64::try_from(n).map_err(|_| InvocationError::Invalid(format!("expected a non-negative count, got {}", n)))
    }
}

pub type FilterFn<V> = Arc<dyn Fn(&V, Args<'_>) -> Result<SqlExpr, InvocationError> + Send + Sync>;
pub type ActionFn<V> = Arc<dyn Fn(&V, Select, Args<'_>) -> Result<Select, InvocationError> + Send + Sync>;

/// Descriptor plus the callables behind each exposed operation
pub struct ViewBindings<V> {
    descriptor: Arc<ViewDescriptor>,
    filters: HashMap<String, FilterFn<V>>,
    actions: HashMap<String, ActionFn<V>>,
}

impl<V> ViewBindings<V> {
    pub fn builder(name: impl Into<String>) -> ViewBindingsBuilder<V> {
        ViewBindingsBuilder {
            name: name.into(),
            description: String::new(),
            filter_ops: Vec::new(),
            action_ops: Vec::new(),
            filters: HashMap::new(),
            actions: HashMap::new(),
        }
    }

    pub fn descriptor(&self) -> &Arc<ViewDescriptor> {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub(crate) fn filter(&self, name: &str) -> Option<&FilterFn<V>> {
        self.filters.get(name)
    }

    pub(crate) fn action(&self, name: &str) -> Option<&ActionFn<V>> {
        self.actions.get(name)
    }
}

pub struct ViewBindingsBuilder<V> {
    name: String,
    description: String,
    filter_ops: Vec<ExposedOperation>,
    action_ops: Vec<ExposedOperation>,
    filters: HashMap<String, FilterFn<V>>,
    actions: HashMap<String, ActionFn<V>>,
}

impl<V> ViewBindingsBuilder<V> {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn filter<F>(mut self, operation: ExposedOperation, f: F) -> Self
    where
        F: Fn(&V, Args<'_>) -> Result<SqlExpr, InvocationError> + Send + Sync + 'static,
    {
        self.filters.insert(operation.name.clone(), Arc::new(f));
        self.filter_ops.push(operation);
        self
    }

    pub fn action<F>(mut self, operation: ExposedOperation, f: F) -> Self
    where
        F: Fn(&V, Select, Args<'_>) -> Result<Select, InvocationError> + Send + Sync + 'static,
    {
        self.actions.insert(operation.name.clone(), Arc::new(f));
        self.action_ops.push(operation);
        self
    }

    /// Fails on duplicate names or malformed similarity hints
    pub fn build(self) -> Result<ViewBindings<V>, RegistryError> {
        let descriptor = ViewDescriptor::new(self.name, self.description, self.filter_ops, self.action_ops)?;
        Ok(ViewBindings {
            descriptor: Arc::new(descriptor),
            filters: self.filters,
            actions: self.actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{col, lit};

    struct People;

    impl SqlView for People {
        fn base_query(&self) -> Select {
            Select::from_table("people")
        }
    }

    #[test]
    fn test_args_accessors() {
        let values = vec![Value::Int(3), Value::String("x".into()), Value::Int(-1)];
        let args = Args::new(&values);
        assert_eq!(args.int(0).unwrap(), 3);
        assert_eq!(args.float(0).unwrap(), 3.0);
        assert_eq!(args.str(1).unwrap(), "x");
        assert!(matches!(args.bool(1), Err(InvocationError::WrongType { index: 1, .. })));
        assert!(matches!(args.int(5), Err(InvocationError::MissingArgument { index: 5 })));
        assert!(matches!(args.count(2), Err(InvocationError::Invalid(_))));
    }

    #[test]
    fn test_descriptor_follows_registrations() {
        let bindings = ViewBindings::<People>::builder("People")
            .description("Everyone")
            .filter(
                ExposedOperation::new("older_than").param("age", ParamType::Int),
                |_, args| Ok(col("age").gt(lit(args.int(0)?))),
            )
            .action(
                ExposedOperation::new("limit").param("n", ParamType::Int),
                |_, query, args| Ok(query.limit(args.count(0)?)),
            )
            .build()
            .unwrap();

        let descriptor = bindings.descriptor();
        assert_eq!(descriptor.name(), "People");
        assert!(descriptor.filters().contains("older_than"));
        assert!(descriptor.actions().contains("limit"));
        assert!(bindings.filter("older_than").is_some());
        assert!(bindings.action("older_than").is_none());
        assert_eq!(People.base_query().to_sql(), "SELECT * FROM people");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ViewBindings::<People>::builder("People")
            .filter(ExposedOperation::new("a"), |_, _| Ok(lit(true)))
            .filter(ExposedOperation::new("a"), |_, _| Ok(lit(false)))
            .build();
        assert!(matches!(result, Err(RegistryError::DuplicateOperation { .. })));
    }
}
