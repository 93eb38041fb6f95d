//! Operation registry for IQL views
//!
//! A view registers the filter and action operations it exposes once, at
//! startup. After that the registry is read-only and can be shared across
//! any number of concurrent pipeline runs without locking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("View already registered: {0}")]
    DuplicateView(String),

    #[error("Operation {name} registered twice on view {view}")]
    DuplicateOperation { view: String, name: String },

    #[error("Parameter {param} of {operation} has a similarity hint but is not a str parameter")]
    InvalidHint { operation: String, param: String },
}

/// Declared type of an operation parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    Str,
    Bool,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Str => "str",
            ParamType::Bool => "bool",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Name of the similarity resolver that maps free text onto catalog values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            similarity: None,
        }
    }

    pub fn with_similarity(mut self, resolver: impl Into<String>) -> Self {
        self.similarity = Some(resolver.into());
        self
    }
}

/// A named, typed operation a view makes available to IQL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedOperation {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Prompt text for the generator; never interpreted here
    #[serde(default)]
    pub description: String,
}

impl ExposedOperation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            description: String::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamSpec::new(name, ty));
        self
    }

    /// A `str` parameter resolved through the named similarity resolver
    pub fn similar_param(mut self, name: impl Into<String>, resolver: impl Into<String>) -> Self {
        self.params
            .push(ParamSpec::new(name, ParamType::Str).with_similarity(resolver));
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    fn check_hints(&self) -> Result<(), RegistryError> {
        match self
            .params
            .iter()
            .find(|p| p.similarity.is_some() && p.ty != ParamType::Str)
        {
            Some(p) => Err(RegistryError::InvalidHint {
                operation: self.name.clone(),
                param: p.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ExposedOperation {
    /// Prompt form: `name(param: type, ...) - description`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
        }
        write!(f, ")")?;
        let description = self.description.trim();
        if !description.is_empty() {
            write!(f, " - {}", description)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Filter,
    Action,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Filter => f.write_str("filter"),
            OperationKind::Action => f.write_str("action"),
        }
    }
}

/// Ordered set of operations with exact, case-sensitive lookup by name
#[derive(Debug, Clone, Default)]
pub struct OperationSet {
    ops: Vec<Arc<ExposedOperation>>,
    index: HashMap<String, usize>,
}

impl OperationSet {
    fn build(view: &str, ops: Vec<ExposedOperation>) -> Result<Self, RegistryError> {
        let mut set = Self::default();
        for op in ops {
            op.check_hints()?;
            if set.index.contains_key(&op.name) {
                return Err(RegistryError::DuplicateOperation {
                    view: view.to_string(),
                    name: op.name,
                });
            }
            set.index.insert(op.name.clone(), set.ops.len());
            set.ops.push(Arc::new(op));
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ExposedOperation>> {
        self.index.get(name).map(|&i| &self.ops[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ExposedOperation>> {
        self.ops.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|op| op.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// One line per operation, in registration order
    pub fn to_prompt(&self) -> String {
        self.ops
            .iter()
            .map(|op| op.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Serializable form of a view descriptor (YAML view files, fixtures)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub filters: Vec<ExposedOperation>,
    #[serde(default)]
    pub actions: Vec<ExposedOperation>,
}

/// Everything the pipeline knows about one view
#[derive(Debug, Clone)]
pub struct ViewDescriptor {
    name: String,
    description: String,
    filters: OperationSet,
    actions: OperationSet,
}

impl ViewDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        filters: Vec<ExposedOperation>,
        actions: Vec<ExposedOperation>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        Ok(Self {
            filters: OperationSet::build(&name, filters)?,
            actions: OperationSet::build(&name, actions)?,
            description: description.into(),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn filters(&self) -> &OperationSet {
        &self.filters
    }

    pub fn actions(&self) -> &OperationSet {
        &self.actions
    }

    pub fn operations(&self, kind: OperationKind) -> &OperationSet {
        match kind {
            OperationKind::Filter => &self.filters,
            OperationKind::Action => &self.actions,
        }
    }

    pub fn to_spec(&self) -> ViewSpec {
        ViewSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            filters: self.filters.iter().map(|op| op.as_ref().clone()).collect(),
            actions: self.actions.iter().map(|op| op.as_ref().clone()).collect(),
        }
    }
}

impl TryFrom<ViewSpec> for ViewDescriptor {
    type Error = RegistryError;

    fn try_from(spec: ViewSpec) -> Result<Self, Self::Error> {
        ViewDescriptor::new(spec.name, spec.description, spec.filters, spec.actions)
    }
}

/// View name -> descriptor. Populated at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    views: HashMap<String, Arc<ViewDescriptor>>,
    order: Vec<String>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: Vec<ViewSpec>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(ViewDescriptor::try_from(spec)?)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, view: ViewDescriptor) -> Result<Arc<ViewDescriptor>, RegistryError> {
        if self.views.contains_key(view.name()) {
            return Err(RegistryError::DuplicateView(view.name().to_string()));
        }
        let name = view.name().to_string();
        let view = Arc::new(view);
        self.views.insert(name.clone(), view.clone());
        self.order.push(name);
        Ok(view)
    }

    pub fn get(&self, name: &str) -> Result<Arc<ViewDescriptor>, RegistryError> {
        self.views
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ViewNotFound(name.to_string()))
    }

    /// (name, description) pairs in registration order
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.order
            .iter()
            .filter_map(|name| self.views.get(name))
            .map(|v| (v.name(), v.description()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
