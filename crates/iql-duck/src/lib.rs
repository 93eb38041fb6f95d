//! IQL compiler and DuckDB executor
//!
//! Views expose typed operations through [`ViewBindings`]; [`compile`] and
//! [`Runner`] turn validated IQL into a [`Select`], and [`DuckExecutor`]
//! runs the resulting SQL.

mod compile;
mod exec;
pub mod query;
mod view;

pub use compile::{compile, CompileError, CompiledQuery, Runner};
pub use exec::{DuckExecutor, ExecutionBudget, ExecutionError, QueryResult};
pub use query::{col, lit, Select, SqlExpr};
pub use view::{Args, InvocationError, SqlView, ViewBindings, ViewBindingsBuilder};
