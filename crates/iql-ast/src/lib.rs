//! IQL AST - parser and AST types
//!
//! IQL is the restricted call language a text generator emits for a view:
//! filters are calls joined by `and`, actions are calls on separate lines,
//! and every argument is a literal.

pub mod ast;
mod extract;
mod parser;

pub use ast::*;
pub use extract::extract_call_names;
pub use parser::{parse_actions, parse_filters, ParseError, Rule};
