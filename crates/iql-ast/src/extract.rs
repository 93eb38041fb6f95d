//! Best-effort call-name extraction
//!
//! Used when counting hallucinated operations. Text that the strict grammar
//! rejects (operators, keyword arguments, nested calls) still yields the names
//! of the calls it contains. Text that is not even a well-formed expression
//! (unbalanced brackets, stray tokens) yields nothing.

use pest::Parser;

use crate::parser::{IqlParser, Rule};

/// Names of every call in `source`, outermost first, in source order.
///
/// Returns `None` when the text cannot be read as call expressions at all.
/// Never fails otherwise.
pub fn extract_call_names(source: &str) -> Option<Vec<String>> {
    let pairs = IqlParser::parse(Rule::tolerant, source).ok()?;

    let names = pairs
        .flatten()
        .filter(|pair| pair.as_rule() == Rule::t_call)
        .filter_map(|call| {
            call.into_inner()
                .find(|p| p.as_rule() == Rule::t_path)
                .and_then(|path| {
                    path.into_inner()
                        .filter(|p| p.as_rule() == Rule::ident)
                        .last()
                        .map(|ident| ident.as_str().to_string())
                })
        })
        .collect();

    Some(names)
}
