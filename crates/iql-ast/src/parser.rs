//! Pest-based parser for IQL

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "iql.pest"]
pub struct IqlParser;

/// Every variant is a grammar violation
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Invalid literal {literal}: {reason}")]
    InvalidLiteral { literal: String, reason: String },

    #[error("Pest error: {0}")]
    Pest(#[from] pest::error::Error<Rule>),
}

impl ParseError {
    /// (line, column) of the failure when the grammar reported one
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            ParseError::Pest(e) => match e.line_col {
                pest::error::LineColLocation::Pos(pos) => Some(pos),
                pest::error::LineColLocation::Span(start, _) => Some(start),
            },
            _ => None,
        }
    }
}

/// Parse filters source: calls joined by `and`
pub fn parse_filters(source: &str) -> Result<ParsedExpression, ParseError> {
    let calls = parse_calls(Rule::filters, source)?;
    Ok(ParsedExpression::Conjunction(calls))
}

/// Parse actions source: one call per line
pub fn parse_actions(source: &str) -> Result<ParsedExpression, ParseError> {
    let calls = parse_calls(Rule::actions, source)?;
    Ok(ParsedExpression::Sequence(calls))
}

fn parse_calls(rule: Rule, source: &str) -> Result<Vec<Call>, ParseError> {
    let mut pairs = IqlParser::parse(rule, source)?;
    let root = pairs
        .next()
        .ok_or_else(|| ParseError::Syntax("Empty input".to_string()))?;

    root.into_inner()
        .filter(|pair| pair.as_rule() == Rule::call)
        .map(parse_call)
        .collect()
}

fn parse_call(pair: Pair<Rule>) -> Result<Call, ParseError> {
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .ok_or_else(|| ParseError::Syntax("Call without a name".to_string()))?
        .as_str()
        .to_string();

    let args = match inner.next() {
        Some(args) => args
            .into_inner()
            .map(parse_literal)
            .collect::<Result<Vec<_>, _>>()?,
        None => vec![],
    };

    Ok(Call { name, args })
}

pub(crate) fn parse_literal(pair: Pair<Rule>) -> Result<Value, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::Syntax("Empty literal".to_string()))?;
    let text = inner.as_str();

    match inner.as_rule() {
        Rule::int => text
            .parse()
            .map(Value::Int)
            .map_err(|e: std::num::ParseIntError| invalid(text, e.to_string())),
        Rule::float => {
            let value: f64 = text
                .parse()
                .map_err(|e: std::num::ParseFloatError| invalid(text, e.to_string()))?;
            if !value.is_finite() {
                return Err(invalid(text, "out of range".to_string()));
            }
            Ok(Value::Float(value))
        }
        Rule::boolean => Ok(Value::Bool(text == "True")),
        Rule::string => {
            let body = inner
                .into_inner()
                .next()
                .map(|p| p.as_str())
                .unwrap_or_default();
            Ok(Value::String(unescape(body)))
        }
        other => Err(ParseError::Syntax(format!("Invalid literal: {:?}", other))),
    }
}

fn invalid(literal: &str, reason: String) -> ParseError {
    ParseError::InvalidLiteral {
        literal: literal.to_string(),
        reason,
    }
}

/// The grammar only admits the escapes handled here
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
