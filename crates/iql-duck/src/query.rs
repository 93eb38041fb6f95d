//! SQL query builder
//!
//! A small select builder that view operations compose: filters contribute
//! predicates, actions reshape the query. Operations that would change the
//! meaning of an earlier LIMIT (a later filter or ORDER BY) wrap the query in
//! a subquery instead of rewriting it, so action order is preserved.

use iql_ast::Value;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Null,
    Literal(Value),
    Column(ColumnRef),
    Compare {
        op: CmpOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    And(Vec<SqlExpr>),
    Or(Vec<SqlExpr>),
    Not(Box<SqlExpr>),
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
    },
    Like {
        expr: Box<SqlExpr>,
        pattern: Box<SqlExpr>,
        case_insensitive: bool,
    },
    IsNull(Box<SqlExpr>),
}

/// Unqualified column reference
pub fn col(name: impl Into<String>) -> SqlExpr {
    SqlExpr::Column(ColumnRef {
        table: None,
        column: name.into(),
    })
}

pub fn lit(value: impl Into<Value>) -> SqlExpr {
    SqlExpr::Literal(value.into())
}

impl SqlExpr {
    fn compare(self, op: CmpOp, other: SqlExpr) -> SqlExpr {
        SqlExpr::Compare {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: SqlExpr) -> SqlExpr {
        self.compare(CmpOp::Eq, other)
    }

    pub fn ne(self, other: SqlExpr) -> SqlExpr {
        self.compare(CmpOp::Ne, other)
    }

    pub fn lt(self, other: SqlExpr) -> SqlExpr {
        self.compare(CmpOp::Lt, other)
    }

    pub fn le(self, other: SqlExpr) -> SqlExpr {
        self.compare(CmpOp::Le, other)
    }

    pub fn gt(self, other: SqlExpr) -> SqlExpr {
        self.compare(CmpOp::Gt, other)
    }

    pub fn ge(self, other: SqlExpr) -> SqlExpr {
        self.compare(CmpOp::Ge, other)
    }

    pub fn in_list(self, list: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::InList {
            expr: Box::new(self),
            list,
        }
    }

    pub fn ilike(self, pattern: SqlExpr) -> SqlExpr {
        SqlExpr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern),
            case_insensitive: true,
        }
    }

    pub fn is_null(self) -> SqlExpr {
        SqlExpr::IsNull(Box::new(self))
    }

    pub fn not(self) -> SqlExpr {
        SqlExpr::Not(Box::new(self))
    }

    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        self.write_sql(&mut out);
        out
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            SqlExpr::Null => out.push_str("NULL"),
            SqlExpr::Literal(value) => write_literal(value, out),
            SqlExpr::Column(col) => {
                if let Some(table) = &col.table {
                    write_ident(table, out);
                    out.push('.');
                }
                write_ident(&col.column, out);
            }
            SqlExpr::Compare { op, left, right } => {
                left.write_child(ATOM, out);
                let _ = write!(out, " {} ", op.as_sql());
                right.write_child(ATOM, out);
            }
            SqlExpr::And(items) | SqlExpr::Or(items) if items.len() == 1 => items[0].write_sql(out),
            SqlExpr::And(items) => write_joined(items, " AND ", "1 = 1", AND, out),
            SqlExpr::Or(items) => write_joined(items, " OR ", "1 = 0", NOT, out),
            SqlExpr::Not(inner) => {
                out.push_str("NOT ");
                inner.write_child(ATOM, out);
            }
            SqlExpr::InList { expr, list } => {
                expr.write_child(ATOM, out);
                out.push_str(" IN (");
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_sql(out);
                }
                out.push(')');
            }
            SqlExpr::Like {
                expr,
                pattern,
                case_insensitive,
            } => {
                expr.write_child(ATOM, out);
                out.push_str(if *case_insensitive { " ILIKE " } else { " LIKE " });
                pattern.write_child(ATOM, out);
            }
            SqlExpr::IsNull(inner) => {
                inner.write_child(ATOM, out);
                out.push_str(" IS NULL");
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            SqlExpr::Null | SqlExpr::Literal(_) | SqlExpr::Column(_) => ATOM,
            SqlExpr::And(items) | SqlExpr::Or(items) if items.len() == 1 => items[0].precedence(),
            SqlExpr::And(items) | SqlExpr::Or(items) if items.is_empty() => PREDICATE,
            SqlExpr::Compare { .. }
            | SqlExpr::InList { .. }
            | SqlExpr::Like { .. }
            | SqlExpr::IsNull(_) => PREDICATE,
            SqlExpr::Not(_) => NOT,
            SqlExpr::And(_) => AND,
            SqlExpr::Or(_) => OR,
        }
    }

    /// Parenthesize when binding looser than `required`. AND inside OR is
    /// parenthesized too, for readability.
    fn write_child(&self, required: u8, out: &mut String) {
        if self.precedence() < required {
            out.push('(');
            self.write_sql(out);
            out.push(')');
        } else {
            self.write_sql(out);
        }
    }
}

const OR: u8 = 0;
const AND: u8 = 1;
const NOT: u8 = 2;
const PREDICATE: u8 = 3;
const ATOM: u8 = 4;

fn write_joined(items: &[SqlExpr], sep: &str, empty: &str, required: u8, out: &mut String) {
    if items.is_empty() {
        out.push_str(empty);
        return;
    }
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        item.write_child(required, out);
    }
}

fn write_literal(value: &Value, out: &mut String) {
    match value {
        Value::Bool(true) => out.push_str("TRUE"),
        Value::Bool(false) => out.push_str("FALSE"),
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) => {
            let _ = write!(out, "{:?}", f);
        }
        Value::String(s) => {
            out.push('\'');
            out.push_str(&s.replace('\'', "''"));
            out.push('\'');
        }
    }
}

fn write_ident(name: &str, out: &mut String) {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        out.push_str(name);
    } else {
        out.push('"');
        out.push_str(&name.replace('"', "\"\""));
        out.push('"');
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub expr: SqlExpr,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table { name: String, alias: Option<String> },
    Subquery { select: Box<Select>, alias: String },
}

/// SELECT statement under construction
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    distinct: bool,
    projections: Vec<Projection>,
    from: Option<FromItem>,
    predicates: Vec<SqlExpr>,
    order_by: Vec<OrderKey>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    /// `SELECT *` with no FROM clause; add projections and a source with the builders
    pub fn new() -> Self {
        Self::default()
    }

    /// `SELECT * FROM table`
    pub fn from_table(name: impl Into<String>) -> Self {
        Self::new().from(name)
    }

    pub fn from(mut self, name: impl Into<String>) -> Self {
        self.from = Some(FromItem::Table {
            name: name.into(),
            alias: None,
        });
        self
    }

    pub fn column(mut self, expr: SqlExpr) -> Self {
        self.projections.push(Projection { expr, alias: None });
        self
    }

    pub fn column_as(mut self, expr: SqlExpr, alias: impl Into<String>) -> Self {
        self.projections.push(Projection {
            expr,
            alias: Some(alias.into()),
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Add one predicate, ANDed with the existing ones
    pub fn filter(self, predicate: SqlExpr) -> Self {
        self.filter_all(vec![predicate])
    }

    /// Add predicates, ANDed with the existing ones. A limited query is
    /// wrapped first so the predicates apply to its result.
    pub fn filter_all(self, predicates: Vec<SqlExpr>) -> Self {
        if predicates.is_empty() {
            return self;
        }
        let mut query = if self.is_limited() { self.wrap() } else { self };
        query.predicates.extend(predicates);
        query
    }

    /// Append a sort key. A limited query is wrapped first: sorting the
    /// limited rows is not the same as limiting the sorted rows.
    pub fn order_by(self, expr: SqlExpr, desc: bool) -> Self {
        let mut query = if self.is_limited() { self.wrap() } else { self };
        query.order_by.push(OrderKey { expr, desc });
        query
    }

    /// Two limits compose to the smaller one
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(self.limit.map_or(n, |current| current.min(n)));
        self
    }

    pub fn offset(self, n: u64) -> Self {
        let mut query = if self.is_limited() { self.wrap() } else { self };
        query.offset = Some(n);
        query
    }

    /// `SELECT * FROM (<self>) AS qN`
    pub fn wrap(self) -> Self {
        let alias = format!("q{}", self.depth() + 1);
        Select {
            from: Some(FromItem::Subquery {
                select: Box::new(self),
                alias,
            }),
            ..Select::default()
        }
    }

    pub fn predicates(&self) -> &[SqlExpr] {
        &self.predicates
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    fn is_limited(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    fn depth(&self) -> usize {
        match &self.from {
            Some(FromItem::Subquery { select, .. }) => select.depth() + 1,
            _ => 0,
        }
    }

    pub fn to_sql(&self) -> String {
        let mut out = String::from("SELECT ");
        if self.distinct {
            out.push_str("DISTINCT ");
        }

        if self.projections.is_empty() {
            out.push('*');
        }
        for (i, p) in self.projections.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            p.expr.write_sql(&mut out);
            if let Some(alias) = &p.alias {
                out.push_str(" AS ");
                write_ident(alias, &mut out);
            }
        }

        match &self.from {
            Some(FromItem::Table { name, alias }) => {
                out.push_str(" FROM ");
                write_ident(name, &mut out);
                if let Some(alias) = alias {
                    out.push_str(" AS ");
                    write_ident(alias, &mut out);
                }
            }
            Some(FromItem::Subquery { select, alias }) => {
                let _ = write!(out, " FROM ({}) AS ", select.to_sql());
                write_ident(alias, &mut out);
            }
            None => {}
        }

        if !self.predicates.is_empty() {
            out.push_str(" WHERE ");
            write_joined(&self.predicates, " AND ", "", AND, &mut out);
        }

        if !self.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            for (i, key) in self.order_by.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                key.expr.write_child(AND, &mut out);
                if key.desc {
                    out.push_str(" DESC");
                }
            }
        }

        if let Some(limit) = self.limit {
            let _ = write!(out, " LIMIT {}", limit);
        }
        if let Some(offset) = self.offset {
            let _ = write!(out, " OFFSET {}", offset);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Select {
        Select::new().column_as(lit("test"), "foo")
    }

    #[test]
    fn test_literal_projection() {
        assert_eq!(base().to_sql(), "SELECT 'test' AS foo");
    }

    #[test]
    fn test_predicates_and_modifiers() {
        let sql = base()
            .filter_all(vec![lit(1), lit("hello London in 2020")])
            .order_by(col("foo"), false)
            .limit(5)
            .to_sql();
        assert_eq!(
            sql,
            "SELECT 'test' AS foo WHERE 1 AND 'hello London in 2020' ORDER BY foo LIMIT 5"
        );
    }

    #[test]
    fn test_order_after_limit_wraps() {
        let sql = base().limit(5).order_by(col("foo"), true).to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT 'test' AS foo LIMIT 5) AS q1 ORDER BY foo DESC"
        );
    }

    #[test]
    fn test_nested_wraps_get_distinct_aliases() {
        let sql = Select::from_table("t")
            .limit(3)
            .filter(col("a").gt(lit(1)))
            .limit(2)
            .order_by(col("a"), false)
            .to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT * FROM (SELECT * FROM t LIMIT 3) AS q1 WHERE a > 1 LIMIT 2) AS q2 ORDER BY a"
        );
    }

    #[test]
    fn test_limits_compose_to_minimum() {
        assert_eq!(Select::from_table("t").limit(10).limit(3).limit_value(), Some(3));
    }

    #[test]
    fn test_compound_predicates() {
        let pred = SqlExpr::Or(vec![
            col("position").in_list(vec![lit("Data Scientist"), lit("Data Engineer")]),
            SqlExpr::And(vec![col("years").ge(lit(3)), col("country").is_null().not()]),
        ]);
        let sql = Select::from_table("candidates").filter(pred).filter(col("x").eq(lit(true))).to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM candidates WHERE (position IN ('Data Scientist', 'Data Engineer') OR (years >= 3 AND NOT (country IS NULL))) AND x = TRUE"
        );
    }

    #[test]
    fn test_quoting() {
        let sql = Select::from_table("my table")
            .filter(col("name").eq(lit("O'Brien")))
            .to_sql();
        assert_eq!(sql, "SELECT * FROM \"my table\" WHERE name = 'O''Brien'");
    }

    #[test]
    fn test_distinct_projection() {
        let sql = Select::from_table("candidates")
            .distinct()
            .column(col("country"))
            .filter(col("country").is_null().not())
            .to_sql();
        assert_eq!(
            sql,
            "SELECT DISTINCT country FROM candidates WHERE NOT (country IS NULL)"
        );
    }

    #[test]
    fn test_empty_conjunction_is_true() {
        assert_eq!(SqlExpr::And(vec![]).to_sql(), "1 = 1");
    }

    #[test]
    fn test_single_item_conjunction_is_transparent() {
        let pred = SqlExpr::And(vec![col("a").eq(lit(1))]).not();
        assert_eq!(pred.to_sql(), "NOT (a = 1)");
    }
}
