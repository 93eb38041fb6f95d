//! DuckDB executor for compiled IQL

use duckdb::types::ValueRef;
use duckdb::{Connection, Statement};
use iql_ir::CatalogResolver;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::compile::CompiledQuery;
use crate::query::{col, Select};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),
}

/// Resource limits for one execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionBudget {
    pub max_rows: Option<usize>,
    pub max_memory_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

pub struct DuckExecutor {
    conn: Connection,
}

impl DuckExecutor {
    /// In-memory database
    pub fn new() -> Result<Self, ExecutionError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn execute(
        &self,
        query: &CompiledQuery,
        budget: Option<&ExecutionBudget>,
    ) -> Result<QueryResult, ExecutionError> {
        self.execute_sql(&query.sql(), budget)
    }

    pub fn execute_sql(
        &self,
        sql: &str,
        budget: Option<&ExecutionBudget>,
    ) -> Result<QueryResult, ExecutionError> {
        if let Some(budget) = budget {
            self.apply_budget(budget)?;
        }
        let max_rows = budget.and_then(|b| b.max_rows);

        debug!(sql, "Executing");
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;

        let mut result_rows = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(max_rows) = max_rows {
                if result_rows.len() >= max_rows {
                    return Err(ExecutionError::BudgetExceeded(format!(
                        "Max rows ({}) exceeded",
                        max_rows
                    )));
                }
            }

            let statement: &Statement<'_> = row.as_ref();
            let mut json_row = Vec::with_capacity(statement.column_count());
            for i in 0..statement.column_count() {
                json_row.push(to_json(row.get_ref(i)?));
            }
            result_rows.push(json_row);
        }
        drop(rows);

        // Column names are only known once the statement has run
        let columns = stmt.column_names();
        let row_count = result_rows.len();
        Ok(QueryResult {
            columns,
            rows: result_rows,
            row_count,
        })
    }

    /// Distinct non-null text values of `table.column`, sorted
    pub fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>, ExecutionError> {
        let sql = Select::from_table(table)
            .distinct()
            .column(col(column))
            .filter(col(column).is_null().not())
            .order_by(col(column), false)
            .to_sql();
        let mut stmt = self.conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    /// Similarity catalog over the values actually present in a column
    pub fn catalog(&self, table: &str, column: &str) -> Result<CatalogResolver, ExecutionError> {
        let values = self.distinct_values(table, column)?;
        debug!(table, column, values = values.len(), "Loaded similarity catalog");
        Ok(CatalogResolver::new(values))
    }

    fn apply_budget(&self, budget: &ExecutionBudget) -> Result<(), ExecutionError> {
        if let Some(max_memory_mb) = budget.max_memory_mb {
            self.conn
                .execute_batch(&format!("SET memory_limit = '{}MB'", max_memory_mb))?;
        }
        Ok(())
    }
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        ValueRef::Null => Json::Null,
        ValueRef::Boolean(b) => Json::Bool(b),
        ValueRef::TinyInt(i) => Json::from(i),
        ValueRef::SmallInt(i) => Json::from(i),
        ValueRef::Int(i) => Json::from(i),
        ValueRef::BigInt(i) => Json::from(i),
        ValueRef::HugeInt(i) => i64::try_from(i)
            .map(Json::from)
            .unwrap_or_else(|_| Json::String(i.to_string())),
        ValueRef::UTinyInt(i) => Json::from(i),
        ValueRef::USmallInt(i) => Json::from(i),
        ValueRef::UInt(i) => Json::from(i),
        ValueRef::UBigInt(i) => Json::from(i),
        ValueRef::Float(f) => Json::from(f64::from(f)),
        ValueRef::Double(f) => Json::from(f),
        ValueRef::Text(bytes) => Json::String(String::from_utf8_lossy(bytes).into_owned()),
        // Dates, decimals and nested types: cast in the view's SQL if needed
        _ => Json::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> DuckExecutor {
        let executor = DuckExecutor::new().unwrap();
        executor
            .connection()
            .execute_batch(
                "CREATE TABLE users (id INTEGER, name VARCHAR, country VARCHAR);
                 INSERT INTO users VALUES
                    (1, 'Alice', 'Poland'),
                    (2, 'Bob', 'United States'),
                    (3, 'Carol', 'Poland'),
                    (4, 'Dan', NULL);",
            )
            .unwrap();
        executor
    }

    #[test]
    fn test_execute_sql() {
        let result = executor()
            .execute_sql("SELECT id, name FROM users WHERE id < 3 ORDER BY id", None)
            .unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0], vec![serde_json::json!(1), serde_json::json!("Alice")]);
    }

    #[test]
    fn test_null_cells() {
        let result = executor()
            .execute_sql("SELECT country FROM users WHERE id = 4", None)
            .unwrap();
        assert_eq!(result.rows, vec![vec![serde_json::Value::Null]]);
    }

    #[test]
    fn test_row_budget() {
        let executor = executor();
        let budget = ExecutionBudget {
            max_rows: Some(2),
            ..Default::default()
        };
        let err = executor.execute_sql("SELECT * FROM users", Some(&budget)).unwrap_err();
        assert!(matches!(err, ExecutionError::BudgetExceeded(_)));

        let ok = executor
            .execute_sql("SELECT * FROM users LIMIT 2", Some(&budget))
            .unwrap();
        assert_eq!(ok.row_count, 2);
    }

    #[test]
    fn test_memory_budget_applies() {
        let budget = ExecutionBudget {
            max_memory_mb: Some(256),
            ..Default::default()
        };
        let result = executor().execute_sql("SELECT 1 AS one", Some(&budget)).unwrap();
        assert_eq!(result.rows, vec![vec![serde_json::json!(1)]]);
    }

    #[test]
    fn test_catalog_from_column() {
        let executor = executor();
        assert_eq!(
            executor.distinct_values("users", "country").unwrap(),
            vec!["Poland", "United States"]
        );
        let catalog = executor.catalog("users", "country").unwrap();
        assert_eq!(catalog.lookup("united states"), Some("United States"));
    }

    #[test]
    fn test_bad_sql_is_a_database_error() {
        let err = executor().execute_sql("SELECT * FROM missing", None).unwrap_err();
        assert!(matches!(err, ExecutionError::Database(_)));
    }
}
