//! Compile scenario over a view whose operations only produce literals

use iql_duck::{col, compile, lit, Select, SqlView, ViewBindings};
use iql_ir::Validator;
use iql_registry::{ExposedOperation, ParamType};

struct MockView;

impl SqlView for MockView {
    fn base_query(&self) -> Select {
        Select::new().column_as(lit("test"), "foo")
    }
}

fn bindings() -> ViewBindings<MockView> {
    ViewBindings::builder("MockView")
        .description("Mock view")
        .filter(
            ExposedOperation::new("method_foo").param("idx", ParamType::Int),
            |_, args| Ok(lit(args.int(0)?)),
        )
        .filter(
            ExposedOperation::new("method_bar")
                .param("city", ParamType::Str)
                .param("year", ParamType::Int),
            |_, args| Ok(lit(format!("hello {} in {}", args.str(0)?, args.int(1)?))),
        )
        .action(ExposedOperation::new("action_baz"), |_, query, _| {
            Ok(query.order_by(col("foo"), false))
        })
        .action(
            ExposedOperation::new("action_qux").param("limit", ParamType::Int),
            |_, query, args| Ok(query.limit(args.count(0)?)),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_mock_view_compiles_to_expected_sql() {
    let bindings = bindings();
    let validated = Validator::new()
        .validate_query(
            "method_foo(1) and method_bar('London', 2020)",
            "action_baz()\naction_qux(5)",
            bindings.descriptor(),
        )
        .await
        .unwrap();
    assert_eq!(validated.filters.len(), 2);
    assert_eq!(validated.actions.len(), 2);

    let compiled = compile(&validated.filters, &validated.actions, &MockView, &bindings).unwrap();
    assert_eq!(
        compiled.sql(),
        "SELECT 'test' AS foo WHERE 1 AND 'hello London in 2020' ORDER BY foo LIMIT 5"
    );
}

#[tokio::test]
async fn test_compile_is_repeatable() {
    let bindings = bindings();
    let validated = Validator::new()
        .validate_query("method_foo(1)", "action_qux(5)\naction_baz()", bindings.descriptor())
        .await
        .unwrap();

    let first = compile(&validated.filters, &validated.actions, &MockView, &bindings).unwrap();
    let second = compile(&validated.filters, &validated.actions, &MockView, &bindings).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.sql(),
        "SELECT * FROM (SELECT 'test' AS foo WHERE 1 LIMIT 5) AS q1 ORDER BY foo"
    );
}

#[tokio::test]
async fn test_unknown_operation_rejected_before_compile() {
    let bindings = bindings();
    let err = Validator::new()
        .validate_query("method_foo(1) and method_zap()", "", bindings.descriptor())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unsupported filter: method_zap");
}
