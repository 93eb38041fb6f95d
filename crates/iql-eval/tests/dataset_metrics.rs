//! Dataset metrics over a mock view

use iql_eval::{
    calculate_dataset_metrics, evaluate_dataset, load_jsonl, write_jsonl, DatasetMetrics,
    EvaluationRecord,
};
use async_trait::async_trait;
use iql_ir::{SimilarityError, SimilarityResolver, Validator};
use iql_registry::{ExposedOperation, ParamType, ViewDescriptor};
use std::sync::Arc;

fn view() -> Arc<ViewDescriptor> {
    let view = ViewDescriptor::new(
        "MockView",
        "Mock view",
        vec![
            ExposedOperation::new("method_foo").param("idx", ParamType::Int),
            ExposedOperation::new("method_bar")
                .param("city", ParamType::Str)
                .param("year", ParamType::Int),
        ],
        vec![
            ExposedOperation::new("action_baz"),
            ExposedOperation::new("action_qux").param("limit", ParamType::Int),
        ],
    )
    .unwrap();
    Arc::new(view)
}

fn validator() -> Arc<Validator> {
    Arc::new(Validator::new().without_similarity())
}

#[tokio::test]
async fn test_one_hallucinated_filter_of_two() {
    let dataset = vec![EvaluationRecord::new(
        "bad_method(1) and method_bar('Paris', 5)",
        "",
    )];
    let metrics = calculate_dataset_metrics(&dataset, validator(), view()).await;
    assert_eq!(metrics.hallucinated_filters, 0.5);
    assert_eq!(metrics.hallucinated_actions, 0.0);
    assert_eq!(metrics.valid_iql, 0.0);
    assert_eq!(metrics.syntax_errors, 0.0);
}

#[tokio::test]
async fn test_unbalanced_paren_is_a_syntax_error_only() {
    let dataset = vec![EvaluationRecord::new("method_foo(1", "action_baz()")];
    let metrics = calculate_dataset_metrics(&dataset, validator(), view()).await;
    assert_eq!(metrics.syntax_errors, 1.0);
    assert_eq!(metrics.hallucinated_filters, 0.0);
    assert_eq!(metrics.valid_iql, 0.0);
}

#[tokio::test]
async fn test_empty_dataset() {
    let metrics = calculate_dataset_metrics(&[], validator(), view()).await;
    assert_eq!(metrics, DatasetMetrics::default());
}

#[tokio::test]
async fn test_ratios_sum_counts_instead_of_averaging() {
    let dataset = vec![
        EvaluationRecord::new("ghost(1)", ""),
        EvaluationRecord::new("method_foo(1) and method_foo(2) and method_foo(3)", ""),
    ];
    let metrics = calculate_dataset_metrics(&dataset, validator(), view()).await;
    assert_eq!(metrics.hallucinated_filters, 0.25);
    assert_eq!(metrics.valid_iql, 0.5);
}

#[tokio::test]
async fn test_mixed_dataset() {
    let dataset = vec![
        EvaluationRecord::new("method_foo(1) and method_bar('London', 2020)", "action_baz()\naction_qux(5)"),
        EvaluationRecord::new("method_foo(1) or method_foo(2)", ""),
        EvaluationRecord::new("method_foo('one')", "action_baz()\nshuffle()"),
        EvaluationRecord::new("", ""),
    ];
    let counts = evaluate_dataset(&dataset, validator(), view(), 2).await;
    assert_eq!(counts.examples, 4);
    assert_eq!(counts.valid, 2);
    assert_eq!(counts.syntax_errors, 1);
    assert_eq!(counts.total_filters, 5);
    assert_eq!(counts.hallucinated_filters, 0);
    assert_eq!((counts.hallucinated_actions, counts.total_actions), (1, 4));

    let metrics = counts.metrics();
    assert_eq!(metrics.valid_iql, 0.5);
    assert_eq!(metrics.syntax_errors, 0.25);
    assert_eq!(metrics.hallucinated_actions, 0.25);
}

#[tokio::test]
async fn test_concurrency_does_not_change_results() {
    let dataset: Vec<_> = (0..40)
        .map(|i| match i % 4 {
            0 => EvaluationRecord::new("method_foo(1)", "action_qux(3)"),
            1 => EvaluationRecord::new("ghost(1) and method_foo(2)", ""),
            2 => EvaluationRecord::new("method_foo(", ""),
            _ => EvaluationRecord::new("", "action_qux('x')"),
        })
        .collect();

    let serial = evaluate_dataset(&dataset, validator(), view(), 1).await;
    let parallel = evaluate_dataset(&dataset, validator(), view(), 16).await;
    assert_eq!(serial, parallel);
    assert_eq!(serial.valid, 10);
    assert_eq!(serial.syntax_errors, 10);
}

#[tokio::test]
async fn test_metrics_from_jsonl_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("generated.jsonl");
    write_jsonl(
        &path,
        &[
            EvaluationRecord::new("method_foo(1)", ""),
            EvaluationRecord::new("bad_method(1)", ""),
        ],
    )
    .unwrap();

    let dataset = load_jsonl(&path).unwrap();
    let metrics = calculate_dataset_metrics(&dataset, validator(), view()).await;
    assert_eq!(metrics.hallucinated_filters, 0.5);
    assert_eq!(metrics.valid_iql, 0.5);
}

struct BrokenResolver;

#[async_trait]
impl SimilarityResolver for BrokenResolver {
    async fn resolve(&self, raw: &str) -> Result<Option<String>, SimilarityError> {
        panic!("resolver crashed on {raw}");
    }
}

#[tokio::test]
async fn test_crashed_record_is_excluded_without_aborting() {
    let view = ViewDescriptor::new(
        "CityView",
        "",
        vec![
            ExposedOperation::new("method_foo").param("idx", ParamType::Int),
            ExposedOperation::new("from_city").similar_param("city", "city"),
        ],
        vec![],
    )
    .unwrap();
    let validator = Validator::new().with_resolver("city", Arc::new(BrokenResolver));
    let dataset = vec![
        EvaluationRecord::new("method_foo(1)", ""),
        EvaluationRecord::new("from_city('Paris') and ghost(1)", ""),
    ];

    let counts = evaluate_dataset(&dataset, Arc::new(validator), Arc::new(view), 2).await;
    assert_eq!(counts.examples, 2);
    assert_eq!(counts.valid, 1);
    assert_eq!(counts.syntax_errors, 0);
    assert_eq!((counts.hallucinated_filters, counts.total_filters), (0, 1));

    let metrics = counts.metrics();
    assert_eq!(metrics.valid_iql, 0.5);
    assert_eq!(metrics.hallucinated_filters, 0.0);
}
