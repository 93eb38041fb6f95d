//! Evaluation of generated IQL
//!
//! Scores a dataset of generated filter/action texts against a view:
//! hallucinated operation rates, valid-IQL rate and syntax-error rate.

mod dataset;
mod metrics;

pub use dataset::{load_jsonl, read_jsonl, write_jsonl, DatasetError, EvaluationRecord};
pub use metrics::{
    calculate_dataset_metrics, count_hallucinated, evaluate_dataset, evaluate_record,
    DatasetMetrics, MetricCounts, DEFAULT_CONCURRENCY,
};
