//! Dataset metrics
//!
//! Each record contributes raw counts; dataset ratios are computed from the
//! summed counts, so every call and every example weighs the same. Records
//! are scored concurrently and never affect each other.

use iql_ast::extract_call_names;
use iql_ir::Validator;
use iql_registry::{OperationSet, ViewDescriptor};
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dataset::EvaluationRecord;

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Numerators and denominators behind [`DatasetMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCounts {
    pub examples: usize,
    pub valid: usize,
    pub syntax_errors: usize,
    pub hallucinated_filters: usize,
    pub total_filters: usize,
    pub hallucinated_actions: usize,
    pub total_actions: usize,
}

impl MetricCounts {
    pub fn metrics(&self) -> DatasetMetrics {
        DatasetMetrics {
            valid_iql: ratio(self.valid, self.examples),
            hallucinated_filters: ratio(self.hallucinated_filters, self.total_filters),
            hallucinated_actions: ratio(self.hallucinated_actions, self.total_actions),
            syntax_errors: ratio(self.syntax_errors, self.examples),
        }
    }
}

impl Add for MetricCounts {
    type Output = MetricCounts;

    fn add(mut self, other: MetricCounts) -> MetricCounts {
        self += other;
        self
    }
}

impl AddAssign for MetricCounts {
    fn add_assign(&mut self, other: MetricCounts) {
        self.examples += other.examples;
        self.valid += other.valid;
        self.syntax_errors += other.syntax_errors;
        self.hallucinated_filters += other.hallucinated_filters;
        self.total_filters += other.total_filters;
        self.hallucinated_actions += other.hallucinated_actions;
        self.total_actions += other.total_actions;
    }
}

impl Sum for MetricCounts {
    fn sum<I: Iterator<Item = MetricCounts>>(iter: I) -> Self {
        iter.fold(MetricCounts::default(), Add::add)
    }
}

/// Dataset-level ratios, each 0 when its denominator is 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetrics {
    pub valid_iql: f64,
    pub hallucinated_filters: f64,
    pub hallucinated_actions: f64,
    pub syntax_errors: f64,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// `(unknown calls, total calls)` in `source`. Unreadable text counts `(0, 0)`.
pub fn count_hallucinated(source: &str, allowed: &OperationSet) -> (usize, usize) {
    match extract_call_names(source) {
        Some(names) => {
            let hallucinated = names.iter().filter(|name| !allowed.contains(name)).count();
            (hallucinated, names.len())
        }
        None => (0, 0),
    }
}

/// Counts for a single record
pub async fn evaluate_record(
    record: &EvaluationRecord,
    validator: &Validator,
    view: &ViewDescriptor,
) -> MetricCounts {
    let (hallucinated_filters, total_filters) = count_hallucinated(&record.iql_filters, view.filters());
    let (hallucinated_actions, total_actions) = count_hallucinated(&record.iql_actions, view.actions());

    let mut counts = MetricCounts {
        examples: 1,
        hallucinated_filters,
        total_filters,
        hallucinated_actions,
        total_actions,
        ..Default::default()
    };

    match validator
        .validate_query(&record.iql_filters, &record.iql_actions, view)
        .await
    {
        Ok(_) => counts.valid = 1,
        Err(e) if e.kind().is_syntax() => {
            debug!(error = %e, "Syntax error in generated IQL");
            counts.syntax_errors = 1;
        }
        Err(e) => warn!(kind = %e.kind(), error = %e, "Invalid IQL"),
    }
    counts
}

/// Score every record, at most `concurrency` at a time.
///
/// A record whose task fails is logged and contributes nothing but still
/// counts as an example.
pub async fn evaluate_dataset(
    records: &[EvaluationRecord],
    validator: Arc<Validator>,
    view: Arc<ViewDescriptor>,
    concurrency: usize,
) -> MetricCounts {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, record) in records.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let validator = Arc::clone(&validator);
        let view = Arc::clone(&view);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            Ok::<_, AcquireError>(evaluate_record(&record, &validator, &view).await)
        });
        debug!(index, "Queued record");
    }

    let mut counts = MetricCounts::default();
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(|e| e.to_string()).and_then(|r| r.map_err(|e| e.to_string())) {
            Ok(record_counts) => counts += record_counts,
            Err(error) => warn!(error = %error, "Evaluation task failed"),
        }
    }
    counts.examples = records.len();

    info!(
        examples = counts.examples,
        valid = counts.valid,
        syntax_errors = counts.syntax_errors,
        "Evaluated dataset"
    );
    counts
}

/// Ratios for `records` against `view`
pub async fn calculate_dataset_metrics(
    records: &[EvaluationRecord],
    validator: Arc<Validator>,
    view: Arc<ViewDescriptor>,
) -> DatasetMetrics {
    evaluate_dataset(records, validator, view, DEFAULT_CONCURRENCY)
        .await
        .metrics()
}
