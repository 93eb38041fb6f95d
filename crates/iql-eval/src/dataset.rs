//! Evaluation datasets stored as JSON lines

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One generated (filters, actions) pair, with the question it answers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// View the texts were generated for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(default)]
    pub iql_filters: String,
    #[serde(default)]
    pub iql_actions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
}

impl EvaluationRecord {
    pub fn new(iql_filters: impl Into<String>, iql_actions: impl Into<String>) -> Self {
        Self {
            iql_filters: iql_filters.into(),
            iql_actions: iql_actions.into(),
            ..Default::default()
        }
    }
}

/// Blank lines are skipped; line numbers in errors are 1-based
pub fn read_jsonl<R: BufRead>(reader: R) -> Result<Vec<EvaluationRecord>, DatasetError> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| DatasetError::Parse { line: i + 1, source })?;
        records.push(record);
    }
    Ok(records)
}

pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<EvaluationRecord>, DatasetError> {
    read_jsonl(BufReader::new(File::open(path)?))
}

pub fn write_jsonl(path: impl AsRef<Path>, records: &[EvaluationRecord]) -> Result<(), DatasetError> {
    let mut out = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
