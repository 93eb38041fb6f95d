//! Similarity resolution for hinted parameters
//!
//! A hinted parameter's raw text (e.g. "USA") is mapped onto a value that
//! actually exists in the data (e.g. "United States") before compilation.
//! Real deployments plug an embedding index in behind [`SimilarityResolver`];
//! [`CatalogResolver`] covers fixed catalogs and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("Similarity backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SimilarityResolver: Send + Sync {
    /// Nearest catalog value for `raw`, `None` when nothing is close enough
    async fn resolve(&self, raw: &str) -> Result<Option<String>, SimilarityError>;
}

/// In-memory catalog matched on normalized text
///
/// Matching order: exact, normalized (case, punctuation, spacing), then a
/// unique normalized prefix.
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    values: Vec<String>,
    normalized: HashMap<String, usize>,
}

impl CatalogResolver {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut resolver = Self::default();
        for value in values {
            let value = value.into();
            let key = normalize(&value);
            if key.is_empty() || resolver.normalized.contains_key(&key) {
                continue;
            }
            resolver.normalized.insert(key, resolver.values.len());
            resolver.values.push(value);
        }
        resolver
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn lookup(&self, raw: &str) -> Option<&str> {
        if let Some(exact) = self.values.iter().find(|v| v.as_str() == raw) {
            return Some(exact);
        }

        let key = normalize(raw);
        if key.is_empty() {
            return None;
        }
        if let Some(&i) = self.normalized.get(&key) {
            return Some(&self.values[i]);
        }

        let mut candidates = self
            .normalized
            .iter()
            .filter(|(candidate, _)| candidate.starts_with(&key));
        match (candidates.next(), candidates.next()) {
            (Some((_, &i)), None) => Some(&self.values[i]),
            _ => None,
        }
    }
}

#[async_trait]
impl SimilarityResolver for CatalogResolver {
    async fn resolve(&self, raw: &str) -> Result<Option<String>, SimilarityError> {
        Ok(self.lookup(raw).map(str::to_string))
    }
}

fn normalize(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
