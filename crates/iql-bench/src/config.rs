//! Configuration for the IQL benchmark
//!
//! Loads configuration from:
//! 1. config.yaml - logging, model, evaluation settings and view descriptors
//! 2. .env file - secrets (API keys)
//!
//! Environment variables always override config.yaml values.

use iql_registry::ViewSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Text generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    /// Generation attempts per question, including retries with error feedback
    pub max_attempts: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_attempts: 3,
        }
    }
}

/// Similarity catalog built from the distinct values of a table column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Resolver name referenced by parameter hints
    pub resolver: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Records scored at the same time
    pub concurrency: usize,
    pub similarity_timeout_ms: u64,
    /// Resolve hinted values; needs `database` and `catalogs`
    pub resolve_similarity: bool,
    /// DuckDB file the catalogs are read from
    pub database: Option<String>,
    pub catalogs: Vec<CatalogConfig>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            concurrency: iql_eval::DEFAULT_CONCURRENCY,
            similarity_timeout_ms: 10_000,
            resolve_similarity: false,
            database: None,
            catalogs: Vec::new(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub evaluation: EvaluationConfig,
    pub views: Vec<ViewSpec>,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Override values from `lookup` (the process environment in practice)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("IQL_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(timeout) = lookup("IQL_SIMILARITY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.evaluation.similarity_timeout_ms = timeout;
        }
        if let Some(concurrency) = lookup("IQL_EVAL_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.evaluation.concurrency = concurrency;
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }
    }

    /// Get OpenAI API key from environment (must be in .env)
    pub fn openai_api_key() -> Result<String, ConfigError> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }
}

/// View descriptors kept in their own YAML file
pub fn load_views<P: AsRef<Path>>(path: P) -> Result<Vec<ViewSpec>, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONFIG_YAML: &str = r#"
logging:
  level: "debug"
  format: "json"
llm:
  model: "gpt-4o"
evaluation:
  concurrency: 4
  resolve_similarity: true
  database: "candidates.duckdb"
  catalogs:
    - resolver: country
      table: candidates
      column: country
views:
  - name: CandidateView
    description: Job candidates
    filters:
      - name: at_least_experience
        params:
          - name: years
            type: int
      - name: from_country
        params:
          - name: country
            type: str
            similarity: country
    actions:
      - name: limit
        params:
          - name: n
            type: int
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_attempts, 3);
        assert!(!config.evaluation.resolve_similarity);
        assert!(config.views.is_empty());
    }

    #[test]
    fn test_load_yaml_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, CONFIG_YAML).unwrap();

        let mut config: Config = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        config.apply_overrides(|_| None);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.output, "stdout");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.evaluation.concurrency, 4);
        assert_eq!(config.evaluation.catalogs[0].column, "country");
        assert_eq!(config.views.len(), 1);
        assert_eq!(config.views[0].filters[1].params[0].similarity.as_deref(), Some("country"));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("IQL_LLM_MODEL", "gpt-4.1"),
            ("IQL_EVAL_CONCURRENCY", "2"),
            ("IQL_SIMILARITY_TIMEOUT_MS", "not a number"),
            ("LOG_FORMAT", "compact"),
        ]
        .into_iter()
        .collect();

        let mut config: Config = serde_yaml::from_str(CONFIG_YAML).unwrap();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.model, "gpt-4.1");
        assert_eq!(config.evaluation.concurrency, 2);
        assert_eq!(config.evaluation.similarity_timeout_ms, 10_000);
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_views_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.yaml");
        std::fs::write(
            &path,
            "- name: MockView\n  filters:\n    - name: method_foo\n      params:\n        - {name: idx, type: int}\n",
        )
        .unwrap();
        let views = load_views(&path).unwrap();
        assert_eq!(views[0].name, "MockView");
        assert!(views[0].actions.is_empty());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(Config::load("/nonexistent/config.yaml"), Err(ConfigError::Io(_))));
    }
}
