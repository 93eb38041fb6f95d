//! IQL benchmark
//!
//! Generates IQL for a set of questions with an LLM, scores generated IQL
//! against the registered views, and checks single filter/action pairs.
//!
//! ```bash
//! # Generate IQL for every question in a JSONL file
//! iql-bench generate --questions questions.jsonl --output generated.jsonl
//!
//! # Hallucination, validity and syntax-error rates
//! iql-bench evaluate --dataset generated.jsonl --view CandidateView
//!
//! # Validate one pair of texts
//! iql-bench check --view CandidateView --filters "at_least_experience(3)" --actions "limit(5)"
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use iql_duck::DuckExecutor;
use iql_eval::{evaluate_dataset, load_jsonl, write_jsonl, EvaluationRecord, MetricCounts};
use iql_ir::Validator;
use iql_registry::ViewRegistry;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod config;
mod llm;
mod logging;

use config::Config;
use llm::{ChatModel, IqlGenerator, LlmIqlGenerator, OpenAiChat, ViewSelector};

#[derive(Parser, Debug)]
#[command(name = "iql-bench")]
#[command(about = "Generate and evaluate IQL for registered data views")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Extra view descriptors (YAML list)
    #[arg(long, global = true)]
    views: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate IQL for every question of a JSONL file
    Generate {
        /// Records with a `question` field
        #[arg(long)]
        questions: PathBuf,

        /// Where generated records are written
        #[arg(short, long)]
        output: PathBuf,

        /// View to generate for; chosen per question by the model if omitted
        #[arg(long)]
        view: Option<String>,
    },

    /// Score generated IQL
    Evaluate {
        /// Generated records (JSONL)
        #[arg(long)]
        dataset: PathBuf,

        /// View for records that do not name one
        #[arg(long)]
        view: Option<String>,

        /// Write the metrics JSON here as well as to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate one filters/actions pair against a view
    Check {
        #[arg(long)]
        view: String,

        #[arg(long, default_value = "")]
        filters: String,

        #[arg(long, default_value = "")]
        actions: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::from_env()
    };
    if let Some(path) = &cli.views {
        let views = config::load_views(path).with_context(|| format!("loading {}", path.display()))?;
        config.views.extend(views);
    }

    logging::init(&config.logging)?;
    info!(config = %cli.config.display(), views = config.views.len(), "Starting iql-bench");

    let registry = ViewRegistry::from_specs(config.views.clone())?;
    let validator = Arc::new(build_validator(&config)?);

    match cli.command {
        Commands::Generate {
            questions,
            output,
            view,
        } => generate(&config, &registry, validator, &questions, &output, view.as_deref()).await,
        Commands::Evaluate {
            dataset,
            view,
            output,
        } => evaluate(&config, &registry, validator, &dataset, view.as_deref(), output.as_deref()).await,
        Commands::Check {
            view,
            filters,
            actions,
        } => check(&registry, &validator, &view, &filters, &actions).await,
    }
}

/// Similarity resolution needs catalogs read from the configured database
fn build_validator(config: &Config) -> Result<Validator> {
    let evaluation = &config.evaluation;
    let validator = Validator::new().with_similarity_timeout(Duration::from_millis(evaluation.similarity_timeout_ms));
    if !evaluation.resolve_similarity {
        return Ok(validator.without_similarity());
    }

    let Some(database) = &evaluation.database else {
        bail!("evaluation.resolve_similarity needs evaluation.database");
    };
    let executor = DuckExecutor::open(database).with_context(|| format!("opening {}", database))?;

    let mut validator = validator;
    for catalog in &evaluation.catalogs {
        let resolver = executor
            .catalog(&catalog.table, &catalog.column)
            .with_context(|| format!("loading catalog {}.{}", catalog.table, catalog.column))?;
        info!(resolver = %catalog.resolver, values = resolver.len(), "Loaded similarity catalog");
        validator = validator.with_resolver(catalog.resolver.clone(), Arc::new(resolver));
    }
    Ok(validator)
}

async fn generate(
    config: &Config,
    registry: &ViewRegistry,
    validator: Arc<Validator>,
    questions: &Path,
    output: &Path,
    view: Option<&str>,
) -> Result<()> {
    let api_key = Config::openai_api_key()?;
    let model: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(api_key, &config.llm));
    let generator = LlmIqlGenerator::new(model.clone(), validator, config.llm.max_attempts);
    let selector = ViewSelector::new(model);
    let fixed_view = view.map(|name| registry.get(name)).transpose()?;

    let mut generated = Vec::new();
    for record in load_jsonl(questions)? {
        let Some(question) = record.question.clone() else {
            warn!("Skipping record without a question");
            continue;
        };
        let descriptor = match &fixed_view {
            Some(descriptor) => descriptor.clone(),
            None => selector.select_view(&question, registry).await?,
        };

        let generation = generator.generate(&question, &descriptor).await?;
        if let Some(error) = &generation.error {
            warn!(question = %question, attempts = generation.attempts, error = %error, "No valid IQL generated");
        }
        generated.push(EvaluationRecord {
            view: Some(descriptor.name().to_string()),
            iql_filters: generation.iql.filters,
            iql_actions: generation.iql.actions,
            ..record
        });
    }

    write_jsonl(output, &generated)?;
    info!(records = generated.len(), output = %output.display(), "Wrote generated IQL");
    Ok(())
}

async fn evaluate(
    config: &Config,
    registry: &ViewRegistry,
    validator: Arc<Validator>,
    dataset: &Path,
    default_view: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let records = load_jsonl(dataset)?;

    let mut by_view: BTreeMap<String, Vec<EvaluationRecord>> = BTreeMap::new();
    for record in records {
        let Some(view) = record.view.clone().or_else(|| default_view.map(str::to_string)) else {
            bail!("record without a view and no --view given");
        };
        by_view.entry(view).or_default().push(record);
    }

    let mut per_view = serde_json::Map::new();
    let mut total = MetricCounts::default();
    for (view, records) in &by_view {
        let descriptor = registry.get(view)?;
        let counts = evaluate_dataset(records, validator.clone(), descriptor, config.evaluation.concurrency).await;
        per_view.insert(view.clone(), json!({"counts": counts, "metrics": counts.metrics()}));
        total += counts;
    }

    let report = json!({
        "metrics": total.metrics(),
        "counts": total,
        "views": per_view,
    });
    let text = serde_json::to_string_pretty(&report)?;
    println!("{}", text);
    if let Some(path) = output {
        std::fs::write(path, &text).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

async fn check(registry: &ViewRegistry, validator: &Validator, view: &str, filters: &str, actions: &str) -> Result<()> {
    let descriptor = registry.get(view)?;
    match validator.validate_query(filters, actions, &descriptor).await {
        Ok(query) => {
            let report = json!({
                "valid": true,
                "filters": query.filters.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                "actions": query.actions.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                "fingerprint": query.fingerprint()?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            let report = json!({
                "valid": false,
                "kind": e.kind(),
                "error": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            bail!("IQL rejected by view {}: {}", view, e.kind())
        }
    }
}
