//! Structured logging for the benchmark binary
//!
//! Console output in pretty, JSON or compact form, optionally mirrored to a
//! daily-rotated file. Settings come from [`LoggingConfig`], which already
//! carries the `RUST_LOG`, `LOG_FORMAT`, `LOG_OUTPUT` and `LOG_DIR`
//! overrides.

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "iql-bench.log";

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format for production (structured logging)
    Json,
    /// Compact format for testing
    Compact,
}

impl LogFormat {
    /// Unknown values fall back to pretty
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    File,
    Both,
}

impl LogOutput {
    /// Unknown values fall back to stdout
    pub fn parse(value: &str) -> Self {
        match value {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Stdout,
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    // Quiet the HTTP stack under the OpenAI client
    ["hyper=warn", "reqwest=warn", "h2=warn"]
        .into_iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(filter, |filter, directive| filter.add_directive(directive))
}

fn console_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Pretty => fmt::layer().pretty().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    }
}

fn file_layer<S>(directory: &str) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if let Err(e) = std::fs::create_dir_all(directory) {
        eprintln!("Cannot create log directory {}: {}", directory, e);
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, directory, LOG_FILE_PREFIX);
    fmt::layer().with_writer(appender).with_ansi(false).boxed()
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let format = LogFormat::parse(&config.format);
    let output = LogOutput::parse(&config.output);

    let registry = tracing_subscriber::registry().with(env_filter(&config.level));
    match output {
        LogOutput::Stdout => registry.with(console_layer(format)).try_init()?,
        LogOutput::File => registry.with(file_layer(&config.directory)).try_init()?,
        LogOutput::Both => registry
            .with(console_layer(format))
            .with(file_layer(&config.directory))
            .try_init()?,
    }

    tracing::debug!(
        format = ?format,
        output = ?output,
        level = %config.level,
        directory = %config.directory,
        "Logging initialized"
    );
    Ok(())
}
