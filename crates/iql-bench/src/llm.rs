//! Text generation: question -> IQL, question -> view
//!
//! The generator asks the model for a JSON object holding the filters and
//! actions texts, validates them against the view, and on failure sends the
//! error back to the model for another attempt.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use iql_ir::Validator;
use iql_registry::{RegistryError, ViewDescriptor, ViewRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OpenAI error: {0}")]
    OpenAi(#[from] OpenAIError),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("No views registered")]
    NoViews,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>, config: &LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

fn to_openai(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = message.content.clone();
    Ok(match message.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()?,
        ),
        Role::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()?,
        ),
    })
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let messages = messages
            .iter()
            .map(to_openai)
            .collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .temperature(self.temperature)
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Filters and actions texts as produced by the model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedIql {
    #[serde(default)]
    pub filters: String,
    #[serde(default)]
    pub actions: String,
}

/// Final answer of a generation run
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub iql: GeneratedIql,
    pub attempts: usize,
    /// Error of the last attempt when no attempt validated
    pub error: Option<String>,
}

#[async_trait]
pub trait IqlGenerator: Send + Sync {
    async fn generate(&self, question: &str, view: &ViewDescriptor) -> Result<Generation, LlmError>;
}

pub fn iql_prompt(view: &ViewDescriptor) -> String {
    format!(
        r#"You translate questions about the "{name}" data view into IQL, a restricted call language.

Filters select rows. Write them as calls joined by `and`, for example: filter_a('Paris') and filter_b(30)
Actions shape the result. Write one call per line.
Arguments must be literals: quoted strings, integers, floats, True or False.
Use only the operations listed below. Leave a part empty when the question needs none.

Filters:
{filters}

Actions:
{actions}

Reply with JSON only, no markdown: {{"filters": "<filters>", "actions": "<actions>"}}"#,
        name = view.name(),
        filters = view.filters().to_prompt(),
        actions = view.actions().to_prompt(),
    )
}

/// Parse the model's JSON reply, tolerating a markdown code fence
pub fn parse_reply(content: &str) -> Result<GeneratedIql, serde_json::Error> {
    let trimmed = content.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(fenced) => {
            let fenced = fenced.strip_suffix("```").unwrap_or(fenced);
            // Drop the language tag line
            fenced.split_once('\n').map_or(fenced, |(_, rest)| rest)
        }
        None => trimmed,
    };
    serde_json::from_str(body.trim())
}

/// Chat-model-backed generator with error feedback
pub struct LlmIqlGenerator {
    model: Arc<dyn ChatModel>,
    validator: Arc<Validator>,
    max_attempts: usize,
}

impl LlmIqlGenerator {
    pub fn new(model: Arc<dyn ChatModel>, validator: Arc<Validator>, max_attempts: usize) -> Self {
        Self {
            model,
            validator,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl IqlGenerator for LlmIqlGenerator {
    async fn generate(&self, question: &str, view: &ViewDescriptor) -> Result<Generation, LlmError> {
        let mut messages = vec![ChatMessage::system(iql_prompt(view)), ChatMessage::user(question)];
        let mut last = Generation {
            iql: GeneratedIql::default(),
            attempts: 0,
            error: None,
        };

        for attempt in 1..=self.max_attempts {
            let content = self.model.complete(&messages).await?;
            debug!(attempt, content = %content, "Model reply");

            let feedback = match parse_reply(&content) {
                Ok(iql) => match self
                    .validator
                    .validate_query(&iql.filters, &iql.actions, view)
                    .await
                {
                    Ok(_) => {
                        info!(attempt, view = view.name(), "Generated valid IQL");
                        return Ok(Generation {
                            iql,
                            attempts: attempt,
                            error: None,
                        });
                    }
                    Err(e) => {
                        let feedback = format!("Error: {} ({}). Please fix the IQL and reply again.", e, e.kind());
                        last = Generation {
                            iql,
                            attempts: attempt,
                            error: Some(e.to_string()),
                        };
                        feedback
                    }
                },
                Err(e) => {
                    last = Generation {
                        iql: GeneratedIql::default(),
                        attempts: attempt,
                        error: Some(format!("Unreadable reply: {}", e)),
                    };
                    format!(
                        "Error: your reply is not the requested JSON object ({}). Reply with JSON only.",
                        e
                    )
                }
            };

            warn!(attempt, feedback = %feedback, "Generated IQL rejected");
            messages.push(ChatMessage::assistant(content));
            messages.push(ChatMessage::user(feedback));
        }

        Ok(last)
    }
}

/// Picks the view best suited to a question
pub struct ViewSelector {
    model: Arc<dyn ChatModel>,
}

impl ViewSelector {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub async fn select_view(
        &self,
        question: &str,
        registry: &ViewRegistry,
    ) -> Result<Arc<ViewDescriptor>, LlmError> {
        let views = registry.list();
        match views.as_slice() {
            [] => return Err(LlmError::NoViews),
            [(name, _)] => return Ok(registry.get(name)?),
            _ => {}
        }

        let listing = views
            .iter()
            .map(|(name, description)| format!("{}: {}", name, description))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = [
            ChatMessage::system(format!(
                "Pick the data view that can answer the user's question.\n\nViews:\n{}\n\nReply with the view name only.",
                listing
            )),
            ChatMessage::user(question),
        ];

        let answer = self.model.complete(&messages).await?;
        let name = answer
            .trim()
            .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.');
        debug!(question, view = name, "Selected view");
        Ok(registry.get(name)?)
    }
}
