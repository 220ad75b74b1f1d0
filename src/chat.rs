//! Chat orchestration.
//!
//! [`run_chat`] embeds the newest user message, retrieves context from the
//! named assessment or archetype (when one is given and its settings allow
//! semantic search), assembles the prompt, and calls the chat model once.
//! Provider errors are returned as-is; there is no retry.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use archmen_core::chat::{
    assemble_messages, reply_or_fallback, ChatMessage, ChatProvider, ChatRequest, Role,
};
use archmen_core::embedding::{embed_checked, truncate_input, EmbeddingProvider};
use archmen_core::models::ContentOwner;
use archmen_core::store::KnowledgeStore;

use crate::config::{ChatConfig, Config};

/// A chat provider that rejects every request.
pub struct DisabledChatProvider;

#[async_trait]
impl ChatProvider for DisabledChatProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<Option<String>> {
        bail!("Chat provider is disabled. Set [chat] provider in config.")
    }
}

/// Chat provider for OpenAI-compatible `POST /chat/completions`.
pub struct OpenAIChatProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAIChatProvider {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build chat HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenAIChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Option<String>> {
        let system = ChatMessage::system(request.system_prompt.clone());
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(&system);
        messages.extend(request.messages.iter());

        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Chat API error {}: {}", status, text);
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .context("invalid chat completion response")?;
        Ok(first_content(parsed))
    }
}

fn first_content(response: CompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
}

pub fn create_chat_provider(config: &ChatConfig) -> Result<Arc<dyn ChatProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatProvider)),
        "openai" => Ok(Arc::new(OpenAIChatProvider::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}

/// Failures of a chat turn, split by who is at fault.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0} not found")]
    ScopeNotFound(ContentOwner),
    #[error(transparent)]
    Upstream(anyhow::Error),
    #[error(transparent)]
    Store(anyhow::Error),
}

/// Injected collaborators for one chat turn.
pub struct ChatContext<'a> {
    pub config: &'a Config,
    pub store: &'a dyn KnowledgeStore,
    pub embedder: &'a dyn EmbeddingProvider,
    pub chat: &'a dyn ChatProvider,
}

/// Answer the last user message of `messages`.
///
/// `messages` is the full conversation; its final entry must be a user
/// message and becomes the prompt, everything before it is history.
pub async fn run_chat(
    ctx: &ChatContext<'_>,
    messages: &[ChatMessage],
    scope: Option<&ContentOwner>,
) -> Result<String, ChatError> {
    let (last, history) = messages
        .split_last()
        .ok_or_else(|| ChatError::Invalid("messages must not be empty".into()))?;
    if last.role != Role::User {
        return Err(ChatError::Invalid(
            "the last message must have role 'user'".into(),
        ));
    }
    if last.content.trim().is_empty() {
        return Err(ChatError::Invalid("message content must not be empty".into()));
    }

    let context = match scope {
        Some(owner) => retrieve_context(ctx, owner, &last.content).await?,
        None => Vec::new(),
    };

    let request = ChatRequest {
        system_prompt: ctx.config.chat.system_prompt.clone(),
        messages: assemble_messages(history, &last.content, &context),
        temperature: ctx.config.chat.temperature,
        max_tokens: ctx.config.chat.max_tokens,
    };

    tracing::debug!(
        model = ctx.chat.model_name(),
        messages = request.messages.len(),
        context_chunks = context.len(),
        "calling chat model"
    );

    let reply = ctx.chat.complete(&request).await.map_err(ChatError::Upstream)?;
    Ok(reply_or_fallback(reply))
}

async fn retrieve_context(
    ctx: &ChatContext<'_>,
    owner: &ContentOwner,
    query: &str,
) -> Result<Vec<String>, ChatError> {
    if ctx.store.get_parent(owner).await.map_err(ChatError::Store)?.is_none() {
        return Err(ChatError::ScopeNotFound(owner.clone()));
    }

    let settings = ctx
        .store
        .get_settings(owner)
        .await
        .map_err(ChatError::Store)?
        .unwrap_or_else(|| ctx.config.default_settings());

    if !settings.semantic_search || settings.context_window == 0 {
        return Ok(Vec::new());
    }

    let input = truncate_input(query, ctx.config.embedding.max_input_chars);
    let query_vec = embed_checked(ctx.embedder, &settings.embedding_model, input)
        .await
        .map_err(ChatError::Upstream)?;

    let hits = ctx
        .store
        .similarity_search(
            &query_vec,
            owner,
            ctx.config.retrieval.threshold,
            settings.context_window,
        )
        .await
        .map_err(ChatError::Store)?;

    Ok(hits.into_iter().map(|h| h.content).collect())
}
