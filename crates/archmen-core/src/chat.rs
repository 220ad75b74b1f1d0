//! Chat message types, the [`ChatProvider`] trait, and prompt assembly.
//!
//! Prompt assembly is pure: the caller retrieves context chunks (if any)
//! and hands them to [`assemble_messages`] together with the conversation.
//! The provider receives the fixed system prompt separately in
//! [`ChatRequest`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reply used when the model returns no content.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I wasn't able to generate a response just now. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
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

/// Everything a chat-completion call needs.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for chat-completion backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run one completion. `Ok(None)` means the model produced no content.
    async fn complete(&self, request: &ChatRequest) -> Result<Option<String>>;
}

/// Format retrieved chunks as a single system message.
pub fn context_message(context: &[String]) -> Option<ChatMessage> {
    if context.is_empty() {
        return None;
    }
    let mut body = String::from("Relevant knowledge base excerpts:\n");
    for (i, chunk) in context.iter().enumerate() {
        body.push_str(&format!("\n[{}] {}\n", i + 1, chunk.trim()));
    }
    Some(ChatMessage::system(body))
}

/// Build the message list sent to the model: retrieved context first, then
/// the history, then the new user message.
pub fn assemble_messages(
    history: &[ChatMessage],
    user_message: &str,
    context: &[String],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(ctx) = context_message(context) {
        messages.push(ctx);
    }
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(user_message));
    messages
}

/// Use the model's reply verbatim, or [`FALLBACK_REPLY`] when it is empty.
pub fn reply_or_fallback(reply: Option<String>) -> String {
    match reply {
        Some(text) if !text.trim().is_empty() => text,
        _ => FALLBACK_REPLY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_without_context() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let msgs = assemble_messages(&history, "who am I?", &[]);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2], ChatMessage::user("who am I?"));
    }

    #[test]
    fn test_assemble_prepends_context() {
        let ctx = vec!["The Sage values wisdom.".to_string()];
        let msgs = assemble_messages(&[ChatMessage::user("hi")], "tell me", &ctx);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("[1] The Sage values wisdom."));
        assert_eq!(msgs.last().unwrap().content, "tell me");
    }

    #[test]
    fn test_fallback() {
        assert_eq!(reply_or_fallback(None), FALLBACK_REPLY);
        assert_eq!(reply_or_fallback(Some("  ".into())), FALLBACK_REPLY);
        assert_eq!(reply_or_fallback(Some("ok".into())), "ok");
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&ChatMessage::assistant("x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
