//! Builds AI replies from a session's history.

use std::sync::Arc;

use hd_domain::chat::{Message, Sender};
use hd_domain::config::LlmConfig;
use hd_domain::error::{Error, Result};
use hd_providers::{ChatMessage, ChatRequest, LlmProvider};

pub struct Responder {
    provider: Option<Arc<dyn LlmProvider>>,
    system_prompt: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    history_limit: usize,
}

impl Responder {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, cfg: &LlmConfig) -> Self {
        Self {
            provider,
            system_prompt: cfg.system_prompt.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            history_limit: cfg.history_limit.max(1),
        }
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.provider_id())
    }

    /// Ask the provider for the next assistant turn given `history`.
    pub async fn reply(&self, history: &[Message]) -> Result<String> {
        let provider = self.provider.as_ref().ok_or_else(|| Error::Provider {
            provider: "none".into(),
            message: "no LLM provider configured".into(),
        })?;
        let resp = provider.chat(&self.request(history)).await?;
        Ok(resp.content.trim().to_owned())
    }

    fn request(&self, history: &[Message]) -> ChatRequest {
        let skip = history.len().saturating_sub(self.history_limit);
        let mut messages = Vec::with_capacity(history.len() - skip + 1);
        if !self.system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.extend(history[skip..].iter().map(|m| match m.sender {
            Sender::Customer => ChatMessage::user(m.content.clone()),
            Sender::Ai | Sender::Agent => ChatMessage::assistant(m.content.clone()),
        }));

        ChatRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: None,
        }
    }
}
