//! Retrieval-augmented chat over Azure OpenAI.
//!
//! The prompt sent to the model is, in order:
//!
//! 1. the assistant system prompt,
//! 2. one system message per retrieved chunk,
//! 3. the caller's chat history (`user` / `assistant` / `system` turns),
//! 4. the question as a user message.

use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OpenAiConfig;
use crate::credential::ServiceAuth;
use crate::error::{Result, ServiceError};
use crate::http::{error_for_status, send_with_retry};
use crate::models::{ChatMessage, ChatResponse, ScoredChunk};

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to document context.

Guidelines:
- Use the provided context to answer questions accurately.
- Each context is labeled as 'Context N (from file: <file_id>, relevance: <score>)'.
- If the context doesn't contain relevant information or there are no context, say so clearly.
- Be concise but thorough in your responses.
- If asked about something not in the context, provide general knowledge but mention the limitation.

Always prioritize accuracy over completeness.";

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a conversation, returning the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> AnyResult<String>;
}

/// `POST {endpoint}/openai/deployments/{deployment}/chat/completions`
pub struct AzureOpenAiChat {
    client: reqwest::Client,
    url: String,
    max_completion_tokens: u32,
    max_retries: u32,
    auth: ServiceAuth,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl AzureOpenAiChat {
    pub fn new(config: &OpenAiConfig, auth: ServiceAuth) -> AnyResult<Self> {
        if config.endpoint.is_empty() || config.chat_deployment.is_empty() {
            bail!("openai.endpoint and openai.chat_deployment are required for chat");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.chat_deployment,
            config.chat_api_version
        );
        Ok(Self {
            client,
            url,
            max_completion_tokens: config.max_completion_tokens,
            max_retries: config.max_retries,
            auth,
        })
    }
}

#[async_trait]
impl ChatModel for AzureOpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> AnyResult<String> {
        let body = serde_json::json!({
            "messages": messages,
            "max_completion_tokens": self.max_completion_tokens,
            "stream": false,
        });

        let client = &self.client;
        let url = self.url.as_str();
        let auth = &self.auth;
        let body = &body;
        let response = send_with_retry("Azure OpenAI chat", self.max_retries, move || {
            let request = client.post(url).json(body);
            async move { auth.apply(request).await }
        })
        .await?;

        if !response.status().is_success() {
            return Err(error_for_status("Azure OpenAI chat", response).await);
        }

        let parsed: CompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("Azure OpenAI chat returned no content"))
    }
}

#[derive(Clone)]
pub struct ChatService {
    model: Arc<dyn ChatModel>,
}

impl ChatService {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Answer `question` using retrieved `context` and prior turns.
    pub async fn chat_with_context(
        &self,
        question: &str,
        history: Option<&[ChatMessage]>,
        context: &[ScoredChunk],
    ) -> Result<ChatResponse> {
        if question.trim().is_empty() {
            return Err(ServiceError::Validation("Question cannot be empty".to_string()));
        }

        let messages = build_messages(question, history.unwrap_or_default(), context);
        let response = self
            .model
            .complete(&messages)
            .await
            .map_err(|e| ServiceError::ChatCompletion(format!("Chat completion failed: {}", e)))?;

        tracing::info!(context_chunks = context.len(), "chat completion succeeded");
        Ok(ChatResponse {
            response,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        })
    }
}

fn build_messages(
    question: &str,
    history: &[ChatMessage],
    context: &[ScoredChunk],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(context.len() + history.len() + 2);
    messages.push(ChatMessage::new("system", SYSTEM_PROMPT));

    for (i, scored) in context.iter().enumerate() {
        messages.push(ChatMessage::new(
            "system",
            format!(
                "Context {} (from file: {}, relevance: {:.2}):\n{}",
                i + 1,
                scored.chunk.file_id,
                scored.score,
                scored.chunk.content
            ),
        ));
    }

    // unknown roles are dropped
    messages.extend(
        history
            .iter()
            .filter(|m| matches!(m.role.as_str(), "user" | "assistant" | "system"))
            .cloned(),
    );

    messages.push(ChatMessage::new("user", question));
    messages
}
