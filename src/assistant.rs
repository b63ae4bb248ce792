//! Optional chat assistant backed by an OpenAI-compatible completion endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AssistantError;
use crate::settings::{SettingKey, SettingsStore};

pub const OPENAI_CHAT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Upper bound on one completion call, HTTP or otherwise.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(30);

pub const SYSTEM_PROMPT: &str = "You are CyberBuddy, the assistant for CyberRakshak. Be concise, \
helpful, and reference the app's features: File, URL, Email, DNS, IP, Domain scans.";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One request/response completion call.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, AssistantError>;

    fn provider_name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
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

#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, CHAT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            temperature: 0.2,
        }
    }

    fn request_failed(&self, err: reqwest::Error) -> AssistantError {
        if err.is_timeout() {
            self.failed("timed out")
        } else {
            self.failed(err.to_string())
        }
    }

    fn failed(&self, reason: impl Into<String>) -> AssistantError {
        AssistantError::ProviderCallFailed {
            provider: self.provider_name(),
            reason: reason.into(),
        }
    }
}

impl Default for OpenAiChat {
    fn default() -> Self {
        Self::new(OPENAI_CHAT_ENDPOINT)
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, AssistantError> {
        let body = CompletionRequest {
            model,
            messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(%status, body = %text, "completion endpoint error body");
            return Err(self.failed(format!("HTTP {status}")));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| self.request_failed(e))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Running conversation with the assistant.
pub struct Assistant {
    provider: Arc<dyn ChatProvider>,
    settings: Arc<dyn SettingsStore>,
    history: Vec<ChatMessage>,
    timeout: Duration,
}

impl Assistant {
    pub fn new(provider: Arc<dyn ChatProvider>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            provider,
            settings,
            history: Vec::new(),
            timeout: CHAT_TIMEOUT,
        }
    }

    /// Give up on a provider call after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Send one user turn and return the reply.
    ///
    /// The user message stays in the history even when no key is stored or
    /// the call fails; the reply is only recorded on success.
    pub async fn ask(&mut self, text: &str) -> Result<String, AssistantError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssistantError::EmptyMessage);
        }

        let prior = self.history.len();
        self.history.push(ChatMessage::new(Role::User, text));

        let Some(api_key) = self.settings.get(SettingKey::AiApiKey) else {
            return Err(AssistantError::MissingCredential);
        };
        let model = self.settings.model();

        let mut messages = Vec::with_capacity(prior + 2);
        messages.push(ChatMessage::new(Role::System, SYSTEM_PROMPT));
        messages.extend(self.history.iter().cloned());

        let call = self.provider.complete(&api_key, &model, &messages);
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AssistantError::ProviderCallFailed {
                provider: self.provider.provider_name(),
                reason: format!("no reply within {:?}", self.timeout),
            }),
        };

        match outcome {
            Ok(reply) => {
                self.history.push(ChatMessage::new(Role::Assistant, reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                warn!(provider = self.provider.provider_name(), error = %e, "chat call failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("provider", &self.provider.provider_name())
            .field("history", &self.history.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
