#[cfg(test)]
#[path = "submission_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Message;
use super::TransportError;

pub const DEFAULT_BUFFERED_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STREAMING_TIMEOUT: Duration = Duration::from_secs(120);

/// The model a prompt is sent to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub name: String,
    pub server_id: String,
    pub settings_id: String,
}

impl ModelRef {
    pub fn new(provider: &str, name: &str) -> ModelRef {
        return ModelRef {
            provider: provider.to_string(),
            name: name.to_string(),
            server_id: "".to_string(),
            settings_id: "".to_string(),
        };
    }

    pub fn is_selected(&self) -> bool {
        return !self.name.trim().is_empty();
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

impl HistoryMessage {
    pub fn from_messages(messages: &[Message]) -> Vec<HistoryMessage> {
        return messages
            .iter()
            .filter(|msg| return !msg.is_streaming && !msg.content.is_empty())
            .map(|msg| {
                return HistoryMessage {
                    role: msg.sender.role().to_string(),
                    content: msg.content.to_string(),
                };
            })
            .collect();
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionParams {
    fn default() -> CompletionParams {
        return CompletionParams {
            temperature: 0.7,
            max_tokens: 2048,
        };
    }
}

/// Body posted to the chat completion endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub provider: String,
    pub settings_id: String,
    pub server_id: String,
    pub model: String,
    pub messages: Vec<HistoryMessage>,
    pub params: CompletionParams,
    pub stream: bool,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub conversation_type: String,
}

/// One prompt on its way to the backend. Lives for a single submission.
#[derive(Clone, Debug)]
pub struct SubmissionRequest {
    pub prompt: String,
    pub model: ModelRef,
    pub stream: bool,
    pub conversation_id: Option<String>,
    pub conversation_type: String,
    pub history: Vec<HistoryMessage>,
    pub user_id: String,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl SubmissionRequest {
    pub fn new(prompt: &str, model: ModelRef) -> SubmissionRequest {
        return SubmissionRequest {
            prompt: prompt.to_string(),
            model,
            stream: true,
            conversation_id: None,
            conversation_type: "chat".to_string(),
            history: vec![],
            user_id: "".to_string(),
            timeout: DEFAULT_STREAMING_TIMEOUT,
            cancel: CancellationToken::new(),
        };
    }

    pub fn payload(&self) -> CompletionRequest {
        let mut messages = self.history.clone();
        messages.push(HistoryMessage {
            role: "user".to_string(),
            content: self.prompt.to_string(),
        });

        return CompletionRequest {
            provider: self.model.provider.to_string(),
            settings_id: self.model.settings_id.to_string(),
            server_id: self.model.server_id.to_string(),
            model: self.model.name.to_string(),
            messages,
            params: CompletionParams::default(),
            stream: self.stream,
            user_id: self.user_id.to_string(),
            conversation_id: self.conversation_id.clone(),
            conversation_type: self.conversation_type.to_string(),
        };
    }
}

pub type TransportBox = Arc<dyn Transport + Send + Sync>;

#[async_trait]
pub trait Transport {
    /// Used at startup to check the backend can be reached before the first
    /// prompt is sent.
    async fn health_check(&self) -> Result<()>;

    /// Posts the request and forwards every raw line of the response body
    /// through `tx`, in order, framing included. Resolves once the body
    /// ends. Fires `TransportError::Cancelled` as soon as the request's
    /// cancellation token is triggered.
    async fn send_streaming<'a>(
        &self,
        request: &SubmissionRequest,
        tx: &'a mpsc::UnboundedSender<String>,
    ) -> Result<(), TransportError>;

    /// Non streaming fallback returning the parsed response body.
    async fn send_buffered(
        &self,
        request: &SubmissionRequest,
    ) -> Result<serde_json::Value, TransportError>;
}
