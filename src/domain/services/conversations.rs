#[cfg(test)]
#[path = "conversations_test.rs"]
mod tests;

use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use reqwest::Method;
use reqwest::StatusCode;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ConversationDetail;
use crate::domain::models::ConversationRename;
use crate::domain::models::ConversationSummary;
use crate::domain::models::DEFAULT_BUFFERED_TIMEOUT;

/// Client for the conversation history resource on the backend.
pub struct Conversations {
    url: String,
    token: String,
    user_id: String,
    timeout: Duration,
}

impl Default for Conversations {
    fn default() -> Conversations {
        return Conversations::new(
            &Config::get(ConfigKey::ApiURL),
            &Config::get(ConfigKey::ApiToken),
            &Config::get(ConfigKey::UserID),
        );
    }
}

impl Conversations {
    pub fn new(url: &str, token: &str, user_id: &str) -> Conversations {
        return Conversations {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            user_id: user_id.to_string(),
            timeout: DEFAULT_BUFFERED_TIMEOUT,
        };
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = reqwest::Client::new()
            .request(method, format!("{url}{path}", url = self.url))
            .timeout(self.timeout);
        if !self.token.is_empty() {
            builder = builder.bearer_auth(&self.token);
        }

        return builder;
    }

    async fn check(res: reqwest::Response, action: &str, id: &str) -> Result<reqwest::Response> {
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            bail!(format!("No conversation found for id {id}"));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, action = action, "Conversation request failed");
            bail!(format!("Failed to {action}: backend responded with {status}"));
        }

        return Ok(res);
    }

    /// Most recently updated conversations first, at most `limit` of them.
    pub async fn list(&self, limit: usize, conversation_type: &str) -> Result<Vec<ConversationSummary>> {
        if self.user_id.is_empty() {
            bail!("A user id is required to list conversations");
        }

        let mut query = vec![
            ("skip".to_string(), "0".to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if !conversation_type.is_empty() {
            query.push(("conversation_type".to_string(), conversation_type.to_string()));
        }

        let path = format!("/api/v1/users/{}/conversations", self.user_id);
        let res = self.request(Method::GET, &path).query(&query).send().await?;
        let mut conversations = Conversations::check(res, "list conversations", &self.user_id)
            .await?
            .json::<Vec<ConversationSummary>>()
            .await?;

        conversations.sort_by_cached_key(|conversation| {
            return conversation
                .updated_at
                .clone()
                .unwrap_or_else(|| return conversation.created_at.to_string());
        });
        conversations.reverse();
        conversations.truncate(limit);

        return Ok(conversations);
    }

    pub async fn load(&self, id: &str) -> Result<ConversationDetail> {
        let path = format!("/api/v1/conversations/{id}/with-messages");
        let res = self.request(Method::GET, &path).send().await?;
        let detail = Conversations::check(res, "load conversation", id)
            .await?
            .json::<ConversationDetail>()
            .await?;

        return Ok(detail);
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<ConversationSummary> {
        if title.trim().is_empty() {
            bail!("Conversation title can't be empty");
        }

        let path = format!("/api/v1/conversations/{id}");
        let res = self
            .request(Method::PUT, &path)
            .json(&ConversationRename {
                title: title.trim().to_string(),
            })
            .send()
            .await?;
        let summary = Conversations::check(res, "rename conversation", id)
            .await?
            .json::<ConversationSummary>()
            .await?;

        return Ok(summary);
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = format!("/api/v1/conversations/{id}");
        let res = self.request(Method::DELETE, &path).send().await?;
        Conversations::check(res, "delete conversation", id).await?;

        return Ok(());
    }
}
