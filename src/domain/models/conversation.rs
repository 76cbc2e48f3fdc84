use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::Message;
use super::Sender;

/// One entry of the conversation history listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub conversation_type: Option<String>,
}

/// A message as stored by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub sender: String,
    pub message: String,
    #[serde(default)]
    pub created_at: String,
}

impl MessageRecord {
    pub fn to_message(&self) -> Message {
        return Message::with_id(
            &self.id,
            Sender::parse(&self.sender),
            &self.message,
            &self.created_at,
        );
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub summary: ConversationSummary,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

impl ConversationDetail {
    pub fn to_messages(&self) -> Vec<Message> {
        return self
            .messages
            .iter()
            .map(|record| return record.to_message())
            .collect();
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRename {
    pub title: String,
}
