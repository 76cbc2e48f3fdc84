#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use chrono::SecondsFormat;
use chrono::Utc;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use uuid::Uuid;

use super::Sender;

pub fn now_timestamp() -> String {
    return Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: String,
    pub is_streaming: bool,
    pub is_cut_off: bool,
    pub can_regenerate: bool,
    pub can_continue: bool,
    pub is_edited: bool,
    pub original_content: Option<String>,
}

impl Message {
    pub fn new(sender: Sender, content: &str) -> Message {
        return Message::with_id(&Uuid::new_v4().to_string(), sender, content, &now_timestamp());
    }

    /// Rebuilds a message loaded from history, keeping the server's id and
    /// timestamp verbatim.
    pub fn with_id(id: &str, sender: Sender, content: &str, timestamp: &str) -> Message {
        return Message {
            id: id.to_string(),
            sender,
            content: content.to_string(),
            timestamp: timestamp.to_string(),
            is_streaming: false,
            is_cut_off: false,
            can_regenerate: sender == Sender::Assistant,
            can_continue: false,
            is_edited: false,
            original_content: None,
        };
    }

    /// The empty assistant message that fragments are written into while a
    /// response streams.
    pub fn placeholder() -> Message {
        let mut msg = Message::new(Sender::Assistant, "");
        msg.is_streaming = true;
        msg.can_regenerate = false;

        return msg;
    }

    pub fn finalize(&mut self, cut_off: bool) {
        self.is_streaming = false;
        self.is_cut_off = cut_off;
        self.can_continue = cut_off;
        self.can_regenerate = true;
    }

    pub fn edit(&mut self, content: &str) {
        if self.content == content {
            return;
        }

        if self.original_content.is_none() {
            self.original_content = Some(self.content.to_string());
        }
        self.content = content.to_string();
        self.is_edited = true;
    }
}
