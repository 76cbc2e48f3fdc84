#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::mpsc;

use crate::domain::models::ChatError;
use crate::domain::models::Message;
use crate::domain::models::StoreChange;
use crate::domain::models::StoreUpdate;

#[derive(Default)]
struct StoreState {
    messages: Vec<Message>,
    conversation_id: Option<String>,
    subscribers: Vec<mpsc::UnboundedSender<StoreUpdate>>,
}

impl StoreState {
    fn position(&self, id: &str) -> Option<usize> {
        return self.messages.iter().position(|msg| return msg.id == id);
    }

    fn notify(&mut self, change: StoreChange) {
        if self.subscribers.is_empty() {
            return;
        }

        let update = StoreUpdate {
            change,
            messages: self.messages.clone(),
            conversation_id: self.conversation_id.clone(),
        };
        self.subscribers
            .retain(|tx| return tx.send(update.clone()).is_ok());
    }
}

/// Owns the message list and conversation id of the active conversation.
/// Clones share the same state; every mutation goes through a named
/// operation and is broadcast to subscribers once applied.
#[derive(Clone, Default)]
pub struct ConversationStore {
    state: Arc<Mutex<StoreState>>,
}

impl ConversationStore {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        return self.state.lock().unwrap_or_else(PoisonError::into_inner);
    }

    /// Receives an update after every store mutation. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreUpdate> {
        let (tx, rx) = mpsc::unbounded_channel::<StoreUpdate>();
        self.lock().subscribers.push(tx);

        return rx;
    }

    pub fn messages(&self) -> Vec<Message> {
        return self.lock().messages.clone();
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        let state = self.lock();
        return state.position(id).map(|idx| return state.messages[idx].clone());
    }

    pub fn conversation_id(&self) -> Option<String> {
        return self.lock().conversation_id.clone();
    }

    pub fn streaming_message(&self) -> Option<Message> {
        return self
            .lock()
            .messages
            .iter()
            .find(|msg| return msg.is_streaming)
            .cloned();
    }

    pub fn append_message(&self, message: Message) -> Result<(), ChatError> {
        let mut state = self.lock();
        if state.position(&message.id).is_some() {
            return Err(ChatError::DuplicateMessageId(message.id));
        }
        if message.is_streaming {
            if let Some(streaming) = state.messages.iter().find(|msg| return msg.is_streaming) {
                return Err(ChatError::AlreadyStreaming(streaming.id.to_string()));
            }
        }

        let id = message.id.to_string();
        state.messages.push(message);
        state.notify(StoreChange::Appended(id));

        return Ok(());
    }

    /// Replaces the content of a streaming message. Unknown ids are ignored,
    /// the message may have been truncated away by a regenerate. Finalized
    /// messages are left untouched so a late chunk can't rewrite a stopped
    /// response.
    pub fn update_message_content(&self, id: &str, content: &str) {
        let mut state = self.lock();
        let idx = match state.position(id) {
            Some(idx) => idx,
            None => {
                tracing::debug!(id = id, "Content update for unknown message ignored");
                return;
            }
        };

        let message = &mut state.messages[idx];
        if !message.is_streaming {
            tracing::debug!(id = id, "Content update for finalized message ignored");
            return;
        }
        if message.content == content {
            return;
        }

        message.content = content.to_string();
        state.notify(StoreChange::ContentUpdated(id.to_string()));
    }

    /// Ends streaming for a message. Only the first call for a streaming
    /// message has any effect.
    pub fn finalize_message(&self, id: &str, cut_off: bool) {
        let mut state = self.lock();
        let idx = match state.position(id) {
            Some(idx) => idx,
            None => return,
        };
        if !state.messages[idx].is_streaming {
            return;
        }

        state.messages[idx].finalize(cut_off);
        state.notify(StoreChange::Finalized(id.to_string()));
    }

    pub fn set_conversation_id(&self, id: &str) -> Result<(), ChatError> {
        if id.is_empty() {
            return Ok(());
        }

        let mut state = self.lock();
        if let Some(current) = &state.conversation_id {
            if current == id {
                return Ok(());
            }

            tracing::error!(
                current = current.as_str(),
                attempted = id,
                "Refusing to change conversation id"
            );
            return Err(ChatError::ConversationIdConflict {
                current: current.to_string(),
                attempted: id.to_string(),
            });
        }

        state.conversation_id = Some(id.to_string());
        state.notify(StoreChange::ConversationIdSet(id.to_string()));

        return Ok(());
    }

    /// Drops every message after `id`.
    pub fn truncate_after(&self, id: &str) -> Result<(), ChatError> {
        let mut state = self.lock();
        let idx = match state.position(id) {
            Some(idx) => idx,
            None => return Err(ChatError::MessageNotFound(id.to_string())),
        };
        if idx + 1 == state.messages.len() {
            return Ok(());
        }

        state.messages.truncate(idx + 1);
        state.notify(StoreChange::Truncated(id.to_string()));

        return Ok(());
    }

    /// User edit of a finished message. The content from before the first
    /// edit is kept on the message.
    pub fn edit_message(&self, id: &str, content: &str) -> Result<(), ChatError> {
        let mut state = self.lock();
        let idx = match state.position(id) {
            Some(idx) => idx,
            None => return Err(ChatError::MessageNotFound(id.to_string())),
        };
        if state.messages[idx].is_streaming {
            return Err(ChatError::AlreadyStreaming(id.to_string()));
        }
        if state.messages[idx].content == content {
            return Ok(());
        }

        state.messages[idx].edit(content);
        state.notify(StoreChange::Edited(id.to_string()));

        return Ok(());
    }

    /// Swaps in a conversation loaded from history.
    pub fn load_history(
        &self,
        conversation_id: Option<String>,
        messages: Vec<Message>,
    ) -> Result<(), ChatError> {
        let mut seen = HashSet::new();
        for message in messages.iter() {
            if !seen.insert(message.id.as_str()) {
                return Err(ChatError::DuplicateMessageId(message.id.to_string()));
            }
        }

        let mut state = self.lock();
        state.conversation_id = conversation_id;
        state.messages = messages;
        for message in state.messages.iter_mut() {
            message.is_streaming = false;
        }
        state.notify(StoreChange::HistoryLoaded);

        return Ok(());
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.messages.clear();
        state.conversation_id = None;
        state.notify(StoreChange::Reset);
    }
}
