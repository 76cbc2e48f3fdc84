use super::Message;

/// The named store operation that produced an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreChange {
    Appended(String),
    ContentUpdated(String),
    Finalized(String),
    Edited(String),
    Truncated(String),
    ConversationIdSet(String),
    HistoryLoaded,
    Reset,
}

/// Sent to every subscriber after each effective store mutation.
#[derive(Clone, Debug)]
pub struct StoreUpdate {
    pub change: StoreChange,
    pub messages: Vec<Message>,
    pub conversation_id: Option<String>,
}
