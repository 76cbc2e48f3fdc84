use anyhow::Result;

use super::ConversationStore;
use crate::domain::models::ChatError;
use crate::domain::models::Message;
use crate::domain::models::Sender;
use crate::domain::models::StoreChange;

fn streaming_count(store: &ConversationStore) -> usize {
    return store
        .messages()
        .iter()
        .filter(|msg| return msg.is_streaming)
        .count();
}

#[test]
fn it_appends_in_order() -> Result<()> {
    let store = ConversationStore::default();
    let first = Message::new(Sender::User, "one");
    let second = Message::new(Sender::Assistant, "two");
    store.append_message(first.clone())?;
    store.append_message(second.clone())?;

    let ids = store
        .messages()
        .iter()
        .map(|msg| return msg.id.to_string())
        .collect::<Vec<String>>();
    assert_eq!(ids, vec![first.id, second.id]);

    return Ok(());
}

#[test]
fn it_rejects_duplicate_ids() -> Result<()> {
    let store = ConversationStore::default();
    let msg = Message::new(Sender::User, "one");
    store.append_message(msg.clone())?;

    let res = store.append_message(msg.clone());
    assert_eq!(res, Err(ChatError::DuplicateMessageId(msg.id)));
    assert_eq!(store.messages().len(), 1);

    return Ok(());
}

#[test]
fn it_rejects_second_streaming_message() -> Result<()> {
    let store = ConversationStore::default();
    let first = Message::placeholder();
    store.append_message(first.clone())?;

    let res = store.append_message(Message::placeholder());
    assert_eq!(res, Err(ChatError::AlreadyStreaming(first.id.to_string())));

    store.finalize_message(&first.id, false);
    store.append_message(Message::placeholder())?;
    assert_eq!(streaming_count(&store), 1);

    return Ok(());
}

#[test]
fn it_updates_content() -> Result<()> {
    let store = ConversationStore::default();
    let placeholder = Message::placeholder();
    store.append_message(placeholder.clone())?;

    store.update_message_content(&placeholder.id, "Hi");
    store.update_message_content(&placeholder.id, "Hi there");

    assert_eq!(store.message(&placeholder.id).unwrap().content, "Hi there");

    return Ok(());
}

#[test]
fn it_ignores_updates_for_unknown_ids() -> Result<()> {
    let store = ConversationStore::default();
    store.append_message(Message::placeholder())?;
    let before = store.messages();

    store.update_message_content("missing", "text");

    assert_eq!(store.messages(), before);

    return Ok(());
}

#[test]
fn it_ignores_updates_after_finalize() -> Result<()> {
    let store = ConversationStore::default();
    let placeholder = Message::placeholder();
    store.append_message(placeholder.clone())?;
    store.update_message_content(&placeholder.id, "Par");
    store.finalize_message(&placeholder.id, true);

    store.update_message_content(&placeholder.id, "Partial and late");

    assert_eq!(store.message(&placeholder.id).unwrap().content, "Par");

    return Ok(());
}

#[test]
fn it_finalizes_idempotently() -> Result<()> {
    let once = ConversationStore::default();
    let twice = ConversationStore::default();
    let placeholder = Message::placeholder();
    once.append_message(placeholder.clone())?;
    twice.append_message(placeholder.clone())?;

    once.finalize_message(&placeholder.id, false);
    twice.finalize_message(&placeholder.id, false);
    twice.finalize_message(&placeholder.id, false);

    assert_eq!(once.messages(), twice.messages());
    let msg = twice.message(&placeholder.id).unwrap();
    assert!(!msg.is_streaming);
    assert!(msg.can_regenerate);
    assert!(!msg.is_cut_off);
    assert!(!msg.can_continue);

    return Ok(());
}

#[test]
fn it_keeps_first_finalize() -> Result<()> {
    let store = ConversationStore::default();
    let placeholder = Message::placeholder();
    store.append_message(placeholder.clone())?;

    store.finalize_message(&placeholder.id, true);
    store.finalize_message(&placeholder.id, false);

    let msg = store.message(&placeholder.id).unwrap();
    assert!(msg.is_cut_off);
    assert!(msg.can_continue);

    return Ok(());
}

#[test]
fn it_sets_conversation_id_once() -> Result<()> {
    let store = ConversationStore::default();
    store.set_conversation_id("conv_1")?;
    store.set_conversation_id("conv_1")?;

    let res = store.set_conversation_id("conv_2");
    assert_eq!(
        res,
        Err(ChatError::ConversationIdConflict {
            current: "conv_1".to_string(),
            attempted: "conv_2".to_string(),
        })
    );
    assert_eq!(store.conversation_id(), Some("conv_1".to_string()));

    return Ok(());
}

#[test]
fn it_leaves_message_ids_alone_when_conversation_id_arrives() -> Result<()> {
    let store = ConversationStore::default();
    let msg = Message::new(Sender::User, "Hello");
    store.append_message(msg.clone())?;
    store.set_conversation_id("conv_1")?;

    assert_eq!(store.messages()[0].id, msg.id);

    return Ok(());
}

#[test]
fn it_truncates_suffix() -> Result<()> {
    let store = ConversationStore::default();
    let messages = vec![
        Message::new(Sender::User, "one"),
        Message::new(Sender::Assistant, "two"),
        Message::new(Sender::User, "three"),
        Message::new(Sender::Assistant, "four"),
    ];
    for msg in messages.iter() {
        store.append_message(msg.clone())?;
    }

    store.truncate_after(&messages[1].id)?;

    assert_eq!(store.messages(), messages[..2].to_vec());
    assert_eq!(
        store.truncate_after("missing"),
        Err(ChatError::MessageNotFound("missing".to_string()))
    );

    return Ok(());
}

#[test]
fn it_edits_and_keeps_original() -> Result<()> {
    let store = ConversationStore::default();
    let msg = Message::new(Sender::User, "Helo");
    store.append_message(msg.clone())?;

    store.edit_message(&msg.id, "Hello")?;

    let edited = store.message(&msg.id).unwrap();
    assert_eq!(edited.content, "Hello");
    assert!(edited.is_edited);
    assert_eq!(edited.original_content, Some("Helo".to_string()));

    return Ok(());
}

#[test]
fn it_refuses_to_edit_streaming_message() -> Result<()> {
    let store = ConversationStore::default();
    let placeholder = Message::placeholder();
    store.append_message(placeholder.clone())?;

    let res = store.edit_message(&placeholder.id, "nope");
    assert_eq!(res, Err(ChatError::AlreadyStreaming(placeholder.id)));

    return Ok(());
}

#[test]
fn it_loads_history() -> Result<()> {
    let store = ConversationStore::default();
    store.append_message(Message::new(Sender::User, "old"))?;
    store.set_conversation_id("old_conv")?;

    let loaded = vec![
        Message::with_id("m1", Sender::User, "Hi", "2024-01-01T00:00:00Z"),
        Message::with_id("m2", Sender::Assistant, "Hello", "2024-01-01T00:00:01Z"),
    ];
    store.load_history(Some("conv_9".to_string()), loaded.clone())?;

    assert_eq!(store.messages(), loaded);
    assert_eq!(store.conversation_id(), Some("conv_9".to_string()));

    let res = store.load_history(None, vec![loaded[0].clone(), loaded[0].clone()]);
    assert_eq!(res, Err(ChatError::DuplicateMessageId("m1".to_string())));
    assert_eq!(store.messages(), loaded);

    return Ok(());
}

#[test]
fn it_resets() -> Result<()> {
    let store = ConversationStore::default();
    store.append_message(Message::new(Sender::User, "Hi"))?;
    store.set_conversation_id("conv_1")?;

    store.reset();

    assert!(store.messages().is_empty());
    assert_eq!(store.conversation_id(), None);
    store.set_conversation_id("conv_2")?;

    return Ok(());
}

#[test]
fn it_notifies_subscribers_after_each_mutation() -> Result<()> {
    let store = ConversationStore::default();
    let mut rx = store.subscribe();
    let placeholder = Message::placeholder();

    store.append_message(placeholder.clone())?;
    store.update_message_content(&placeholder.id, "Hi");
    store.update_message_content("missing", "ignored");
    store.set_conversation_id("conv_1")?;
    store.finalize_message(&placeholder.id, false);
    store.finalize_message(&placeholder.id, false);

    let mut changes = vec![];
    while let Ok(update) = rx.try_recv() {
        changes.push(update.change);
    }
    assert_eq!(
        changes,
        vec![
            StoreChange::Appended(placeholder.id.to_string()),
            StoreChange::ContentUpdated(placeholder.id.to_string()),
            StoreChange::ConversationIdSet("conv_1".to_string()),
            StoreChange::Finalized(placeholder.id.to_string()),
        ]
    );

    return Ok(());
}

#[test]
fn it_sends_the_updated_list() -> Result<()> {
    let store = ConversationStore::default();
    let mut rx = store.subscribe();
    let msg = Message::new(Sender::User, "Hi");
    store.append_message(msg.clone())?;

    let update = rx.try_recv()?;
    assert_eq!(update.messages, vec![msg]);
    assert_eq!(update.conversation_id, None);

    return Ok(());
}

#[test]
fn it_drops_closed_subscribers() -> Result<()> {
    let store = ConversationStore::default();
    let rx = store.subscribe();
    drop(rx);

    store.append_message(Message::new(Sender::User, "Hi"))?;
    assert!(store.state.lock().unwrap().subscribers.is_empty());

    return Ok(());
}

#[test]
fn it_never_has_two_streaming_messages() {
    let store = ConversationStore::default();
    let mut ids: Vec<String> = vec![];

    // Small LCG so the sequence is deterministic.
    let mut seed: u64 = 7;
    for _ in 0..500 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let roll = (seed >> 33) % 3;

        if roll == 0 || ids.is_empty() {
            let msg = Message::placeholder();
            if store.append_message(msg.clone()).is_ok() {
                ids.push(msg.id);
            }
        } else if roll == 1 {
            let msg = Message::new(Sender::User, "hi");
            ids.push(msg.id.to_string());
            assert!(store.append_message(msg).is_ok());
        } else {
            let idx = (seed >> 40) as usize % ids.len();
            store.finalize_message(&ids[idx], (seed & 1) == 1);
        }

        assert!(streaming_count(&store) <= 1);
    }
}
