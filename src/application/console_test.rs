use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use test_utils::delta_fragment;
use test_utils::done_fragment;
use tokio::sync::mpsc;

use super::help_text;
use super::Console;
use super::Input;
use super::Renderer;
use crate::domain::models::Message;
use crate::domain::models::ModelRef;
use crate::domain::models::Sender;
use crate::domain::models::SubmissionRequest;
use crate::domain::models::Transport;
use crate::domain::models::TransportError;
use crate::domain::services::ControllerOptions;
use crate::domain::services::ConversationStore;
use crate::domain::services::SubmissionController;
use crate::domain::services::SubmissionOutcome;

struct EchoTransport {}

#[async_trait]
impl Transport for EchoTransport {
    async fn health_check(&self) -> Result<()> {
        return Ok(());
    }

    async fn send_streaming<'a>(
        &self,
        _request: &SubmissionRequest,
        tx: &'a mpsc::UnboundedSender<String>,
    ) -> Result<(), TransportError> {
        for fragment in [delta_fragment("Hi"), delta_fragment(" there!"), done_fragment()] {
            tx.send(fragment)
                .map_err(|_| return TransportError::Cancelled)?;
        }

        return Ok(());
    }

    async fn send_buffered(
        &self,
        _request: &SubmissionRequest,
    ) -> Result<serde_json::Value, TransportError> {
        return Ok(serde_json::json!({}));
    }
}

fn console(model: ModelRef) -> Console<Vec<u8>> {
    let controller = SubmissionController::new(
        Arc::new(EchoTransport {}),
        ConversationStore::default(),
        ControllerOptions::default(),
    );

    return Console::new(controller, model, "chat", "How can I help?", Vec::new());
}

fn output(console: &Console<Vec<u8>>) -> String {
    return String::from_utf8_lossy(&console.renderer.out).to_string();
}

#[test]
fn it_lists_commands_in_help() {
    let text = help_text();
    assert!(text.starts_with("COMMANDS:"));
    assert!(text.contains("/regenerate"));
    assert!(text.contains("/edit"));
    assert!(text.contains("CTRL+C"));
}

#[test]
fn it_renders_streamed_text_once() -> Result<()> {
    let store = ConversationStore::default();
    let mut rx = store.subscribe();
    let mut renderer = Renderer::new(Vec::new());

    let placeholder = Message::placeholder();
    let id = placeholder.id.to_string();
    store.append_message(placeholder)?;
    store.update_message_content(&id, "Hi");
    store.update_message_content(&id, "Hi there!");
    store.finalize_message(&id, false);

    while let Ok(update) = rx.try_recv() {
        renderer.render(&update)?;
    }

    let out = String::from_utf8_lossy(&renderer.out).to_string();
    assert!(out.ends_with("Hi there!\n"));
    assert_eq!(out.matches("Hi").count(), 1);
    assert!(renderer.printed.is_empty());

    return Ok(());
}

#[test]
fn it_renders_loaded_history() -> Result<()> {
    let store = ConversationStore::default();
    let mut rx = store.subscribe();
    let mut renderer = Renderer::new(Vec::new());

    store.load_history(
        Some("conv_1".to_string()),
        vec![
            Message::new(Sender::User, "Hello"),
            Message::new(Sender::Assistant, "Hi there!"),
        ],
    )?;
    while let Ok(update) = rx.try_recv() {
        renderer.render(&update)?;
    }

    let out = String::from_utf8_lossy(&renderer.out).to_string();
    let hello = out.find("Hello").unwrap();
    let answer = out.find("Hi there!").unwrap();
    assert!(hello < answer);
    assert!(out.contains("You"));

    return Ok(());
}

#[test]
fn it_greets_and_quits() -> Result<()> {
    let mut console = console(ModelRef::new("ollama", "llama3"));
    console.greet()?;

    let messages = console.store().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, Sender::Assistant);
    assert!(!messages[0].can_regenerate);
    assert!(output(&console).contains("How can I help?"));

    assert!(matches!(console.handle_line("/quit")?, Input::Quit));

    return Ok(());
}

#[test]
fn it_refuses_to_regenerate_the_greeting() -> Result<()> {
    let mut console = console(ModelRef::new("ollama", "llama3"));
    console.greet()?;

    assert!(matches!(console.handle_line("/regenerate")?, Input::Handled));
    assert!(output(&console).contains("There is no response to regenerate."));

    return Ok(());
}

#[test]
fn it_reports_missing_model() -> Result<()> {
    let mut console = console(ModelRef::default());

    assert!(matches!(console.handle_line("Hello")?, Input::Handled));
    assert!(output(&console).contains("No model selected"));
    assert!(console.store().messages().is_empty());

    return Ok(());
}

#[test]
fn it_prints_unsaved_conversation_id() -> Result<()> {
    let mut console = console(ModelRef::new("ollama", "llama3"));

    assert!(matches!(console.handle_line("/id")?, Input::Handled));
    assert!(output(&console).contains("This conversation hasn't been saved yet."));

    console.store().set_conversation_id("conv_9")?;
    console.handle_line("/id")?;
    assert!(output(&console).contains("conv_9"));

    return Ok(());
}

#[test]
fn it_starts_new_conversations() -> Result<()> {
    let mut console = console(ModelRef::new("ollama", "llama3"));
    console.store().set_conversation_id("conv_1")?;
    console
        .store()
        .append_message(Message::new(Sender::User, "Hello"))?;

    assert!(matches!(console.handle_line("/new")?, Input::Handled));

    let messages = console.store().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "How can I help?");
    assert_eq!(console.store().conversation_id(), None);
    assert!(output(&console).contains("Started a new conversation."));

    return Ok(());
}

#[tokio::test]
async fn it_follows_a_response_to_completion() -> Result<()> {
    let mut console = console(ModelRef::new("ollama", "llama3"));

    let submission = match console.handle_line("Hello")? {
        Input::Submitted(submission) => submission,
        _ => panic!("expected a submission"),
    };
    let outcome = console.follow(submission).await?;

    assert_eq!(outcome, SubmissionOutcome::Finalized);
    let messages = console.store().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Hi there!");
    assert!(output(&console).ends_with("Hi there!\n"));

    return Ok(());
}

#[tokio::test]
async fn it_offers_regenerate_after_a_stopped_response() -> Result<()> {
    let mut console = console(ModelRef::new("ollama", "llama3"));

    let submission = match console.handle_line("Hello")? {
        Input::Submitted(submission) => submission,
        _ => panic!("expected a submission"),
    };
    submission.cancel();
    let outcome = console.follow(submission).await?;

    assert_eq!(outcome, SubmissionOutcome::Aborted);
    let messages = console.store().messages();
    assert!(messages[1].is_cut_off);
    assert!(messages[1].can_continue);
    assert!(output(&console).contains("Response stopped. Use /regenerate to ask again."));

    return Ok(());
}
