#[cfg(test)]
#[path = "console_test.rs"]
mod tests;

use std::collections::HashMap;
use std::io;
use std::io::Write;

use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::mpsc;
use yansi::Paint;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ChatError;
use crate::domain::models::Message;
use crate::domain::models::ModelRef;
use crate::domain::models::Sender;
use crate::domain::models::SlashCommand;
use crate::domain::models::StoreChange;
use crate::domain::models::StoreUpdate;
use crate::domain::models::TransportBox;
use crate::domain::services::ControllerOptions;
use crate::domain::services::ConversationStore;
use crate::domain::services::Conversations;
use crate::domain::services::KeyPaths;
use crate::domain::services::Submission;
use crate::domain::services::SubmissionController;
use crate::domain::services::SubmissionOutcome;

pub fn help_text() -> String {
    let text = r#"
COMMANDS:
- /regenerate (/r) - Throw away the last response and ask again.
- /edit (/e) [TEXT] - Replace your last prompt with TEXT and resubmit it.
- /new (/n) - Start a new conversation.
- /id - Print the ID of the current conversation.
- /quit /exit (/q) - Exit BrainDrive Chat.
- /help (/h) - Provides this help menu.

HOTKEYS:
- CTRL+C - Stop the response if one is in progress, otherwise exit.
        "#;

    return text.trim().to_string();
}

/// Writes store updates to a terminal as they happen. Streamed responses are
/// printed incrementally, so only the newly arrived text is written.
pub struct Renderer<W: Write> {
    out: W,
    printed: HashMap<String, usize>,
    conversation_id: Option<String>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Renderer<W> {
        return Renderer {
            out,
            printed: HashMap::new(),
            conversation_id: None,
        };
    }

    pub fn render(&mut self, update: &StoreUpdate) -> Result<()> {
        self.conversation_id = update.conversation_id.clone();

        match &update.change {
            StoreChange::Appended(id) => {
                if let Some(message) = find_message(&update.messages, id) {
                    if message.sender == Sender::Assistant {
                        write!(self.out, "\n{}: ", Paint::cyan(message.sender).bold())?;
                        self.printed.insert(id.to_string(), 0);
                        self.write_delta(message)?;
                        if !message.is_streaming {
                            self.end_message(message)?;
                        }
                    }
                }
            }
            StoreChange::ContentUpdated(id) => {
                if let Some(message) = find_message(&update.messages, id) {
                    self.write_delta(message)?;
                }
            }
            StoreChange::Finalized(id) => {
                if let Some(message) = find_message(&update.messages, id) {
                    self.write_delta(message)?;
                    self.end_message(message)?;
                }
            }
            StoreChange::Truncated(_) | StoreChange::HistoryLoaded => {
                self.printed.clear();
                for message in update.messages.iter() {
                    self.print_message(message)?;
                }
            }
            StoreChange::Reset => {
                self.printed.clear();
                writeln!(self.out, "\n{}", Paint::new("Started a new conversation.").dimmed())?;
            }
            StoreChange::ConversationIdSet(id) => {
                tracing::debug!(conversation_id = %id, "Conversation started");
            }
            StoreChange::Edited(_) => {}
        }

        self.out.flush()?;
        return Ok(());
    }

    fn print_message(&mut self, message: &Message) -> Result<()> {
        if message.is_streaming {
            return Ok(());
        }

        let label = if message.sender == Sender::User {
            Paint::green(message.sender).bold()
        } else {
            Paint::cyan(message.sender).bold()
        };
        writeln!(self.out, "\n{label}: {}", message.content)?;

        return Ok(());
    }

    fn write_delta(&mut self, message: &Message) -> Result<()> {
        let printed = self.printed.entry(message.id.to_string()).or_insert(0);
        if let Some(delta) = message.content.get(*printed..) {
            write!(self.out, "{delta}")?;
            *printed = message.content.len();
        }

        return Ok(());
    }

    fn end_message(&mut self, message: &Message) -> Result<()> {
        self.printed.remove(&message.id);
        writeln!(self.out)?;

        return Ok(());
    }
}

fn find_message<'a>(messages: &'a [Message], id: &str) -> Option<&'a Message> {
    return messages.iter().find(|message| return message.id == id);
}

fn last_message_from(messages: &[Message], sender: Sender) -> Option<&Message> {
    return messages
        .iter()
        .rev()
        .find(|message| return message.sender == sender && !message.is_streaming);
}

fn options_from_config() -> ControllerOptions {
    return ControllerOptions {
        user_id: Config::get(ConfigKey::UserID),
        stream: Config::get_bool(ConfigKey::Streaming),
        buffered_timeout: Config::get_duration(ConfigKey::BufferedTimeout),
        streaming_timeout: Config::get_duration(ConfigKey::StreamingTimeout),
        max_history: Config::get_usize(ConfigKey::MaxConversationHistory),
        key_paths: KeyPaths::default(),
    };
}

fn model_from_config() -> ModelRef {
    let mut model = ModelRef::new(
        &Config::get(ConfigKey::Provider),
        &Config::get(ConfigKey::Model),
    );
    model.server_id = Config::get(ConfigKey::ServerID);
    model.settings_id = Config::get(ConfigKey::SettingsID);

    return model;
}

enum Input {
    Quit,
    Handled,
    Submitted(Submission),
}

pub struct Console<W: Write> {
    controller: SubmissionController,
    model: ModelRef,
    conversation_type: String,
    greeting: String,
    renderer: Renderer<W>,
    updates: mpsc::UnboundedReceiver<StoreUpdate>,
}

impl<W: Write> Console<W> {
    pub fn new(
        controller: SubmissionController,
        model: ModelRef,
        conversation_type: &str,
        greeting: &str,
        out: W,
    ) -> Console<W> {
        let updates = controller.store().subscribe();

        return Console {
            controller,
            model,
            conversation_type: conversation_type.to_string(),
            greeting: greeting.to_string(),
            renderer: Renderer::new(out),
            updates,
        };
    }

    fn store(&self) -> &ConversationStore {
        return self.controller.store();
    }

    fn drain(&mut self) -> Result<()> {
        while let Ok(update) = self.updates.try_recv() {
            self.renderer.render(&update)?;
        }

        return Ok(());
    }

    fn greet(&mut self) -> Result<()> {
        if !self.greeting.trim().is_empty() {
            let mut greeting = Message::new(Sender::Assistant, &self.greeting);
            greeting.can_regenerate = false;
            self.store().append_message(greeting)?;
        }

        return self.drain();
    }

    fn notify(&mut self, text: String) -> Result<()> {
        writeln!(self.renderer.out, "{text}")?;
        self.renderer.out.flush()?;

        return Ok(());
    }

    fn handle_line(&mut self, line: &str) -> Result<Input> {
        let res = match SlashCommand::parse(line) {
            Some(command) if command.is_quit() => return Ok(Input::Quit),
            Some(command) if command.is_help() => {
                self.notify(help_text())?;
                return Ok(Input::Handled);
            }
            Some(command) if command.is_new_conversation() => {
                self.store().reset();
                self.drain()?;
                self.greet()?;
                return Ok(Input::Handled);
            }
            Some(command) if command.is_conversation_id() => {
                self.drain()?;
                let text = match self.renderer.conversation_id.clone() {
                    Some(id) => id,
                    None => "This conversation hasn't been saved yet.".to_string(),
                };
                self.notify(text)?;
                return Ok(Input::Handled);
            }
            Some(command) if command.is_regenerate() => {
                let messages = self.store().messages();
                match last_message_from(&messages, Sender::Assistant)
                    .filter(|message| return message.can_regenerate)
                {
                    Some(message) => self
                        .controller
                        .regenerate(&message.id, &self.model, &self.conversation_type)
                        .map(Some),
                    None => {
                        self.notify("There is no response to regenerate.".to_string())?;
                        return Ok(Input::Handled);
                    }
                }
            }
            Some(command) if command.is_edit() => {
                let messages = self.store().messages();
                match last_message_from(&messages, Sender::User) {
                    Some(message) => self.controller.edit_and_resubmit(
                        &message.id,
                        &command.rest(),
                        &self.model,
                        &self.conversation_type,
                    ),
                    None => {
                        self.notify("There is no prompt to edit.".to_string())?;
                        return Ok(Input::Handled);
                    }
                }
            }
            _ => self
                .controller
                .submit(line, &self.model, None, &self.conversation_type),
        };

        match res {
            Ok(Some(submission)) => return Ok(Input::Submitted(submission)),
            Ok(None) => return Ok(Input::Handled),
            Err(err) => {
                self.report(&err)?;
                return Ok(Input::Handled);
            }
        }
    }

    fn report(&mut self, err: &ChatError) -> Result<()> {
        let text = match err {
            ChatError::NoModelSelected => {
                "No model selected. Pass --model or set `model` in the config file.".to_string()
            }
            _ => err.to_string(),
        };

        return self.notify(Paint::red(text).to_string());
    }

    /// Renders a response until it finishes. Ctrl-C stops it and keeps what
    /// arrived so far.
    async fn follow(&mut self, submission: Submission) -> Result<SubmissionOutcome> {
        tracing::debug!(
            user_message_id = %submission.user_message_id,
            message_id = %submission.message_id,
            "Following response"
        );
        let token = submission.cancellation_token();
        let wait = submission.wait();
        tokio::pin!(wait);

        let outcome = loop {
            tokio::select! {
                outcome = &mut wait => break outcome,
                Some(update) = self.updates.recv() => self.renderer.render(&update)?,
                _ = signal::ctrl_c() => token.cancel(),
            }
        };
        self.drain()?;

        if outcome == SubmissionOutcome::Aborted {
            let text = "Response stopped. Use /regenerate to ask again.";
            self.notify(Paint::yellow(text).to_string())?;
        }
        if let Err(err) = outcome.clone().into_result() {
            let text = format!("Response failed: {err}. Use /regenerate to try again.");
            self.notify(Paint::red(text).to_string())?;
        }

        return Ok(outcome);
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            write!(self.renderer.out, "\n{} ", Paint::green(">").bold())?;
            self.renderer.out.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = signal::ctrl_c() => None,
            };
            let line = match line {
                Some(line) => line,
                None => break,
            };

            match self.handle_line(&line)? {
                Input::Quit => break,
                Input::Handled => continue,
                Input::Submitted(submission) => {
                    self.follow(submission).await?;
                }
            }
        }

        return Ok(());
    }
}

/// Starts an interactive chat on stdin/stdout, resuming the configured
/// conversation when there is one.
pub async fn start(transport: TransportBox) -> Result<()> {
    let store = ConversationStore::default();
    let controller = SubmissionController::new(transport.clone(), store.clone(), options_from_config());
    let mut console = Console::new(
        controller,
        model_from_config(),
        &Config::get(ConfigKey::ConversationType),
        &Config::get(ConfigKey::InitialGreeting),
        io::stdout(),
    );

    if let Err(err) = transport.health_check().await {
        tracing::warn!(err = ?err, "Backend health check failed");
        console.notify(Paint::yellow(format!("Warning: {err}")).to_string())?;
    }

    let conversation_id = Config::get(ConfigKey::ConversationID);
    if conversation_id.is_empty() {
        console.greet()?;
    } else {
        let detail = Conversations::default().load(&conversation_id).await?;
        store.load_history(Some(conversation_id), detail.to_messages())?;
        console.drain()?;
    }

    return console.run().await;
}
