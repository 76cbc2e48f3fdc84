#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::ConversationStore;
use super::KeyPaths;
use super::ResponseAssembler;
use crate::domain::models::ChatError;
use crate::domain::models::HistoryMessage;
use crate::domain::models::Message;
use crate::domain::models::ModelRef;
use crate::domain::models::Sender;
use crate::domain::models::SubmissionRequest;
use crate::domain::models::TransportBox;
use crate::domain::models::TransportError;
use crate::domain::models::DEFAULT_BUFFERED_TIMEOUT;
use crate::domain::models::DEFAULT_STREAMING_TIMEOUT;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Validating,
    Streaming,
    Finalized,
    Aborted,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Finalized,
    Aborted,
    Failed(TransportError),
}

impl SubmissionOutcome {
    fn state(&self) -> SubmissionState {
        match self {
            SubmissionOutcome::Finalized => return SubmissionState::Finalized,
            SubmissionOutcome::Aborted => return SubmissionState::Aborted,
            SubmissionOutcome::Failed(_) => return SubmissionState::Failed,
        }
    }

    /// Cancellation is a normal way for a response to end, so only transport
    /// failures become errors.
    pub fn into_result(self) -> Result<(), ChatError> {
        match self {
            SubmissionOutcome::Failed(err) => return Err(ChatError::Transport(err)),
            _ => return Ok(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub user_id: String,
    pub stream: bool,
    pub buffered_timeout: Duration,
    pub streaming_timeout: Duration,
    /// Most recent messages replayed to the backend. Zero sends everything.
    pub max_history: usize,
    pub key_paths: KeyPaths,
}

impl Default for ControllerOptions {
    fn default() -> ControllerOptions {
        return ControllerOptions {
            user_id: "".to_string(),
            stream: true,
            buffered_timeout: DEFAULT_BUFFERED_TIMEOUT,
            streaming_timeout: DEFAULT_STREAMING_TIMEOUT,
            max_history: 0,
            key_paths: KeyPaths::default(),
        };
    }
}

/// Handle to a response in flight.
pub struct Submission {
    pub user_message_id: String,
    pub message_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<SubmissionOutcome>,
}

impl Submission {
    /// Stops the response. Safe to call at any point, including after the
    /// response already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        return self.cancel.clone();
    }

    pub async fn wait(self) -> SubmissionOutcome {
        match self.handle.await {
            Ok(outcome) => return outcome,
            Err(err) => return SubmissionOutcome::Failed(TransportError::Network(err.to_string())),
        }
    }
}

/// State for one running submission. Lives inside the spawned task.
struct SubmissionRun {
    transport: TransportBox,
    store: ConversationStore,
    assembler: ResponseAssembler,
    message_id: String,
}

impl SubmissionRun {
    async fn execute(mut self, request: SubmissionRequest) -> SubmissionOutcome {
        let outcome = if request.stream {
            self.stream(&request).await
        } else {
            self.buffered(&request).await
        };

        match &outcome {
            SubmissionOutcome::Finalized => {
                tracing::debug!(message_id = %self.message_id, "Response finished");
                self.store.finalize_message(&self.message_id, false);
            }
            SubmissionOutcome::Aborted => {
                tracing::info!(message_id = %self.message_id, "Response cancelled");
                self.store.finalize_message(&self.message_id, true);
            }
            SubmissionOutcome::Failed(err) if err.is_timeout() => {
                tracing::warn!(
                    message_id = %self.message_id,
                    timeout_ms = request.timeout.as_millis() as u64,
                    "Response stalled and timed out"
                );
                self.store.finalize_message(&self.message_id, true);
            }
            SubmissionOutcome::Failed(err) => {
                tracing::error!(message_id = %self.message_id, error = %err, "Response failed");
                self.store.finalize_message(&self.message_id, true);
            }
        }

        return outcome;
    }

    async fn stream(&mut self, request: &SubmissionRequest) -> SubmissionOutcome {
        let cancel = request.cancel.clone();
        if cancel.is_cancelled() {
            return SubmissionOutcome::Aborted;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let transport = self.transport.clone();
        let worker_request = request.clone();
        let mut worker: JoinHandle<Result<(), TransportError>> = tokio::spawn(async move {
            return transport.send_streaming(&worker_request, &tx).await;
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    worker.abort();
                    return SubmissionOutcome::Aborted;
                }
                next = time::timeout(request.timeout, rx.recv()) => {
                    match next {
                        Err(_) => {
                            worker.abort();
                            return SubmissionOutcome::Failed(TransportError::Timeout);
                        }
                        Ok(Some(raw)) => {
                            self.apply_fragment(&raw);
                            if self.assembler.is_done() {
                                worker.abort();
                                return SubmissionOutcome::Finalized;
                            }
                        }
                        Ok(None) => break,
                    }
                }
            }
        }

        // The channel only closes once the transport call has returned.
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                worker.abort();
                return SubmissionOutcome::Aborted;
            }
            res = &mut worker => res,
        };

        match res {
            Ok(Ok(())) => return SubmissionOutcome::Finalized,
            Ok(Err(err)) if err.is_cancelled() => return SubmissionOutcome::Aborted,
            Ok(Err(err)) => return SubmissionOutcome::Failed(err),
            Err(err) => return SubmissionOutcome::Failed(TransportError::Network(err.to_string())),
        }
    }

    async fn buffered(&mut self, request: &SubmissionRequest) -> SubmissionOutcome {
        let cancel = request.cancel.clone();
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SubmissionOutcome::Aborted,
            res = time::timeout(request.timeout, self.transport.send_buffered(request)) => res,
        };

        match res {
            Err(_) => return SubmissionOutcome::Failed(TransportError::Timeout),
            Ok(Err(err)) if err.is_cancelled() => return SubmissionOutcome::Aborted,
            Ok(Err(err)) => return SubmissionOutcome::Failed(err),
            Ok(Ok(payload)) => {
                tracing::debug!(body = ?payload, "Buffered response");
                let fragment = self.assembler.extract_payload(&payload);
                self.apply_conversation_id(fragment.conversation_id);
                if fragment.text.is_some() {
                    self.store
                        .update_message_content(&self.message_id, self.assembler.final_text());
                }

                return SubmissionOutcome::Finalized;
            }
        }
    }

    fn apply_fragment(&mut self, raw: &str) {
        let fragment = self.assembler.consume_fragment(raw);
        if fragment.is_empty() {
            return;
        }
        self.apply_conversation_id(fragment.conversation_id);

        if fragment.text.is_some() {
            self.store
                .update_message_content(&self.message_id, self.assembler.final_text());
        }
    }

    fn apply_conversation_id(&self, conversation_id: Option<String>) {
        if let Some(id) = conversation_id {
            if let Err(err) = self.store.set_conversation_id(&id) {
                tracing::error!(error = %err, "Backend sent a different conversation id");
            }
        }
    }
}

/// Runs prompts against the backend for a single conversation, one at a
/// time.
pub struct SubmissionController {
    transport: TransportBox,
    store: ConversationStore,
    options: ControllerOptions,
    in_flight: Arc<AtomicBool>,
    state: Arc<watch::Sender<SubmissionState>>,
}

impl SubmissionController {
    pub fn new(
        transport: TransportBox,
        store: ConversationStore,
        options: ControllerOptions,
    ) -> SubmissionController {
        let (state, _) = watch::channel(SubmissionState::Idle);

        return SubmissionController {
            transport,
            store,
            options,
            in_flight: Arc::new(AtomicBool::new(false)),
            state: Arc::new(state),
        };
    }

    pub fn store(&self) -> &ConversationStore {
        return &self.store;
    }

    pub fn is_busy(&self) -> bool {
        return self.in_flight.load(Ordering::SeqCst);
    }

    pub fn state(&self) -> SubmissionState {
        return *self.state.borrow();
    }

    pub fn watch_state(&self) -> watch::Receiver<SubmissionState> {
        return self.state.subscribe();
    }

    /// Sends a prompt. Blank prompts are ignored and return `Ok(None)`.
    pub fn submit(
        &self,
        prompt: &str,
        model: &ModelRef,
        conversation_id: Option<String>,
        conversation_type: &str,
    ) -> Result<Option<Submission>, ChatError> {
        self.validate(model)?;
        if prompt.trim().is_empty() {
            self.state.send_replace(SubmissionState::Idle);
            return Ok(None);
        }
        self.claim()?;

        let res = self.begin_submit(prompt, model, conversation_id, conversation_type);
        if res.is_err() {
            self.release();
        }

        return res.map(Some);
    }

    /// Throws away an assistant response and everything after it, then asks
    /// again with the prompt that produced it.
    pub fn regenerate(
        &self,
        message_id: &str,
        model: &ModelRef,
        conversation_type: &str,
    ) -> Result<Submission, ChatError> {
        self.validate(model)?;
        self.claim()?;

        let res = self.begin_regenerate(message_id, model, conversation_type);
        if res.is_err() {
            self.release();
        }

        return res;
    }

    /// Rewrites an earlier user prompt, drops every later message, and
    /// resubmits.
    pub fn edit_and_resubmit(
        &self,
        message_id: &str,
        text: &str,
        model: &ModelRef,
        conversation_type: &str,
    ) -> Result<Option<Submission>, ChatError> {
        self.validate(model)?;
        if text.trim().is_empty() {
            self.state.send_replace(SubmissionState::Idle);
            return Ok(None);
        }
        self.claim()?;

        let res = self.begin_edit(message_id, text, model, conversation_type);
        if res.is_err() {
            self.release();
        }

        return res.map(Some);
    }

    fn validate(&self, model: &ModelRef) -> Result<(), ChatError> {
        if self.is_busy() {
            return Err(ChatError::SubmissionInFlight);
        }

        self.state.send_replace(SubmissionState::Validating);
        if !model.is_selected() {
            tracing::warn!("Prompt submitted without a model selected");
            self.state.send_replace(SubmissionState::Idle);
            return Err(ChatError::NoModelSelected);
        }

        return Ok(());
    }

    fn claim(&self) -> Result<(), ChatError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ChatError::SubmissionInFlight);
        }

        return Ok(());
    }

    fn release(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
        self.state.send_replace(SubmissionState::Idle);
    }

    fn begin_submit(
        &self,
        prompt: &str,
        model: &ModelRef,
        conversation_id: Option<String>,
        conversation_type: &str,
    ) -> Result<Submission, ChatError> {
        if let Some(id) = &conversation_id {
            self.store.set_conversation_id(id)?;
        }

        let history = HistoryMessage::from_messages(&self.store.messages());
        let user_message = Message::new(Sender::User, prompt);
        let user_message_id = user_message.id.to_string();
        self.store.append_message(user_message)?;

        return self.launch(prompt, user_message_id, history, model, conversation_type);
    }

    fn begin_regenerate(
        &self,
        message_id: &str,
        model: &ModelRef,
        conversation_type: &str,
    ) -> Result<Submission, ChatError> {
        let messages = self.store.messages();
        let idx = match messages.iter().position(|msg| return msg.id == message_id) {
            Some(idx) => idx,
            None => return Err(ChatError::MessageNotFound(message_id.to_string())),
        };
        let user_idx = match messages[..=idx]
            .iter()
            .rposition(|msg| return msg.sender == Sender::User)
        {
            Some(user_idx) => user_idx,
            None => return Err(ChatError::MessageNotFound(message_id.to_string())),
        };

        let user_message = &messages[user_idx];
        self.store.truncate_after(&user_message.id)?;
        let history = HistoryMessage::from_messages(&messages[..user_idx]);

        return self.launch(
            &user_message.content,
            user_message.id.to_string(),
            history,
            model,
            conversation_type,
        );
    }

    fn begin_edit(
        &self,
        message_id: &str,
        text: &str,
        model: &ModelRef,
        conversation_type: &str,
    ) -> Result<Submission, ChatError> {
        let messages = self.store.messages();
        let idx = match messages
            .iter()
            .position(|msg| return msg.id == message_id && msg.sender == Sender::User)
        {
            Some(idx) => idx,
            None => return Err(ChatError::MessageNotFound(message_id.to_string())),
        };

        self.store.edit_message(message_id, text)?;
        self.store.truncate_after(message_id)?;
        let history = HistoryMessage::from_messages(&messages[..idx]);

        return self.launch(
            text,
            message_id.to_string(),
            history,
            model,
            conversation_type,
        );
    }

    fn launch(
        &self,
        prompt: &str,
        user_message_id: String,
        mut history: Vec<HistoryMessage>,
        model: &ModelRef,
        conversation_type: &str,
    ) -> Result<Submission, ChatError> {
        let max_history = self.options.max_history;
        if max_history > 0 && history.len() > max_history {
            history.drain(..history.len() - max_history);
        }

        let placeholder = Message::placeholder();
        let message_id = placeholder.id.to_string();
        self.store.append_message(placeholder)?;

        let mut request = SubmissionRequest::new(prompt, model.clone());
        request.stream = self.options.stream;
        request.conversation_id = self.store.conversation_id();
        request.conversation_type = conversation_type.to_string();
        request.history = history;
        request.user_id = self.options.user_id.to_string();
        request.timeout = self.options.streaming_timeout;
        if !self.options.stream {
            request.timeout = self.options.buffered_timeout;
        }
        let cancel = request.cancel.clone();

        tracing::debug!(
            message_id = %message_id,
            model = %model.name,
            provider = %model.provider,
            stream = request.stream,
            conversation_id = ?request.conversation_id,
            "Submitting prompt"
        );

        let run = SubmissionRun {
            transport: self.transport.clone(),
            store: self.store.clone(),
            assembler: ResponseAssembler::new(self.options.key_paths.clone()),
            message_id: message_id.to_string(),
        };

        self.state.send_replace(SubmissionState::Streaming);
        let in_flight = self.in_flight.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            let outcome = run.execute(request).await;
            state.send_replace(outcome.state());
            in_flight.store(false, Ordering::SeqCst);

            return outcome;
        });

        return Ok(Submission {
            user_message_id,
            message_id,
            cancel,
            handle,
        });
    }
}
