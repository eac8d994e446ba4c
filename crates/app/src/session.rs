//! The send-message use case.
//!
//! One `ChatSession` hosts one conversation. `send_message` appends the user
//! turn, opens the backend stream for the configured mode, feeds every decoded
//! event through the merge engine into the store and, whatever the outcome,
//! leaves no message it touched in a streaming state.

use std::pin::pin;
use std::sync::Arc;

use deeprag_backend::request::REPLAY_CONTENT;
use deeprag_backend::{
    AgentChatRequest, AssistantChatRequest, BackendError, ByteStream, ChatBackend,
};
use deeprag_chat::{
    AssistantFrame, AssistantStreamAdapter, ChatEvent, ConversationStore, Message, MessageId,
    Role, SseEvent, StoreChange, StoreError, ThreadId, close_message, decode_data_line_stream,
    decode_event_stream, merge_message,
};
use futures::StreamExt;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::notify::Notifier;
use crate::settings::{ChatMode, ChatSettings, SettingsError, SettingsStore};

pub const MISSING_ASSISTANT_MESSAGE: &str = "Select an assistant before chatting in ask mode";
pub const SEND_FAILED_TITLE: &str = "Something went wrong";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("{}", MISSING_ASSISTANT_MESSAGE))]
    MissingAssistant { stage: &'static str },
    #[snafu(display("chat stream failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("failed to save chat settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Where the most recent send stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Done,
    Interrupted,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    /// The agents paused for feedback; the interrupt options are on the message.
    Interrupted,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub interrupt_feedback: Option<String>,
}

impl SendOptions {
    pub fn with_interrupt_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.interrupt_feedback = Some(feedback.into());
        self
    }
}

enum StreamEnd {
    Completed,
    Interrupted,
    Cancelled,
}

pub struct ChatSession {
    store: ConversationStore,
    backend: Arc<dyn ChatBackend>,
    settings: Arc<SettingsStore>,
    notifier: Arc<dyn Notifier>,
    responding: bool,
    error: Option<String>,
    phase: SendPhase,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        settings: Arc<SettingsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store: ConversationStore::default(),
            backend,
            settings,
            notifier,
            responding: false,
            error: None,
            phase: SendPhase::Idle,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// For the research panel: open and close sessions.
    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreChange> {
        self.store.subscribe()
    }

    pub fn thread_id(&self) -> &ThreadId {
        self.store.thread_id()
    }

    pub fn responding(&self) -> bool {
        self.responding
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn phase(&self) -> SendPhase {
        self.phase
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.settings()
    }

    /// Persists new settings. Switching mode or assistant starts over.
    pub fn update_settings(&mut self, settings: ChatSettings) -> SessionResult<()> {
        let previous = self.settings.settings();
        let saved = self.settings.update(settings).context(SettingsSnafu {
            stage: "update-chat-settings",
        })?;

        if previous.changes_conversation(&saved) {
            tracing::info!(
                mode = %saved.mode,
                chatbot_id = ?saved.chatbot_id,
                "chat target changed, starting a new conversation"
            );
            self.new_conversation();
        }
        Ok(())
    }

    pub fn new_conversation(&mut self) {
        self.store.start_thread(ThreadId::generate());
        self.error = None;
        self.phase = SendPhase::Idle;
    }

    /// Sends one turn and streams the reply into the store.
    ///
    /// `content` of `None` asks the backend to continue the thread, e.g.
    /// after answering an interrupt through `options`.
    pub async fn send_message(
        &mut self,
        content: Option<String>,
        options: SendOptions,
        cancel: CancellationToken,
    ) -> SessionResult<SendOutcome> {
        let settings = self.settings.settings();
        let chatbot_id = settings.chatbot_id.clone();
        if settings.mode == ChatMode::Ask && chatbot_id.is_none() {
            tracing::warn!("ask mode has no assistant configured");
            self.error = Some(MISSING_ASSISTANT_MESSAGE.to_string());
            self.notifier.open_settings();
            return MissingAssistantSnafu {
                stage: "check-chat-settings",
            }
            .fail();
        }

        self.error = None;
        if let Some(text) = content.as_deref() {
            let user = Message::user(self.store.thread_id().clone(), text);
            if let Err(error) = self.store.append_message(user) {
                tracing::warn!(%error, "failed to record user message");
            }
        }

        self.responding = true;
        self.phase = SendPhase::Sending;
        let mut touched = Vec::new();

        let result = match (settings.mode, chatbot_id) {
            (ChatMode::Ask, Some(chatbot_id)) => {
                let request = AssistantChatRequest::new(
                    chatbot_id,
                    content.unwrap_or_else(|| REPLAY_CONTENT.to_string()),
                );
                self.stream_assistant(request, &cancel, &mut touched).await
            }
            (ChatMode::Ask, None) => MissingAssistantSnafu {
                stage: "check-chat-settings",
            }
            .fail(),
            (ChatMode::Agent, _) => {
                let request = AgentChatRequest::new(self.store.thread_id().as_str(), content)
                    .with_limits(settings.research.limits())
                    .with_interrupt_feedback(options.interrupt_feedback.clone());
                self.stream_agent(request, &options, &cancel, &mut touched)
                    .await
            }
        };

        self.close_streaming(&touched);
        self.responding = false;

        match result {
            Ok(StreamEnd::Completed) => {
                self.phase = SendPhase::Done;
                Ok(SendOutcome::Completed)
            }
            Ok(StreamEnd::Interrupted) => {
                self.phase = SendPhase::Interrupted;
                Ok(SendOutcome::Interrupted)
            }
            Ok(StreamEnd::Cancelled) => {
                tracing::info!(thread_id = %self.store.thread_id(), "send cancelled");
                self.store.abandon_ongoing_research();
                self.phase = SendPhase::Cancelled;
                Ok(SendOutcome::Cancelled)
            }
            Err(error) => {
                tracing::error!(thread_id = %self.store.thread_id(), %error, "send failed");
                self.store.abandon_ongoing_research();
                self.phase = SendPhase::Failed;
                self.error = Some(error.to_string());
                self.notifier.error(SEND_FAILED_TITLE, &error.to_string());
                Err(error)
            }
        }
    }

    async fn open_stream<F>(
        &mut self,
        stage: &'static str,
        open: F,
        cancel: &CancellationToken,
    ) -> SessionResult<Option<ByteStream>>
    where
        F: Future<Output = Result<ByteStream, BackendError>>,
    {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            body = open => body.context(TransportSnafu { stage })?,
        };
        self.phase = SendPhase::Streaming;
        Ok(Some(body))
    }

    async fn stream_assistant(
        &mut self,
        request: AssistantChatRequest,
        cancel: &CancellationToken,
        touched: &mut Vec<MessageId>,
    ) -> SessionResult<StreamEnd> {
        let backend = self.backend.clone();
        let Some(body) = self
            .open_stream(
                "open-assistant-stream",
                backend.stream_assistant_chat(request),
                cancel,
            )
            .await?
        else {
            return Ok(StreamEnd::Cancelled);
        };

        let thread_id = self.store.thread_id().clone();
        let reply = Message::streaming(
            MessageId::generate(),
            thread_id.clone(),
            Role::Assistant,
            None,
        );
        let adapter = AssistantStreamAdapter::new(reply.id.clone(), thread_id);
        if let Err(error) = self.store.append_message(reply) {
            tracing::warn!(%error, "failed to record assistant reply");
        }
        touched.push(adapter.message_id().clone());

        let mut events = pin!(decode_data_line_stream(body));
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                next = events.next() => next,
            };
            let Some(next) = next else {
                break;
            };
            let record = next.context(TransportSnafu {
                stage: "read-assistant-stream",
            })?;

            match adapter.adapt(&record) {
                Ok(Some(AssistantFrame::Event(event))) => {
                    self.apply_to(adapter.message_id(), &event)
                }
                Ok(Some(AssistantFrame::Done)) => break,
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        message_id = %adapter.message_id(),
                        %error,
                        "skipping malformed completion chunk"
                    );
                }
            }
        }

        Ok(StreamEnd::Completed)
    }

    async fn stream_agent(
        &mut self,
        request: AgentChatRequest,
        options: &SendOptions,
        cancel: &CancellationToken,
        touched: &mut Vec<MessageId>,
    ) -> SessionResult<StreamEnd> {
        let backend = self.backend.clone();
        let Some(body) = self
            .open_stream("open-agent-stream", backend.stream_agent_chat(request), cancel)
            .await?
        else {
            return Ok(StreamEnd::Cancelled);
        };

        let mut interrupted = false;
        let mut events = pin!(decode_event_stream(body));
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                next = events.next() => next,
            };
            let Some(next) = next else {
                break;
            };
            let record = next.context(TransportSnafu {
                stage: "read-agent-stream",
            })?;

            if let Some(event) = self.apply_agent_event(&record, options, touched) {
                interrupted |= matches!(event, ChatEvent::Interrupt(_));
            }
        }

        if interrupted {
            Ok(StreamEnd::Interrupted)
        } else {
            Ok(StreamEnd::Completed)
        }
    }

    /// Routes one native event to its message and merges it.
    fn apply_agent_event(
        &mut self,
        record: &SseEvent,
        options: &SendOptions,
        touched: &mut Vec<MessageId>,
    ) -> Option<ChatEvent> {
        let event = match ChatEvent::from_sse(record) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(event = %record.event, "ignoring unsupported stream event");
                return None;
            }
            Err(error) => {
                tracing::warn!(event = %record.event, %error, "skipping malformed stream event");
                return None;
            }
        };

        let target = match &event {
            ChatEvent::ToolCallResult(result) => self
                .store
                .find_message_by_tool_call(&result.tool_call_id)
                .or_else(|| self.store.message(event.message_id())),
            _ => match self.store.message(event.message_id()) {
                Some(message) => Some(message),
                None => self.append_shell(&event, options),
            },
        };
        let Some(target) = target else {
            tracing::warn!(
                message_id = %event.message_id(),
                event = event.kind(),
                "no message to apply stream event to"
            );
            return None;
        };

        if !touched.contains(&target.id) {
            touched.push(target.id.clone());
        }
        self.apply_to(&target.id, &event);
        Some(event)
    }

    fn append_shell(
        &mut self,
        event: &ChatEvent,
        options: &SendOptions,
    ) -> Option<Arc<Message>> {
        let envelope = event.envelope();
        let thread_id = if envelope.thread_id.is_empty() {
            self.store.thread_id().clone()
        } else {
            envelope.thread_id.clone()
        };
        let shell = Message::streaming(
            envelope.id.clone(),
            thread_id,
            envelope.role,
            envelope.agent,
        )
        .with_interrupt_feedback(options.interrupt_feedback.clone());

        match self.store.append_message(shell) {
            Ok(message) => Some(message),
            Err(StoreError::MissingPlanAnchor { message_id, .. }) => {
                tracing::warn!(
                    message_id = %message_id,
                    "research activity kept outside any session"
                );
                self.store.message(&message_id)
            }
            Err(error) => {
                tracing::warn!(
                    message_id = %envelope.id,
                    %error,
                    "failed to record streamed message"
                );
                None
            }
        }
    }

    fn apply_to(&mut self, message_id: &MessageId, event: &ChatEvent) {
        let Some(current) = self.store.message(message_id) else {
            return;
        };
        let merged = merge_message(&current, event);
        if merged == *current {
            return;
        }
        if let Err(error) = self.store.update_message(merged) {
            tracing::warn!(message_id = %message_id, %error, "failed to store merged message");
        }
    }

    fn close_streaming(&mut self, touched: &[MessageId]) {
        for message_id in touched {
            let Some(message) = self.store.message(message_id) else {
                continue;
            };
            if !message.is_streaming {
                continue;
            }

            tracing::debug!(message_id = %message_id, "closing message left streaming");
            if let Err(error) = self.store.update_message(close_message(&message)) {
                tracing::warn!(
                    message_id = %message_id,
                    %error,
                    "failed to close streaming message"
                );
            }
        }
    }
}
