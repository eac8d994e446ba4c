use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};

use crate::error::{EventResult, MalformedPayloadSnafu, MissingDataSnafu};
use crate::ids::{MessageId, ThreadId, ToolCallId};
use crate::message::{Agent, FinishReason, InterruptOption, Role};
use crate::sse::SseEvent;

pub const MESSAGE_CHUNK: &str = "message_chunk";
pub const TOOL_CALLS: &str = "tool_calls";
pub const TOOL_CALL_CHUNKS: &str = "tool_call_chunks";
pub const TOOL_CALL_RESULT: &str = "tool_call_result";
pub const INTERRUPT: &str = "interrupt";

/// Fields every multi-agent event payload carries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventEnvelope {
    pub id: MessageId,
    #[serde(default)]
    pub thread_id: ThreadId,
    #[serde(default)]
    pub agent: Option<Agent>,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default, deserialize_with = "deserialize_finish_reason")]
    pub finish_reason: Option<FinishReason>,
}

impl EventEnvelope {
    pub fn new(id: MessageId, thread_id: ThreadId, role: Role) -> Self {
        Self {
            id,
            thread_id,
            agent: None,
            role,
            finish_reason: None,
        }
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = Some(finish_reason);
        self
    }
}

/// A tool call as announced by a `tool_calls` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnnouncedToolCall {
    #[serde(default)]
    pub id: Option<ToolCallId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Value,
}

/// One raw argument fragment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallChunk {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<ToolCallId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
}

impl ToolCallChunk {
    /// Chunks with an empty id continue the call that is already streaming.
    pub fn call_id(&self) -> Option<&ToolCallId> {
        self.id.as_ref().filter(|id| !id.is_empty())
    }

    pub fn args_text(&self) -> &str {
        self.args.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageChunkEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallsEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    #[serde(default)]
    pub tool_calls: Vec<AnnouncedToolCall>,
    #[serde(default)]
    pub tool_call_chunks: Vec<ToolCallChunk>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallChunksEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    #[serde(default)]
    pub tool_call_chunks: Vec<ToolCallChunk>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallResultEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub tool_call_id: ToolCallId,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InterruptEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    #[serde(default)]
    pub options: Vec<InterruptOption>,
}

/// The five event kinds of the multi-agent stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    MessageChunk(MessageChunkEvent),
    ToolCalls(ToolCallsEvent),
    ToolCallChunks(ToolCallChunksEvent),
    ToolCallResult(ToolCallResultEvent),
    Interrupt(InterruptEvent),
}

impl ChatEvent {
    /// Decodes a named SSE record.
    ///
    /// Returns `Ok(None)` for event names this client does not consume.
    pub fn from_sse(event: &SseEvent) -> EventResult<Option<Self>> {
        let decoded = match event.event.as_str() {
            MESSAGE_CHUNK => Self::MessageChunk(decode_payload(event)?),
            TOOL_CALLS => Self::ToolCalls(decode_payload(event)?),
            TOOL_CALL_CHUNKS => Self::ToolCallChunks(decode_payload(event)?),
            TOOL_CALL_RESULT => Self::ToolCallResult(decode_payload(event)?),
            INTERRUPT => Self::Interrupt(decode_payload(event)?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            Self::MessageChunk(event) => &event.envelope,
            Self::ToolCalls(event) => &event.envelope,
            Self::ToolCallChunks(event) => &event.envelope,
            Self::ToolCallResult(event) => &event.envelope,
            Self::Interrupt(event) => &event.envelope,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.envelope().id
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.envelope().finish_reason
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageChunk(_) => MESSAGE_CHUNK,
            Self::ToolCalls(_) => TOOL_CALLS,
            Self::ToolCallChunks(_) => TOOL_CALL_CHUNKS,
            Self::ToolCallResult(_) => TOOL_CALL_RESULT,
            Self::Interrupt(_) => INTERRUPT,
        }
    }
}

fn decode_payload<T>(event: &SseEvent) -> EventResult<T>
where
    T: DeserializeOwned,
{
    let data = event.data.as_deref().context(MissingDataSnafu {
        stage: "decode-event-data",
        event: event.event.clone(),
    })?;

    serde_json::from_str(data).context(MalformedPayloadSnafu {
        stage: "decode-event-payload",
        event: event.event.clone(),
    })
}

fn default_role() -> Role {
    Role::Assistant
}

fn deserialize_finish_reason<'de, D>(deserializer: D) -> Result<Option<FinishReason>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_finish_reason))
}

/// Maps a wire finish reason onto the three terminal markers.
///
/// Provider-specific reasons such as `length` still end the message, so they
/// collapse to `Stop`.
pub fn parse_finish_reason(raw: &str) -> Option<FinishReason> {
    match raw.trim() {
        "" => None,
        "stop" => Some(FinishReason::Stop),
        "tool_calls" => Some(FinishReason::ToolCalls),
        "interrupt" => Some(FinishReason::Interrupt),
        other => {
            tracing::debug!(finish_reason = %other, "treating unrecognized finish reason as stop");
            Some(FinishReason::Stop)
        }
    }
}
