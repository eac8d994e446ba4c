use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MessageId, ThreadId, ToolCallId};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Producer identity of a message in multi-agent mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Coordinator,
    Planner,
    Researcher,
    Coder,
    Reporter,
}

impl Agent {
    /// Agents whose output is grouped under a research session.
    pub fn is_research_activity(self) -> bool {
        matches!(self, Agent::Researcher | Agent::Coder | Agent::Reporter)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Agent::Coordinator => "coordinator",
            Agent::Planner => "planner",
            Agent::Researcher => "researcher",
            Agent::Coder => "coder",
            Agent::Reporter => "reporter",
        }
    }
}

/// Terminal marker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Interrupt,
}

/// One selectable continuation offered by an interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptOption {
    pub text: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub args: Value,
    pub result: Option<String>,
    /// Raw argument fragments, present only until the owning message finishes.
    pub args_chunks: Option<Vec<String>>,
}

impl ToolCall {
    pub fn new(id: ToolCallId, name: impl Into<String>, args: Value) -> Self {
        Self {
            id,
            name: name.into(),
            args,
            result: None,
            args_chunks: None,
        }
    }

    pub fn is_streaming_args(&self) -> bool {
        self.args_chunks
            .as_ref()
            .is_some_and(|chunks| !chunks.is_empty())
    }
}

/// One turn or agent emission.
///
/// Snapshots are replaced wholesale on every update, never edited in place
/// once they have been handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: Role,
    pub agent: Option<Agent>,
    pub content: String,
    pub content_chunks: Vec<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub is_streaming: bool,
    pub finish_reason: Option<FinishReason>,
    pub options: Option<Vec<InterruptOption>>,
    pub interrupt_feedback: Option<String>,
    pub created_at: SystemTime,
    /// Tool call currently receiving id-less argument fragments.
    pub active_tool_call: Option<ToolCallId>,
}

impl Message {
    /// Creates a fully formed, non-streaming user turn with a local id.
    pub fn user(thread_id: ThreadId, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: MessageId::generate(),
            thread_id,
            role: Role::User,
            agent: None,
            content_chunks: vec![content.clone()],
            content,
            tool_calls: None,
            is_streaming: false,
            finish_reason: None,
            options: None,
            interrupt_feedback: None,
            created_at: SystemTime::now(),
            active_tool_call: None,
        }
    }

    /// Creates an empty placeholder that the merge engine fills in.
    pub fn streaming(id: MessageId, thread_id: ThreadId, role: Role, agent: Option<Agent>) -> Self {
        Self {
            id,
            thread_id,
            role,
            agent,
            content: String::new(),
            content_chunks: Vec::new(),
            tool_calls: None,
            is_streaming: true,
            finish_reason: None,
            options: None,
            interrupt_feedback: None,
            created_at: SystemTime::now(),
            active_tool_call: None,
        }
    }

    pub fn with_interrupt_feedback(mut self, feedback: Option<String>) -> Self {
        self.interrupt_feedback = feedback;
        self
    }

    pub fn tool_call(&self, id: &ToolCallId) -> Option<&ToolCall> {
        self.tool_calls
            .as_ref()
            .and_then(|calls| calls.iter().find(|call| &call.id == id))
    }

    pub fn is_agent(&self, agent: Agent) -> bool {
        self.agent == Some(agent)
    }
}
