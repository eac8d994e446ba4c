use serde::Serialize;
use serde_json::{Map, Value};

pub const REPLAY_CONTENT: &str = "[REPLAY]";
pub const ASSISTANT_MODEL: &str = "model";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Limits forwarded to the research planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResearchLimits {
    pub max_plan_iterations: u32,
    pub max_step_num: u32,
    pub max_search_results: u32,
    pub auto_accepted_plan: bool,
}

impl Default for ResearchLimits {
    fn default() -> Self {
        Self {
            max_plan_iterations: 1,
            max_step_num: 3,
            max_search_results: 3,
            auto_accepted_plan: true,
        }
    }
}

/// Body of a multi-agent stream request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentChatRequest {
    pub messages: Vec<ChatTurn>,
    pub debug: bool,
    pub thread_id: String,
    pub max_plan_iterations: u32,
    pub max_step_num: u32,
    pub max_search_results: u32,
    pub auto_accepted_plan: bool,
    pub interrupt_feedback: String,
    pub mcp_settings: Map<String, Value>,
    pub enable_background_investigation: bool,
}

impl AgentChatRequest {
    /// Without text the request replays the thread.
    pub fn new(thread_id: impl Into<String>, content: Option<String>) -> Self {
        let limits = ResearchLimits::default();
        Self {
            messages: vec![ChatTurn::user(
                content.unwrap_or_else(|| REPLAY_CONTENT.to_string()),
            )],
            debug: false,
            thread_id: thread_id.into(),
            max_plan_iterations: limits.max_plan_iterations,
            max_step_num: limits.max_step_num,
            max_search_results: limits.max_search_results,
            auto_accepted_plan: limits.auto_accepted_plan,
            interrupt_feedback: String::new(),
            mcp_settings: Map::new(),
            enable_background_investigation: false,
        }
    }

    pub fn with_limits(mut self, limits: ResearchLimits) -> Self {
        self.max_plan_iterations = limits.max_plan_iterations;
        self.max_step_num = limits.max_step_num;
        self.max_search_results = limits.max_search_results;
        self.auto_accepted_plan = limits.auto_accepted_plan;
        self
    }

    pub fn with_interrupt_feedback(mut self, feedback: Option<String>) -> Self {
        self.interrupt_feedback = feedback.unwrap_or_default();
        self
    }
}

/// Body of a direct-assistant completions request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantChatRequest {
    #[serde(skip)]
    pub assistant_id: String,
    pub model: &'static str,
    pub messages: Vec<ChatTurn>,
    pub stream: bool,
}

impl AssistantChatRequest {
    pub fn new(assistant_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            model: ASSISTANT_MODEL,
            messages: vec![ChatTurn::user(content)],
            stream: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn agent_request_wire_shape() {
        let request = AgentChatRequest::new("t1", Some("hello".to_string()));

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "messages": [{"role": "user", "content": "hello"}],
                "debug": false,
                "thread_id": "t1",
                "max_plan_iterations": 1,
                "max_step_num": 3,
                "max_search_results": 3,
                "auto_accepted_plan": true,
                "interrupt_feedback": "",
                "mcp_settings": {},
                "enable_background_investigation": false
            })
        );
    }

    #[test]
    fn agent_request_replays_and_forwards_feedback() {
        let request = AgentChatRequest::new("t1", None)
            .with_interrupt_feedback(Some("accepted".to_string()));

        assert_eq!(request.messages[0].content, REPLAY_CONTENT);
        assert_eq!(request.interrupt_feedback, "accepted");
    }

    #[test]
    fn assistant_request_wire_shape() {
        let request = AssistantChatRequest::new("A", "hello");

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "model",
                "messages": [{"role": "user", "content": "hello"}],
                "stream": true
            })
        );
    }
}
