//! Adapts an OpenAI-style chat-completions stream onto `message_chunk` events.

use serde::Deserialize;
use snafu::ResultExt;

use crate::error::{EventResult, MalformedPayloadSnafu};
use crate::event::{ChatEvent, EventEnvelope, MessageChunkEvent, parse_finish_reason};
use crate::ids::{MessageId, ThreadId};
use crate::message::Role;
use crate::sse::SseEvent;

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    delta: Option<CompletionContent>,
    #[serde(default)]
    message: Option<CompletionContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionContent {
    #[serde(default)]
    content: Option<String>,
}

/// What one completions record means for the reply being streamed.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantFrame {
    Event(ChatEvent),
    Done,
}

/// Addresses every completions delta to one locally created reply message.
#[derive(Debug, Clone)]
pub struct AssistantStreamAdapter {
    message_id: MessageId,
    thread_id: ThreadId,
}

impl AssistantStreamAdapter {
    pub fn new(message_id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            message_id,
            thread_id,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Returns `Ok(None)` for records that carry neither text nor a finish reason.
    pub fn adapt(&self, event: &SseEvent) -> EventResult<Option<AssistantFrame>> {
        let Some(data) = event.data.as_deref() else {
            return Ok(None);
        };
        let data = data.trim();
        if data == DONE_SENTINEL {
            return Ok(Some(AssistantFrame::Done));
        }
        if data.is_empty() {
            return Ok(None);
        }

        let chunk: CompletionChunk = serde_json::from_str(data).context(MalformedPayloadSnafu {
            stage: "adapt-completion-chunk",
            event: event.event.clone(),
        })?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };

        let content = choice
            .delta
            .and_then(|delta| delta.content)
            .or_else(|| choice.message.and_then(|message| message.content));
        let finish_reason = choice.finish_reason.as_deref().and_then(parse_finish_reason);
        if content.is_none() && finish_reason.is_none() {
            return Ok(None);
        }

        let mut envelope = EventEnvelope::new(
            self.message_id.clone(),
            self.thread_id.clone(),
            Role::Assistant,
        );
        envelope.finish_reason = finish_reason;

        Ok(Some(AssistantFrame::Event(ChatEvent::MessageChunk(
            MessageChunkEvent { envelope, content },
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FinishReason;

    fn adapter() -> AssistantStreamAdapter {
        AssistantStreamAdapter::new(MessageId::new("reply"), ThreadId::new("t1"))
    }

    fn data(raw: &str) -> SseEvent {
        SseEvent::new("message", Some(raw.to_string()))
    }

    #[test]
    fn delta_content_becomes_a_message_chunk() {
        let frame = adapter()
            .adapt(&data(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#))
            .unwrap();

        let Some(AssistantFrame::Event(ChatEvent::MessageChunk(chunk))) = frame else {
            panic!("expected a message chunk");
        };
        assert_eq!(chunk.envelope.id, MessageId::new("reply"));
        assert_eq!(chunk.content.as_deref(), Some("Hi"));
        assert_eq!(chunk.envelope.finish_reason, None);
    }

    #[test]
    fn finish_reason_terminates() {
        let frame = adapter()
            .adapt(&data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#))
            .unwrap();

        let Some(AssistantFrame::Event(event)) = frame else {
            panic!("expected an event");
        };
        assert_eq!(event.finish_reason(), Some(FinishReason::Stop));
    }

    #[test]
    fn done_sentinel_and_empty_records() {
        assert_eq!(
            adapter().adapt(&data("[DONE]")).unwrap(),
            Some(AssistantFrame::Done)
        );
        assert_eq!(adapter().adapt(&data(r#"{"choices":[]}"#)).unwrap(), None);
        assert_eq!(
            adapter()
                .adapt(&data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#))
                .unwrap(),
            None
        );
    }

    #[test]
    fn full_message_payloads_are_accepted() {
        let frame = adapter()
            .adapt(&data(r#"{"choices":[{"message":{"content":"Whole answer"}}]}"#))
            .unwrap();

        let Some(AssistantFrame::Event(ChatEvent::MessageChunk(chunk))) = frame else {
            panic!("expected a message chunk");
        };
        assert_eq!(chunk.content.as_deref(), Some("Whole answer"));
    }

    #[test]
    fn malformed_records_are_errors() {
        assert!(adapter().adapt(&data("{\"choices\":")).is_err());
    }
}
