//! Folds one stream event into one message snapshot.
//!
//! `merge_message` never edits its input: it clones the current snapshot,
//! applies the event to the clone and returns it, so callers can detect
//! changes by identity.

use serde_json::{Map, Value};

use crate::event::{
    AnnouncedToolCall, ChatEvent, InterruptEvent, MessageChunkEvent, ToolCallChunk,
    ToolCallResultEvent,
};
use crate::json;
use crate::message::{FinishReason, Message, ToolCall};

pub fn merge_message(message: &Message, event: &ChatEvent) -> Message {
    let mut next = message.clone();

    if let ChatEvent::ToolCallResult(result) = event {
        merge_tool_call_result(&mut next, result);
        // The result event belongs to the tool message; it only terminates the
        // owning message when it is addressed to it directly.
        if next.is_streaming
            && result.envelope.id == next.id
            && let Some(reason) = result.envelope.finish_reason
        {
            finish_message(&mut next, reason);
        }
        return next;
    }

    if !next.is_streaming {
        tracing::debug!(
            message_id = %next.id,
            event = event.kind(),
            "ignoring event for a message that already finished"
        );
        return next;
    }

    match event {
        ChatEvent::MessageChunk(chunk) => merge_text(&mut next, chunk),
        ChatEvent::ToolCalls(calls) => {
            announce_tool_calls(&mut next, &calls.tool_calls);
            merge_tool_call_chunks(&mut next, &calls.tool_call_chunks);
        }
        ChatEvent::ToolCallChunks(chunks) => {
            merge_tool_call_chunks(&mut next, &chunks.tool_call_chunks)
        }
        ChatEvent::Interrupt(interrupt) => merge_interrupt(&mut next, interrupt),
        ChatEvent::ToolCallResult(_) => {}
    }

    if let Some(reason) = event.finish_reason() {
        finish_message(&mut next, reason);
    }

    next
}

/// Marks a message finished and parses every pending argument buffer.
///
/// Calling this on an already finished message only updates the reason.
pub fn finish_message(message: &mut Message, reason: FinishReason) {
    message.finish_reason = Some(reason);
    settle(message);
}

/// Stops a message that will receive no terminal event, keeping what arrived.
///
/// Used after cancellation or a transport failure; no finish reason is set.
pub fn close_message(message: &Message) -> Message {
    let mut next = message.clone();
    settle(&mut next);
    next
}

fn settle(message: &mut Message) {
    message.is_streaming = false;
    message.active_tool_call = None;

    let Some(tool_calls) = message.tool_calls.as_mut() else {
        return;
    };
    for tool_call in tool_calls.iter_mut() {
        let Some(chunks) = tool_call.args_chunks.take() else {
            continue;
        };
        let raw = chunks.concat();
        // Nothing streamed: the announced arguments stand.
        if raw.trim().is_empty() {
            continue;
        }
        tool_call.args = parse_tool_call_args(&message.id, tool_call, &raw);
    }
}

fn merge_text(message: &mut Message, event: &MessageChunkEvent) {
    let Some(content) = event.content.as_deref() else {
        return;
    };
    if content.is_empty() {
        return;
    }
    message.content.push_str(content);
    message.content_chunks.push(content.to_string());
}

fn announce_tool_calls(message: &mut Message, announced: &[AnnouncedToolCall]) {
    let establishes_identity = announced
        .first()
        .and_then(|call| call.name.as_deref())
        .is_some_and(|name| !name.is_empty());
    if !establishes_identity {
        return;
    }

    message.tool_calls = Some(
        announced
            .iter()
            .map(|call| {
                ToolCall::new(
                    call.id.clone().unwrap_or_default(),
                    call.name.clone().unwrap_or_default(),
                    call.args.clone(),
                )
            })
            .collect(),
    );
    message.active_tool_call = None;
}

fn merge_tool_call_chunks(message: &mut Message, chunks: &[ToolCallChunk]) {
    let tool_calls = message.tool_calls.get_or_insert_with(Vec::new);

    for chunk in chunks {
        if let Some(call_id) = chunk.call_id() {
            match tool_calls.iter_mut().find(|call| &call.id == call_id) {
                Some(tool_call) => {
                    tool_call.args_chunks = Some(vec![chunk.args_text().to_string()]);
                    message.active_tool_call = Some(call_id.clone());
                }
                None => {
                    tracing::debug!(
                        message_id = %message.id,
                        tool_call_id = %call_id,
                        "argument fragment names a tool call that was never announced"
                    );
                    message.active_tool_call = None;
                }
            }
            continue;
        }

        let target = match &message.active_tool_call {
            Some(active) => tool_calls
                .iter_mut()
                .find(|call| &call.id == active && call.args_chunks.is_some()),
            None => {
                // Only one call may stream arguments at a time.
                let mut streaming = tool_calls.iter_mut().filter(|call| call.is_streaming_args());
                match (streaming.next(), streaming.next()) {
                    (Some(only), None) => Some(only),
                    (Some(_), Some(_)) => {
                        tracing::warn!(
                            message_id = %message.id,
                            "several tool calls are streaming arguments; dropping fragment"
                        );
                        None
                    }
                    (None, _) => None,
                }
            }
        };

        match target {
            Some(tool_call) => {
                if let Some(buffer) = tool_call.args_chunks.as_mut() {
                    buffer.push(chunk.args_text().to_string());
                }
            }
            None => tracing::warn!(
                message_id = %message.id,
                "argument fragment arrived with no tool call streaming; dropping it"
            ),
        }
    }
}

fn merge_tool_call_result(message: &mut Message, event: &ToolCallResultEvent) {
    let Some(tool_call) = message
        .tool_calls
        .as_mut()
        .and_then(|calls| calls.iter_mut().find(|call| call.id == event.tool_call_id))
    else {
        tracing::debug!(
            message_id = %message.id,
            tool_call_id = %event.tool_call_id,
            "tool call result does not match any call on this message"
        );
        return;
    };
    tool_call.result = event.content.clone();
}

fn merge_interrupt(message: &mut Message, event: &InterruptEvent) {
    message.options = Some(event.options.clone());
    let reason = event
        .envelope
        .finish_reason
        .unwrap_or(FinishReason::Interrupt);
    finish_message(message, reason);
}

fn parse_tool_call_args(
    message_id: &crate::ids::MessageId,
    tool_call: &ToolCall,
    raw: &str,
) -> Value {
    match json::parse_lenient::<Value>(raw) {
        Ok(args) => args,
        Err(error) => {
            tracing::warn!(
                message_id = %message_id,
                tool_call_id = %tool_call.id,
                tool_name = %tool_call.name,
                error = %error,
                "tool call arguments are not valid JSON; using empty arguments"
            );
            Value::Object(Map::new())
        }
    }
}
