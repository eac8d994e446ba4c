pub mod error;
pub mod event;
pub mod ids;
pub mod json;
pub mod merge;
pub mod message;
pub mod openai;
pub mod plan;
pub mod sse;
pub mod store;

pub use error::{EventError, EventResult, StoreError, StoreResult};
pub use event::{
    AnnouncedToolCall, ChatEvent, EventEnvelope, InterruptEvent, MessageChunkEvent,
    ToolCallChunk, ToolCallChunksEvent, ToolCallResultEvent, ToolCallsEvent,
    parse_finish_reason,
};
pub use ids::{MessageId, ResearchId, ThreadId, ToolCallId};
pub use merge::{close_message, finish_message, merge_message};
pub use message::{Agent, FinishReason, InterruptOption, Message, Role, ToolCall};
pub use openai::{AssistantFrame, AssistantStreamAdapter};
pub use plan::{Plan, PlanStep, parse_plan};
pub use sse::{SseDecoder, SseEvent, decode_data_line_stream, decode_event_stream};
pub use store::{ConversationStore, ResearchSession, StoreChange};
