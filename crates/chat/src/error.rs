use snafu::Snafu;

use crate::ids::{MessageId, ResearchId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EventError {
    #[snafu(display("stream event '{event}' carried no data"))]
    MissingData {
        stage: &'static str,
        event: String,
    },
    #[snafu(display("stream event '{event}' has a malformed payload: {source}"))]
    MalformedPayload {
        stage: &'static str,
        event: String,
        source: serde_json::Error,
    },
}

pub type EventResult<T> = Result<T, EventError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display(
        "message '{message_id}' opens a research session but no planner message precedes it"
    ))]
    MissingPlanAnchor {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("message '{message_id}' is not in the conversation"))]
    UnknownMessage {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("message '{message_id}' was already appended"))]
    DuplicateMessage {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("research session '{research_id}' does not exist"))]
    UnknownResearch {
        stage: &'static str,
        research_id: ResearchId,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;
