//! Authoritative conversation state.
//!
//! Messages are kept as `Arc` snapshots in arrival order. Agent messages from
//! researcher, coder and reporter are grouped into research sessions, each
//! anchored to the planner message that preceded it. At most one session is
//! ongoing (still producing output); independently, at most one is open
//! (focused by the UI).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{
    DuplicateMessageSnafu, MissingPlanAnchorSnafu, StoreResult, UnknownMessageSnafu,
    UnknownResearchSnafu,
};
use crate::ids::{MessageId, ResearchId, ThreadId, ToolCallId};
use crate::message::{Agent, Message};
use crate::plan::parse_plan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchSession {
    pub id: ResearchId,
    pub plan_message_id: MessageId,
    pub report_message_id: Option<MessageId>,
    /// Planner message first, then grouped messages in arrival order, no repeats.
    pub activity_message_ids: Vec<MessageId>,
}

impl ResearchSession {
    fn new(id: ResearchId, plan_message_id: MessageId) -> Self {
        Self {
            activity_message_ids: vec![plan_message_id.clone(), id.clone()],
            id,
            plan_message_id,
            report_message_id: None,
        }
    }
}

/// Change notifications for observers of the store.
#[derive(Debug, Clone)]
pub enum StoreChange {
    MessageAppended(Arc<Message>),
    MessageUpdated(Arc<Message>),
    ResearchStarted(ResearchId),
    ResearchFinished(ResearchId),
    ResearchOpened(ResearchId),
    ResearchClosed,
    Cleared,
}

#[derive(Debug)]
pub struct ConversationStore {
    thread_id: ThreadId,
    message_ids: Vec<MessageId>,
    messages: HashMap<MessageId, Arc<Message>>,
    positions: HashMap<MessageId, usize>,
    tool_call_owners: HashMap<ToolCallId, MessageId>,
    research_ids: Vec<ResearchId>,
    research_sessions: HashMap<ResearchId, ResearchSession>,
    research_by_message: HashMap<MessageId, ResearchId>,
    ongoing_research_id: Option<ResearchId>,
    open_research_id: Option<ResearchId>,
    subscribers: Vec<mpsc::UnboundedSender<StoreChange>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(ThreadId::generate())
    }
}

impl ConversationStore {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            message_ids: Vec::new(),
            messages: HashMap::new(),
            positions: HashMap::new(),
            tool_call_owners: HashMap::new(),
            research_ids: Vec::new(),
            research_sessions: HashMap::new(),
            research_by_message: HashMap::new(),
            ongoing_research_id: None,
            open_research_id: None,
            subscribers: Vec::new(),
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Starts a fresh thread. Existing messages are cleared first.
    pub fn start_thread(&mut self, thread_id: ThreadId) {
        self.clear_messages();
        self.thread_id = thread_id;
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreChange> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        self.subscribers.push(change_tx);
        change_rx
    }

    /// Records a new message at the end of the conversation.
    ///
    /// A researcher, coder or reporter message with no ongoing research opens
    /// a new session anchored to the nearest preceding planner message. When
    /// no planner precedes it the message is still recorded, ungrouped, and
    /// `MissingPlanAnchor` is returned.
    pub fn append_message(&mut self, message: Message) -> StoreResult<Arc<Message>> {
        if self.messages.contains_key(&message.id) {
            return DuplicateMessageSnafu {
                stage: "append-message",
                message_id: message.id.clone(),
            }
            .fail();
        }

        let mut anchor_missing = false;
        if message.agent.is_some_and(Agent::is_research_activity) {
            if self.ongoing_research_id.is_none() {
                match self.nearest_plan_message_id() {
                    Some(plan_message_id) => self.start_research(&message.id, plan_message_id),
                    None => {
                        tracing::error!(
                            message_id = %message.id,
                            agent = ?message.agent,
                            "research activity arrived without a preceding planner message"
                        );
                        anchor_missing = true;
                    }
                }
            }
            if let Some(research_id) = self.ongoing_research_id.clone() {
                self.append_research_activity(&research_id, &message);
            }
        }

        let message = Arc::new(message);
        self.positions
            .insert(message.id.clone(), self.message_ids.len());
        self.message_ids.push(message.id.clone());
        self.messages.insert(message.id.clone(), message.clone());
        self.index_tool_calls(&message);
        self.emit(StoreChange::MessageAppended(message.clone()));

        if anchor_missing {
            return MissingPlanAnchorSnafu {
                stage: "append-message",
                message_id: message.id.clone(),
            }
            .fail();
        }
        Ok(message)
    }

    /// Replaces the stored snapshot of an existing message.
    pub fn update_message(&mut self, message: Message) -> StoreResult<Arc<Message>> {
        if !self.messages.contains_key(&message.id) {
            return UnknownMessageSnafu {
                stage: "update-message",
                message_id: message.id.clone(),
            }
            .fail();
        }

        let message = Arc::new(message);
        self.messages.insert(message.id.clone(), message.clone());
        self.index_tool_calls(&message);

        if message.is_agent(Agent::Reporter)
            && !message.is_streaming
            && let Some(ongoing) = self.ongoing_research_id.clone()
            && self.research_by_message.get(&message.id) == Some(&ongoing)
        {
            tracing::debug!(research_id = %ongoing, "research report finished");
            self.ongoing_research_id = None;
            self.emit(StoreChange::ResearchFinished(ongoing));
        }

        self.emit(StoreChange::MessageUpdated(message.clone()));
        Ok(message)
    }

    pub fn open_research(&mut self, research_id: &ResearchId) -> StoreResult<()> {
        if !self.research_sessions.contains_key(research_id) {
            return UnknownResearchSnafu {
                stage: "open-research",
                research_id: research_id.clone(),
            }
            .fail();
        }
        self.open_research_id = Some(research_id.clone());
        self.emit(StoreChange::ResearchOpened(research_id.clone()));
        Ok(())
    }

    pub fn close_research(&mut self) {
        if self.open_research_id.take().is_some() {
            self.emit(StoreChange::ResearchClosed);
        }
    }

    /// Drops the ongoing pointer without touching the session itself.
    ///
    /// Used when a stream ends abnormally and the reporter will never finish.
    pub fn abandon_ongoing_research(&mut self) {
        if let Some(research_id) = self.ongoing_research_id.take() {
            tracing::debug!(research_id = %research_id, "abandoning ongoing research");
            self.emit(StoreChange::ResearchFinished(research_id));
        }
    }

    pub fn clear_messages(&mut self) {
        self.message_ids.clear();
        self.messages.clear();
        self.positions.clear();
        self.tool_call_owners.clear();
        self.research_ids.clear();
        self.research_sessions.clear();
        self.research_by_message.clear();
        self.ongoing_research_id = None;
        self.open_research_id = None;
        self.emit(StoreChange::Cleared);
    }

    pub fn message(&self, message_id: &MessageId) -> Option<Arc<Message>> {
        self.messages.get(message_id).cloned()
    }

    pub fn contains_message(&self, message_id: &MessageId) -> bool {
        self.messages.contains_key(message_id)
    }

    pub fn message_ids(&self) -> &[MessageId] {
        &self.message_ids
    }

    /// Messages in conversation order.
    pub fn messages(&self) -> impl Iterator<Item = &Arc<Message>> + '_ {
        self.message_ids
            .iter()
            .filter_map(|message_id| self.messages.get(message_id))
    }

    pub fn len(&self) -> usize {
        self.message_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }

    /// The most recently created message that carries the given tool call.
    pub fn find_message_by_tool_call(&self, tool_call_id: &ToolCallId) -> Option<Arc<Message>> {
        self.tool_call_owners
            .get(tool_call_id)
            .and_then(|message_id| self.message(message_id))
    }

    pub fn research_ids(&self) -> &[ResearchId] {
        &self.research_ids
    }

    pub fn research(&self, research_id: &ResearchId) -> Option<&ResearchSession> {
        self.research_sessions.get(research_id)
    }

    pub fn research_id_for_message(&self, message_id: &MessageId) -> Option<&ResearchId> {
        self.research_by_message.get(message_id)
    }

    pub fn plan_message_id(&self, research_id: &ResearchId) -> Option<&MessageId> {
        self.research(research_id)
            .map(|session| &session.plan_message_id)
    }

    pub fn report_message_id(&self, research_id: &ResearchId) -> Option<&MessageId> {
        self.research(research_id)
            .and_then(|session| session.report_message_id.as_ref())
    }

    pub fn activity_message_ids(&self, research_id: &ResearchId) -> Option<&[MessageId]> {
        self.research(research_id)
            .map(|session| session.activity_message_ids.as_slice())
    }

    pub fn ongoing_research_id(&self) -> Option<&ResearchId> {
        self.ongoing_research_id.as_ref()
    }

    pub fn open_research_id(&self) -> Option<&ResearchId> {
        self.open_research_id.as_ref()
    }

    /// Title from the session's plan, as far as the planner has written it.
    pub fn research_title(&self, research_id: &ResearchId) -> Option<String> {
        let plan_message = self.message(self.plan_message_id(research_id)?)?;
        parse_plan(&plan_message.content)
            .title
            .filter(|title| !title.is_empty())
    }

    fn nearest_plan_message_id(&self) -> Option<MessageId> {
        self.message_ids
            .iter()
            .rev()
            .find(|message_id| {
                self.messages
                    .get(*message_id)
                    .is_some_and(|message| message.is_agent(Agent::Planner))
            })
            .cloned()
    }

    fn start_research(&mut self, research_id: &ResearchId, plan_message_id: MessageId) {
        tracing::debug!(
            research_id = %research_id,
            plan_message_id = %plan_message_id,
            "starting research session"
        );

        let session = ResearchSession::new(research_id.clone(), plan_message_id);
        self.research_ids.push(research_id.clone());
        self.research_sessions.insert(research_id.clone(), session);
        self.ongoing_research_id = Some(research_id.clone());
        self.open_research_id = Some(research_id.clone());
        self.emit(StoreChange::ResearchStarted(research_id.clone()));
        self.emit(StoreChange::ResearchOpened(research_id.clone()));
    }

    fn append_research_activity(&mut self, research_id: &ResearchId, message: &Message) {
        let Some(session) = self.research_sessions.get_mut(research_id) else {
            return;
        };

        if !session.activity_message_ids.contains(&message.id) {
            session.activity_message_ids.push(message.id.clone());
        }
        if message.is_agent(Agent::Reporter) {
            session.report_message_id = Some(message.id.clone());
        }
        self.research_by_message
            .insert(message.id.clone(), research_id.clone());
    }

    fn index_tool_calls(&mut self, message: &Message) {
        let Some(tool_calls) = message.tool_calls.as_ref() else {
            return;
        };
        let Some(&position) = self.positions.get(&message.id) else {
            return;
        };

        for tool_call in tool_calls.iter().filter(|call| !call.id.is_empty()) {
            let newer_owner = self
                .tool_call_owners
                .get(&tool_call.id)
                .and_then(|owner| self.positions.get(owner))
                .is_some_and(|&owner_position| owner_position > position);
            if !newer_owner {
                self.tool_call_owners
                    .insert(tool_call.id.clone(), message.id.clone());
            }
        }
    }

    fn emit(&mut self, change: StoreChange) {
        self.subscribers
            .retain(|change_tx| change_tx.send(change.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::StoreError;
    use crate::message::{Role, ToolCall};

    fn agent_message(id: &str, agent: Agent) -> Message {
        Message::streaming(
            MessageId::new(id),
            ThreadId::new("t1"),
            Role::Assistant,
            Some(agent),
        )
    }

    fn finished(message: &Message) -> Message {
        let mut next = message.clone();
        next.is_streaming = false;
        next
    }

    fn id(raw: &str) -> MessageId {
        MessageId::new(raw)
    }

    #[test]
    fn activity_is_anchored_to_preceding_planner() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        store.append_message(agent_message("P1", Agent::Planner)).unwrap();
        store.append_message(agent_message("R1", Agent::Researcher)).unwrap();
        store.append_message(agent_message("C1", Agent::Coder)).unwrap();

        let session = store.research(&id("R1")).unwrap();
        assert_eq!(session.plan_message_id, id("P1"));
        assert_eq!(
            session.activity_message_ids,
            vec![id("P1"), id("R1"), id("C1")]
        );
        assert_eq!(store.research_id_for_message(&id("C1")), Some(&id("R1")));
        assert_eq!(store.ongoing_research_id(), Some(&id("R1")));
        assert_eq!(store.open_research_id(), Some(&id("R1")));
        assert_eq!(store.message_ids(), &[id("P1"), id("R1"), id("C1")]);
    }

    #[test]
    fn finished_report_ends_ongoing_but_stays_open() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        store.append_message(agent_message("P1", Agent::Planner)).unwrap();
        store.append_message(agent_message("R1", Agent::Researcher)).unwrap();
        let reporter = agent_message("X1", Agent::Reporter);
        store.append_message(reporter.clone()).unwrap();

        assert_eq!(store.report_message_id(&id("R1")), Some(&id("X1")));
        assert_eq!(store.ongoing_research_id(), Some(&id("R1")));

        store.update_message(finished(&reporter)).unwrap();

        assert_eq!(store.ongoing_research_id(), None);
        assert_eq!(store.open_research_id(), Some(&id("R1")));
        assert!(store.research(&id("R1")).is_some());
    }

    #[test]
    fn later_activity_starts_a_new_session_on_the_next_planner() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        store.append_message(agent_message("P1", Agent::Planner)).unwrap();
        store.append_message(agent_message("R1", Agent::Researcher)).unwrap();
        let first_report = agent_message("X1", Agent::Reporter);
        store.append_message(first_report.clone()).unwrap();
        store.update_message(finished(&first_report)).unwrap();

        store.append_message(agent_message("P2", Agent::Planner)).unwrap();
        store.append_message(agent_message("X2", Agent::Reporter)).unwrap();

        assert_eq!(store.research_ids(), &[id("R1"), id("X2")]);
        assert_eq!(store.plan_message_id(&id("X2")), Some(&id("P2")));
        assert_eq!(
            store.activity_message_ids(&id("X2")),
            Some([id("P2"), id("X2")].as_slice())
        );
        assert_eq!(store.report_message_id(&id("X2")), Some(&id("X2")));
        assert_eq!(store.ongoing_research_id(), Some(&id("X2")));
    }

    #[test]
    fn coordinator_and_planner_messages_are_not_grouped() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        store
            .append_message(agent_message("K1", Agent::Coordinator))
            .unwrap();
        store.append_message(agent_message("P1", Agent::Planner)).unwrap();

        assert!(store.research_ids().is_empty());
        assert_eq!(store.ongoing_research_id(), None);
    }

    #[test]
    fn missing_planner_records_message_ungrouped() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        let result = store.append_message(agent_message("R1", Agent::Researcher));

        assert!(matches!(
            result,
            Err(StoreError::MissingPlanAnchor { ref message_id, .. }) if message_id == &id("R1")
        ));
        assert!(store.contains_message(&id("R1")));
        assert!(store.research_ids().is_empty());
        assert_eq!(store.ongoing_research_id(), None);
    }

    #[test]
    fn duplicate_and_unknown_messages_are_rejected() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        store.append_message(agent_message("P1", Agent::Planner)).unwrap();

        assert!(matches!(
            store.append_message(agent_message("P1", Agent::Planner)),
            Err(StoreError::DuplicateMessage { .. })
        ));
        assert!(matches!(
            store.update_message(agent_message("nope", Agent::Planner)),
            Err(StoreError::UnknownMessage { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn updates_replace_snapshots() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        let original = store
            .append_message(Message::user(ThreadId::new("t1"), "hello"))
            .unwrap();

        let mut edited = (*original).clone();
        edited.content.push('!');
        let updated = store.update_message(edited).unwrap();

        assert!(!Arc::ptr_eq(&original, &updated));
        assert!(Arc::ptr_eq(&store.message(&original.id).unwrap(), &updated));
        assert_eq!(original.content, "hello");
    }

    #[test]
    fn tool_call_lookup_prefers_the_newest_owner() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        let mut older = agent_message("A", Agent::Researcher);
        older.tool_calls = Some(vec![ToolCall::new(
            ToolCallId::new("c1"),
            "web_search",
            json!({}),
        )]);
        let mut newer = agent_message("B", Agent::Coder);
        newer.tool_calls = older.tool_calls.clone();

        store.append_message(agent_message("P", Agent::Planner)).unwrap();
        store.append_message(older.clone()).unwrap();
        store.append_message(newer).unwrap();
        store.update_message(finished(&older)).unwrap();

        let owner = store
            .find_message_by_tool_call(&ToolCallId::new("c1"))
            .unwrap();
        assert_eq!(owner.id, id("B"));
        assert!(store.find_message_by_tool_call(&ToolCallId::new("c2")).is_none());
    }

    #[test]
    fn open_close_and_clear() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        store.append_message(agent_message("P1", Agent::Planner)).unwrap();
        store.append_message(agent_message("R1", Agent::Researcher)).unwrap();

        store.close_research();
        assert_eq!(store.open_research_id(), None);
        store.open_research(&id("R1")).unwrap();
        assert_eq!(store.open_research_id(), Some(&id("R1")));
        assert!(store.open_research(&id("P1")).is_err());

        store.clear_messages();
        assert!(store.is_empty());
        assert!(store.research_ids().is_empty());
        assert_eq!(store.ongoing_research_id(), None);
        assert_eq!(store.open_research_id(), None);
        assert_eq!(store.thread_id(), &ThreadId::new("t1"));
    }

    #[test]
    fn research_title_comes_from_the_plan() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        let mut plan = agent_message("P1", Agent::Planner);
        plan.content = r#"{"title":"Rust in production","steps":[]}"#.to_string();
        store.append_message(plan).unwrap();
        store.append_message(agent_message("R1", Agent::Researcher)).unwrap();

        assert_eq!(
            store.research_title(&id("R1")).as_deref(),
            Some("Rust in production")
        );
    }

    #[test]
    fn subscribers_observe_changes_in_order() {
        let mut store = ConversationStore::new(ThreadId::new("t1"));
        let mut changes = store.subscribe();

        store.append_message(agent_message("P1", Agent::Planner)).unwrap();
        store.append_message(agent_message("R1", Agent::Researcher)).unwrap();
        store.clear_messages();

        let mut seen = Vec::new();
        while let Ok(change) = changes.try_recv() {
            seen.push(match change {
                StoreChange::MessageAppended(message) => format!("append:{}", message.id),
                StoreChange::MessageUpdated(message) => format!("update:{}", message.id),
                StoreChange::ResearchStarted(research_id) => format!("start:{research_id}"),
                StoreChange::ResearchFinished(research_id) => format!("finish:{research_id}"),
                StoreChange::ResearchOpened(research_id) => format!("open:{research_id}"),
                StoreChange::ResearchClosed => "close".to_string(),
                StoreChange::Cleared => "clear".to_string(),
            });
        }

        assert_eq!(
            seen,
            vec!["append:P1", "start:R1", "open:R1", "append:R1", "clear"]
        );
    }
}
