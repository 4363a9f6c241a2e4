use std::collections::HashMap;

use shared::domain::{ConversationId, SenderType};
use shared::protocol::{ConversationSummary, Message};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::EngineEvent;

struct NotifyState {
    active: Option<ConversationId>,
    unread: HashMap<ConversationId, u32>,
}

/// Per-conversation unread counters for list views. The active conversation
/// never accrues unread; its reader is looking at the log already.
///
/// The engine only subscribes the active conversation, so background
/// conversations accrue through callers feeding their inserts into the
/// shared aggregator: list screens either run their own `RealtimeBridge`
/// per visible conversation or call `record_incoming` directly from a
/// list-level event feed.
pub struct NotificationAggregator {
    state: Mutex<NotifyState>,
    events: broadcast::Sender<EngineEvent>,
}

impl NotificationAggregator {
    pub fn new(events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            state: Mutex::new(NotifyState {
                active: None,
                unread: HashMap::new(),
            }),
            events,
        }
    }

    /// Seed counters from the conversation list the CRM screens loaded.
    pub async fn seed(&self, summaries: &[ConversationSummary]) {
        let mut state = self.state.lock().await;
        for summary in summaries {
            state.unread.insert(summary.id.clone(), summary.unread_count);
        }
    }

    pub async fn set_active(&self, conversation: Option<ConversationId>) {
        let mut state = self.state.lock().await;
        state.active = conversation.clone();
        if let Some(id) = conversation {
            if state.unread.remove(&id).unwrap_or(0) > 0 {
                debug!(conversation = %id, "clearing unread on activation");
                let _ = self.events.send(EngineEvent::UnreadChanged {
                    conversation_id: id,
                    unread: 0,
                });
            }
        }
    }

    pub async fn record_incoming(&self, conversation_id: &ConversationId, message: &Message) {
        if message.sender_type != SenderType::Contact {
            return;
        }
        let mut state = self.state.lock().await;
        if state.active.as_ref() == Some(conversation_id) {
            return;
        }
        let count = state.unread.entry(conversation_id.clone()).or_insert(0);
        *count += 1;
        let _ = self.events.send(EngineEvent::UnreadChanged {
            conversation_id: conversation_id.clone(),
            unread: *count,
        });
    }

    pub async fn unread(&self, conversation_id: &ConversationId) -> u32 {
        self.state
            .lock()
            .await
            .unread
            .get(conversation_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn snapshot(&self) -> HashMap<ConversationId, u32> {
        self.state.lock().await.unread.clone()
    }
}

#[cfg(test)]
#[path = "tests/notify_tests.rs"]
mod tests;
