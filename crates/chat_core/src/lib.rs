use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use shared::domain::{ConversationId, MessageId, MessageType, SenderType};
use shared::protocol::{Capabilities, Message};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

pub mod channel;
pub mod inflight;
pub mod message_store;
pub mod notify;
pub mod pagination;
pub mod realtime;
pub mod send;

pub use channel::{
    BlobStore, EventStream, MessageChannel, MissingBlobStore, MissingMessageChannel,
};
pub use inflight::{DedupKey, InflightRegistry, DEFAULT_KEY_TTL, DEFAULT_SETTLE_WINDOW};
pub use message_store::{AppendOutcome, MessageRef, MessageStore};
pub use notify::NotificationAggregator;
pub use pagination::{
    LoadOlderOutcome, PaginationController, PaginationOptions, ScrollAnchor,
};
pub use realtime::{RealtimeBridge, Subscription};
pub use send::{OutboundContent, ReplyTarget, SendCoordinator, SendError, SendOutcome};

use media::encoder::EncodedVoiceNote;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Mutations and failures surfaced to the UI. All of them are non-blocking
/// notifications; none terminates the conversation view.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    MessageAppended {
        conversation_id: ConversationId,
        message: Message,
    },
    MessageUpdated {
        conversation_id: ConversationId,
        message: Message,
    },
    MessageRemoved {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    SendFailed {
        conversation_id: ConversationId,
        message_id: MessageId,
        reason: String,
    },
    UnreadChanged {
        conversation_id: ConversationId,
        unread: u32,
    },
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub pagination: PaginationOptions,
    pub settle_window: Duration,
    pub inflight_ttl: Duration,
    /// Who outbound messages are attributed to (agent console vs. ai bot).
    pub sender_type: SenderType,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pagination: PaginationOptions::default(),
            settle_window: DEFAULT_SETTLE_WINDOW,
            inflight_ttl: DEFAULT_KEY_TTL,
            sender_type: SenderType::Agent,
        }
    }
}

struct ActiveConversation {
    conversation_id: ConversationId,
    coordinator: Arc<SendCoordinator>,
    pagination: Arc<PaginationController>,
    subscription: Subscription,
}

/// Per-conversation assembly of the core: one store, one send coordinator,
/// one pagination window, one realtime subscription at a time. Switching
/// conversations tears the previous assembly down completely.
pub struct ChatEngine {
    channel: Arc<dyn MessageChannel>,
    blobs: Arc<dyn BlobStore>,
    notify: Arc<NotificationAggregator>,
    options: EngineOptions,
    active: Mutex<Option<ActiveConversation>>,
    events: broadcast::Sender<EngineEvent>,
}

impl ChatEngine {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        blobs: Arc<dyn BlobStore>,
        options: EngineOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let notify = Arc::new(NotificationAggregator::new(events.clone()));
        Arc::new(Self {
            channel,
            blobs,
            notify,
            options,
            active: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn notifications(&self) -> Arc<NotificationAggregator> {
        Arc::clone(&self.notify)
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.conversation_id.clone())
    }

    /// Open a conversation: tear down the previous one, load the most
    /// recent window (scrolled to the bottom, no anchor to preserve), and
    /// start the realtime subscription.
    pub async fn open_conversation(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        capabilities: Capabilities,
    ) -> Result<()> {
        self.close_conversation().await;

        let store = Arc::new(Mutex::new(MessageStore::new()));
        let page = self
            .channel
            .fetch_page(&conversation_id, None, self.options.pagination.page_size)
            .await?;
        let loaded = page.messages.len();
        {
            let mut guard = store.lock().await;
            for message in page.messages {
                guard.append(message);
            }
        }

        let pagination = PaginationController::new(
            Arc::clone(&self.channel),
            Arc::clone(&store),
            conversation_id.clone(),
            self.options.pagination,
        );
        pagination
            .reset(loaded, page.next_cursor, page.has_more)
            .await;

        let inflight = Arc::new(InflightRegistry::new(
            self.options.settle_window,
            self.options.inflight_ttl,
        ));
        let coordinator = Arc::new(SendCoordinator::new(
            Arc::clone(&self.channel),
            Arc::clone(&self.blobs),
            Arc::clone(&store),
            inflight,
            self.events.clone(),
            conversation_id.clone(),
            capabilities,
            self.options.sender_type,
        ));

        let bridge = RealtimeBridge::new(
            conversation_id.clone(),
            store,
            Arc::clone(&self.notify),
            self.events.clone(),
        );
        let subscription = bridge.open(self.channel.as_ref()).await?;

        self.notify.set_active(Some(conversation_id.clone())).await;
        *self.active.lock().await = Some(ActiveConversation {
            conversation_id: conversation_id.clone(),
            coordinator,
            pagination,
            subscription,
        });
        info!(conversation = %conversation_id, loaded, "conversation opened");
        Ok(())
    }

    /// Tear down the active conversation: subscription closed, log dropped.
    pub async fn close_conversation(&self) {
        if let Some(active) = self.active.lock().await.take() {
            active.subscription.close();
            self.notify.set_active(None).await;
            info!(conversation = %active.conversation_id, "conversation closed");
        }
    }

    pub async fn send_text(
        &self,
        body: impl Into<String>,
        reply_to: Option<ReplyTarget>,
    ) -> Result<SendOutcome, SendError> {
        self.coordinator()
            .await?
            .send(OutboundContent::Text { body: body.into() }, reply_to)
            .await
    }

    pub async fn send_media(
        &self,
        message_type: MessageType,
        file_url: String,
        file_name: Option<String>,
        caption: String,
    ) -> Result<SendOutcome, SendError> {
        self.coordinator()
            .await?
            .send(
                OutboundContent::Media {
                    message_type,
                    file_url,
                    file_name,
                    caption,
                },
                None,
            )
            .await
    }

    /// Dispatch a user-confirmed voice-note preview.
    pub async fn send_voice_note(
        &self,
        note: EncodedVoiceNote,
        file_name: &str,
    ) -> Result<SendOutcome, SendError> {
        self.coordinator()
            .await?
            .send_voice_note(note, file_name)
            .await
    }

    pub async fn retry_message(&self, message_id: &MessageId) -> Result<SendOutcome, SendError> {
        self.coordinator().await?.retry(message_id).await
    }

    pub async fn delete_message(&self, message_id: &MessageId) -> Result<(), SendError> {
        self.coordinator().await?.delete(message_id).await
    }

    /// Extend the window backward. A result that resolves after the
    /// conversation switched is ignored, guarded by id comparison rather
    /// than cancellation.
    pub async fn load_older(&self) -> Result<LoadOlderOutcome> {
        let (conversation_id, pagination) = {
            let guard = self.active.lock().await;
            let active = guard
                .as_ref()
                .ok_or_else(|| anyhow!("no conversation is open"))?;
            (
                active.conversation_id.clone(),
                Arc::clone(&active.pagination),
            )
        };

        let outcome = match pagination.load_older().await {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = self
                    .events
                    .send(EngineEvent::Error(format!("history load failed: {err}")));
                return Err(err);
            }
        };

        let still_active = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|active| active.conversation_id == conversation_id)
            .unwrap_or(false);
        if !still_active {
            debug!(conversation = %conversation_id, "dropping pagination result after switch");
            return Ok(LoadOlderOutcome::Stale);
        }
        Ok(outcome)
    }

    /// Rendered suffix of the active conversation's log.
    pub async fn visible_messages(&self) -> Vec<Message> {
        let pagination = {
            let guard = self.active.lock().await;
            guard.as_ref().map(|active| Arc::clone(&active.pagination))
        };
        match pagination {
            Some(pagination) => pagination.visible_messages().await,
            None => Vec::new(),
        }
    }

    pub async fn unread_counts(&self) -> HashMap<ConversationId, u32> {
        self.notify.snapshot().await
    }

    async fn coordinator(&self) -> Result<Arc<SendCoordinator>, SendError> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| Arc::clone(&active.coordinator))
            .ok_or(SendError::NoConversation)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
