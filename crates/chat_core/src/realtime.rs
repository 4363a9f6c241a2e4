use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use shared::domain::{ConversationId, ExternalMessageId, MessageId, SenderType};
use shared::protocol::{ConversationEvent, Message, MessagePatch};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::MessageChannel;
use crate::message_store::{AppendOutcome, MessageRef, MessageStore};
use crate::notify::NotificationAggregator;
use crate::EngineEvent;

/// Updates arriving ahead of their insert are buffered up to this many
/// entries; beyond that they are dropped as reconciliation misses.
const PENDING_UPDATE_CAP: usize = 64;

/// Translates the channel's event stream into store mutations, reconciling
/// server-confirmed messages against optimistic entries.
pub struct RealtimeBridge {
    conversation_id: ConversationId,
    store: Arc<Mutex<MessageStore>>,
    notify: Arc<NotificationAggregator>,
    events: broadcast::Sender<EngineEvent>,
    pending_updates: Mutex<HashMap<ExternalMessageId, MessagePatch>>,
}

impl RealtimeBridge {
    pub fn new(
        conversation_id: ConversationId,
        store: Arc<Mutex<MessageStore>>,
        notify: Arc<NotificationAggregator>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conversation_id,
            store,
            notify,
            events,
            pending_updates: Mutex::new(HashMap::new()),
        })
    }

    /// Open the per-conversation subscription and pump it until closed.
    pub async fn open(
        self: &Arc<Self>,
        channel: &dyn MessageChannel,
    ) -> anyhow::Result<Subscription> {
        let mut stream = channel.subscribe(&self.conversation_id).await?;
        let bridge = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                bridge.apply(event).await;
            }
            debug!(conversation = %bridge.conversation_id, "realtime stream ended");
        });
        info!(conversation = %self.conversation_id, "realtime subscription opened");
        Ok(Subscription {
            conversation_id: self.conversation_id.clone(),
            task,
        })
    }

    /// Idempotent application of a single validated event.
    pub async fn apply(&self, event: ConversationEvent) {
        match event {
            ConversationEvent::Insert { message } => self.apply_insert(message).await,
            ConversationEvent::Update { message } => self.apply_update(message).await,
            ConversationEvent::Delete {
                message_id,
                external_id,
            } => self.apply_delete(message_id, external_id).await,
        }
    }

    async fn apply_insert(&self, message: Message) {
        if message.conversation_id != self.conversation_id {
            debug!(
                conversation = %self.conversation_id,
                other = %message.conversation_id,
                "dropping insert for foreign conversation"
            );
            return;
        }

        let (outcome, fresh) = {
            let mut store = self.store.lock().await;
            let outcome = store.append(message.clone());
            // Replay any update that raced ahead of this insert.
            if let Some(external) = message.external_id.as_ref() {
                let buffered = self.pending_updates.lock().await.remove(external);
                if let Some(patch) = buffered {
                    debug!(external = %external, "replaying buffered update");
                    store.update(&MessageRef::by_external(external), patch);
                }
            }
            (outcome, store.get(&MessageRef::of(&message)).cloned())
        };

        let Some(fresh) = fresh else { return };
        match outcome {
            AppendOutcome::Inserted => {
                if fresh.sender_type == SenderType::Contact {
                    self.notify
                        .record_incoming(&self.conversation_id, &fresh)
                        .await;
                }
                let _ = self.events.send(EngineEvent::MessageAppended {
                    conversation_id: self.conversation_id.clone(),
                    message: fresh,
                });
            }
            // Either a duplicate delivery or the confirmation of an
            // optimistic entry; both surface as an update.
            AppendOutcome::Merged => {
                let _ = self.events.send(EngineEvent::MessageUpdated {
                    conversation_id: self.conversation_id.clone(),
                    message: fresh,
                });
            }
        }
    }

    async fn apply_update(&self, message: Message) {
        let patch = MessagePatch::from_message(&message);
        let fresh = {
            let mut store = self.store.lock().await;
            let reference = MessageRef::of(&message);
            if store.update(&reference, patch.clone()) {
                store.get(&reference).cloned()
            } else {
                None
            }
        };

        match fresh {
            Some(message) => {
                let _ = self.events.send(EngineEvent::MessageUpdated {
                    conversation_id: self.conversation_id.clone(),
                    message,
                });
            }
            None => {
                // Out-of-order delivery: hold the patch until the insert
                // shows up, within a bounded buffer.
                if let Some(external) = message.external_id.clone() {
                    let mut pending = self.pending_updates.lock().await;
                    if pending.len() < PENDING_UPDATE_CAP {
                        debug!(external = %external, "buffering update for unknown message");
                        pending.insert(external, patch);
                        return;
                    }
                }
                warn!(
                    conversation = %self.conversation_id,
                    id = %message.id,
                    "reconciliation miss: update for unknown message dropped"
                );
            }
        }
    }

    async fn apply_delete(
        &self,
        message_id: Option<MessageId>,
        external_id: Option<ExternalMessageId>,
    ) {
        let reference = MessageRef {
            id: message_id.as_ref(),
            external_id: external_id.as_ref(),
            provider_message_id: None,
        };
        let removed = self.store.lock().await.remove(&reference);
        match removed {
            Some(message) => {
                let _ = self.events.send(EngineEvent::MessageRemoved {
                    conversation_id: self.conversation_id.clone(),
                    message_id: message.id,
                });
            }
            None => {
                debug!(
                    conversation = %self.conversation_id,
                    "reconciliation miss: delete for unknown message ignored"
                );
            }
        }
    }
}

/// Handle to an open realtime subscription; closing (or dropping) it stops
/// event delivery for that conversation.
pub struct Subscription {
    conversation_id: ConversationId,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
