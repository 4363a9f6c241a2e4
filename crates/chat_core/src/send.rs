use std::sync::Arc;

use chrono::Utc;
use media::encoder::EncodedVoiceNote;
use shared::domain::{ConversationId, MessageId, MessageStatus, MessageType, SenderType};
use shared::protocol::{
    Capabilities, Message, MessageDraft, MessagePatch, QuotedMessageSnapshot,
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::channel::{BlobStore, MessageChannel};
use crate::inflight::{DedupKey, InflightRegistry};
use crate::message_store::{MessageRef, MessageStore};
use crate::EngineEvent;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("sending is not permitted in this conversation")]
    PermissionDenied,
    #[error("replying is not permitted in this conversation")]
    ReplyNotPermitted,
    #[error("no conversation is open")]
    NoConversation,
    #[error("message {0} is not present in the log")]
    UnknownMessage(MessageId),
    #[error("message {0} is not in a retriable state")]
    NotRetriable(MessageId),
    #[error("dispatch failed: {0}")]
    Dispatch(String),
    #[error("upload failed: {0}")]
    Upload(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Dispatched(MessageId),
    /// An equivalent send was already in flight; the call was a no-op.
    DuplicateSuppressed,
}

#[derive(Debug, Clone)]
pub enum OutboundContent {
    Text {
        body: String,
    },
    Media {
        message_type: MessageType,
        file_url: String,
        file_name: Option<String>,
        caption: String,
    },
}

/// Reply target named by the composer. The snapshot fallback covers quoting
/// a message that is no longer inside the loaded window.
#[derive(Debug, Clone)]
pub struct ReplyTarget {
    pub message_id: MessageId,
    pub fallback_snapshot: Option<QuotedMessageSnapshot>,
}

impl ReplyTarget {
    pub fn to(message_id: MessageId) -> Self {
        Self {
            message_id,
            fallback_snapshot: None,
        }
    }
}

/// Owns the optimistic-send lifecycle: exactly one network dispatch per
/// logical message, immediate local feedback, failures kept in the log for
/// manual retry.
pub struct SendCoordinator {
    channel: Arc<dyn MessageChannel>,
    blobs: Arc<dyn BlobStore>,
    store: Arc<Mutex<MessageStore>>,
    inflight: Arc<InflightRegistry>,
    events: broadcast::Sender<EngineEvent>,
    conversation_id: ConversationId,
    capabilities: Capabilities,
    sender_type: SenderType,
}

impl SendCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<Mutex<MessageStore>>,
        inflight: Arc<InflightRegistry>,
        events: broadcast::Sender<EngineEvent>,
        conversation_id: ConversationId,
        capabilities: Capabilities,
        sender_type: SenderType,
    ) -> Self {
        Self {
            channel,
            blobs,
            store,
            inflight,
            events,
            conversation_id,
            capabilities,
            sender_type,
        }
    }

    pub async fn send(
        &self,
        content: OutboundContent,
        reply_to: Option<ReplyTarget>,
    ) -> Result<SendOutcome, SendError> {
        if !self.capabilities.can_send {
            return Err(SendError::PermissionDenied);
        }
        if reply_to.is_some() && !self.capabilities.can_reply {
            return Err(SendError::ReplyNotPermitted);
        }

        let draft = self.build_draft(content, reply_to).await;
        let key = DedupKey::for_draft(&draft);
        if !self.inflight.try_acquire(key.clone()).await {
            debug!(
                conversation = %self.conversation_id,
                client_id = %draft.client_id,
                "suppressing duplicate send"
            );
            return Ok(SendOutcome::DuplicateSuppressed);
        }

        // Optimistic entry lands before any network traffic.
        let message = self.optimistic_message(&draft);
        self.store.lock().await.append(message.clone());
        let _ = self.events.send(EngineEvent::MessageAppended {
            conversation_id: self.conversation_id.clone(),
            message,
        });

        let result = self.dispatch(&draft).await;
        self.inflight.release_after_settle(key);
        result.map(|_| SendOutcome::Dispatched(draft.client_id))
    }

    /// Explicit `failed -> sending` retry, re-dispatching under the same
    /// local id so the channel can deduplicate on its side too.
    pub async fn retry(&self, message_id: &MessageId) -> Result<SendOutcome, SendError> {
        let draft = {
            let store = self.store.lock().await;
            let entry = store
                .get(&MessageRef::by_id(message_id))
                .ok_or_else(|| SendError::UnknownMessage(message_id.clone()))?;
            if entry.status != MessageStatus::Failed {
                return Err(SendError::NotRetriable(message_id.clone()));
            }
            draft_from_entry(entry)
        };

        let key = DedupKey::for_draft(&draft);
        if !self.inflight.try_acquire(key.clone()).await {
            return Ok(SendOutcome::DuplicateSuppressed);
        }

        self.patch_and_emit(message_id, MessagePatch::status(MessageStatus::Sending))
            .await;
        info!(conversation = %self.conversation_id, id = %message_id, "retrying failed send");

        let result = self.dispatch(&draft).await;
        self.inflight.release_after_settle(key);
        result.map(|_| SendOutcome::Dispatched(message_id.clone()))
    }

    /// Remove the entry locally and propagate the deletion to the channel.
    pub async fn delete(&self, message_id: &MessageId) -> Result<(), SendError> {
        let removed = self
            .store
            .lock()
            .await
            .remove(&MessageRef::by_id(message_id))
            .ok_or_else(|| SendError::UnknownMessage(message_id.clone()))?;
        let _ = self.events.send(EngineEvent::MessageRemoved {
            conversation_id: self.conversation_id.clone(),
            message_id: removed.id.clone(),
        });

        self.channel
            .delete_message(
                &self.conversation_id,
                &removed.id,
                removed.external_id.as_ref(),
            )
            .await
            .map_err(|err| {
                warn!(conversation = %self.conversation_id, error = %err, "delete propagation failed");
                SendError::Dispatch(err.to_string())
            })
    }

    /// Upload a confirmed voice-note artifact, then run the normal
    /// optimistic media path with the resulting URL.
    pub async fn send_voice_note(
        &self,
        note: EncodedVoiceNote,
        file_name: &str,
    ) -> Result<SendOutcome, SendError> {
        if !self.capabilities.can_send {
            return Err(SendError::PermissionDenied);
        }
        let url = self
            .blobs
            .upload(note.bytes, note.mime_type, file_name)
            .await
            .map_err(|err| SendError::Upload(err.to_string()))?;
        self.send(
            OutboundContent::Media {
                message_type: MessageType::Audio,
                file_url: url,
                file_name: Some(file_name.to_string()),
                caption: String::new(),
            },
            None,
        )
        .await
    }

    async fn dispatch(&self, draft: &MessageDraft) -> Result<(), SendError> {
        match self.channel.dispatch(draft).await {
            Ok(ack) => {
                // Dispatch success only implies `sent`; delivered/read are
                // driven by the realtime stream.
                self.patch_and_emit(
                    &draft.client_id,
                    MessagePatch {
                        external_id: Some(ack.external_id),
                        status: Some(MessageStatus::Sent),
                        ..MessagePatch::default()
                    },
                )
                .await;
                Ok(())
            }
            Err(err) => {
                warn!(
                    conversation = %self.conversation_id,
                    client_id = %draft.client_id,
                    error = %err,
                    "dispatch failed; keeping entry for manual retry"
                );
                self.patch_and_emit(&draft.client_id, MessagePatch::status(MessageStatus::Failed))
                    .await;
                let _ = self.events.send(EngineEvent::SendFailed {
                    conversation_id: self.conversation_id.clone(),
                    message_id: draft.client_id.clone(),
                    reason: err.to_string(),
                });
                Err(SendError::Dispatch(err.to_string()))
            }
        }
    }

    async fn patch_and_emit(&self, message_id: &MessageId, patch: MessagePatch) {
        let fresh = {
            let mut store = self.store.lock().await;
            let reference = MessageRef::by_id(message_id);
            if store.update(&reference, patch) {
                store.get(&reference).cloned()
            } else {
                None
            }
        };
        if let Some(message) = fresh {
            let _ = self.events.send(EngineEvent::MessageUpdated {
                conversation_id: self.conversation_id.clone(),
                message,
            });
        }
    }

    async fn build_draft(
        &self,
        content: OutboundContent,
        reply_to: Option<ReplyTarget>,
    ) -> MessageDraft {
        // The quoted snapshot is computed at send time, never re-resolved,
        // so later edits of the original do not rewrite the quote preview.
        let (reply_to_message_id, quoted) = match reply_to {
            Some(target) => {
                let resolved = {
                    let store = self.store.lock().await;
                    store
                        .get(&MessageRef::by_id(&target.message_id))
                        .map(QuotedMessageSnapshot::of)
                };
                (
                    Some(target.message_id),
                    resolved.or(target.fallback_snapshot),
                )
            }
            None => (None, None),
        };

        let (message_type, body, file_url, file_name) = match content {
            OutboundContent::Text { body } => (MessageType::Text, body, None, None),
            OutboundContent::Media {
                message_type,
                file_url,
                file_name,
                caption,
            } => (message_type, caption, Some(file_url), file_name),
        };

        MessageDraft {
            client_id: MessageId::generate(),
            conversation_id: self.conversation_id.clone(),
            message_type,
            content: body,
            file_url,
            file_name,
            reply_to_message_id,
            quoted,
        }
    }

    fn optimistic_message(&self, draft: &MessageDraft) -> Message {
        Message {
            id: draft.client_id.clone(),
            external_id: None,
            conversation_id: draft.conversation_id.clone(),
            sender_type: self.sender_type,
            message_type: draft.message_type,
            content: draft.content.clone(),
            file_url: draft.file_url.clone(),
            file_name: draft.file_name.clone(),
            reply_to_message_id: draft.reply_to_message_id.clone(),
            quoted: draft.quoted.clone(),
            status: MessageStatus::Sending,
            created_at: Utc::now(),
            provider_message_id: None,
        }
    }
}

fn draft_from_entry(entry: &Message) -> MessageDraft {
    MessageDraft {
        client_id: entry.id.clone(),
        conversation_id: entry.conversation_id.clone(),
        message_type: entry.message_type,
        content: entry.content.clone(),
        file_url: entry.file_url.clone(),
        file_name: entry.file_name.clone(),
        reply_to_message_id: entry.reply_to_message_id.clone(),
        quoted: entry.quoted.clone(),
    }
}

#[cfg(test)]
#[path = "tests/send_tests.rs"]
mod tests;
