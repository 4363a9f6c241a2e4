use std::pin::Pin;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::Stream;
use shared::domain::{ConversationId, ExternalMessageId, MessageId};
use shared::protocol::{ConversationEvent, DispatchAck, MessageDraft, MessagePage, PageCursor};

pub type EventStream = Pin<Box<dyn Stream<Item = ConversationEvent> + Send>>;

/// The realtime/persistence backend the core consumes. Storage, push
/// delivery, and the wire protocol all live behind this seam.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<EventStream>;

    async fn dispatch(&self, draft: &MessageDraft) -> Result<DispatchAck>;

    async fn fetch_page(
        &self,
        conversation_id: &ConversationId,
        before: Option<&PageCursor>,
        limit: u32,
    ) -> Result<MessagePage>;

    async fn delete_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        external_id: Option<&ExternalMessageId>,
    ) -> Result<()>;
}

pub struct MissingMessageChannel;

#[async_trait]
impl MessageChannel for MissingMessageChannel {
    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<EventStream> {
        Err(anyhow!(
            "message channel is unavailable for conversation {conversation_id}"
        ))
    }

    async fn dispatch(&self, _draft: &MessageDraft) -> Result<DispatchAck> {
        Err(anyhow!("message channel is unavailable"))
    }

    async fn fetch_page(
        &self,
        conversation_id: &ConversationId,
        _before: Option<&PageCursor>,
        _limit: u32,
    ) -> Result<MessagePage> {
        Err(anyhow!(
            "message channel is unavailable for conversation {conversation_id}"
        ))
    }

    async fn delete_message(
        &self,
        _conversation_id: &ConversationId,
        message_id: &MessageId,
        _external_id: Option<&ExternalMessageId>,
    ) -> Result<()> {
        Err(anyhow!(
            "message channel is unavailable; cannot delete {message_id}"
        ))
    }
}

/// Upload-only blob storage for media and voice notes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload bytes and return a fetchable URL.
    async fn upload(&self, bytes: Vec<u8>, content_type: &str, file_name: &str) -> Result<String>;
}

pub struct MissingBlobStore;

#[async_trait]
impl BlobStore for MissingBlobStore {
    async fn upload(
        &self,
        _bytes: Vec<u8>,
        _content_type: &str,
        file_name: &str,
    ) -> Result<String> {
        Err(anyhow!("blob store is unavailable; cannot store {file_name}"))
    }
}
