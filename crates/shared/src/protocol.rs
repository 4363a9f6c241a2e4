use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ContactId, ConversationId, ExternalMessageId, MessageId, MessageStatus, MessageType,
    SenderType, UserId,
};

/// Denormalized copy of a quoted message, captured at send time so the quote
/// preview survives edits and deletions of the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedMessageSnapshot {
    pub content: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub sender_type: SenderType,
}

impl QuotedMessageSnapshot {
    pub fn of(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            message_type: message.message_type,
            file_url: message.file_url.clone(),
            sender_type: message.sender_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Locally generated at creation time; idempotency key until confirmed.
    pub id: MessageId,
    /// Canonical realtime join key once the channel has confirmed the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<ExternalMessageId>,
    pub conversation_id: ConversationId,
    pub sender_type: SenderType,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted: Option<QuotedMessageSnapshot>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// Provider-assigned correlation id carried in metadata; third lookup
    /// tier when neither local nor external id matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

/// Partial update applied through the store's merge path. `None` leaves the
/// field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub external_id: Option<ExternalMessageId>,
    pub status: Option<MessageStatus>,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
}

impl MessagePatch {
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch carrying everything a confirmed counterpart may correct on an
    /// optimistic entry: server timestamp, ids, status, and file fields.
    pub fn from_message(message: &Message) -> Self {
        Self {
            external_id: message.external_id.clone(),
            status: Some(message.status),
            content: Some(message.content.clone()),
            file_url: message.file_url.clone(),
            file_name: message.file_name.clone(),
            created_at: Some(message.created_at),
            provider_message_id: message.provider_message_id.clone(),
        }
    }
}

/// Outbound shape handed to the channel. `client_id` is the correlation
/// token the backend is expected to echo back as the external id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub client_id: MessageId,
    pub conversation_id: ConversationId,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted: Option<QuotedMessageSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAck {
    pub external_id: ExternalMessageId,
}

/// Realtime payloads, validated at the boundary before they reach the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ConversationEvent {
    Insert {
        message: Message,
    },
    Update {
        message: Message,
    },
    Delete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_id: Option<ExternalMessageId>,
    },
}

/// Opaque history cursor; only the channel interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<PageCursor>,
    pub has_more: bool,
}

/// Read-mostly conversation context owned by the CRM screens, not the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub contact_id: ContactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_user_id: Option<UserId>,
    pub agent_active: bool,
    pub unread_count: u32,
    pub last_activity_at: DateTime<Utc>,
}

/// Role-gated permissions, consumed as plain flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_send: bool,
    pub can_reply: bool,
    pub can_edit: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            can_send: true,
            can_reply: true,
            can_edit: true,
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
