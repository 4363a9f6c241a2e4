use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(ExternalMessageId);
id_newtype!(ConversationId);
id_newtype!(ContactId);
id_newtype!(UserId);

impl MessageId {
    /// Fresh client-side id. Doubles as the idempotency token the channel
    /// echoes back once the message is confirmed.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Contact,
    Agent,
    System,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl MessageType {
    pub fn is_media(self) -> bool {
        !matches!(self, MessageType::Text)
    }
}

/// Delivery status of an outbound message. Only meaningful for messages the
/// client (agent/system/ai) originated; contact messages arrive fully formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            // Never reached by rank comparison; handled explicitly below.
            MessageStatus::Failed => u8::MAX,
        }
    }

    /// Forward-monotonic, with `sending -> failed` and the explicit
    /// `failed -> sending` retry edge as the only exceptions.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        match (self, next) {
            (a, b) if a == b => false,
            (MessageStatus::Sending, MessageStatus::Failed) => true,
            (MessageStatus::Failed, MessageStatus::Sending) => true,
            (MessageStatus::Failed, _) | (_, MessageStatus::Failed) => false,
            (a, b) => b.rank() > a.rank(),
        }
    }
}
