use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shared::domain::ConversationId;
use shared::protocol::MessageDraft;
use tokio::sync::Mutex;
use tracing::debug;

/// Held keys are released this long after dispatch resolution, so
/// near-simultaneous duplicate triggers from multiple UI handlers are still
/// absorbed without permanently blocking a legitimate retry.
pub const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_secs(2);

/// Hard ceiling on how long a key can stay held. A lost release (panicked
/// task, dropped future) can then never wedge sends for that content.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(30);

/// Identifies logically-equivalent send attempts within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn for_draft(draft: &MessageDraft) -> Self {
        match &draft.file_url {
            Some(url) => Self::for_file(&draft.conversation_id, url),
            None => Self::for_text(&draft.conversation_id, &draft.content),
        }
    }

    pub fn for_text(conversation_id: &ConversationId, content: &str) -> Self {
        Self(format!("{conversation_id}:{}", normalize(content)))
    }

    pub fn for_file(conversation_id: &ConversationId, file_url: &str) -> Self {
        Self(format!("{conversation_id}:{file_url}"))
    }
}

fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keyed in-flight send registry with TTL-based release. The only piece of
/// cross-call shared mutable state in the send path, so the mutex lives
/// here and nowhere else.
pub struct InflightRegistry {
    settle_window: Duration,
    ttl: Duration,
    // Value is the hard expiry of the hold.
    held: Mutex<HashMap<DedupKey, Instant>>,
}

impl InflightRegistry {
    pub fn new(settle_window: Duration, ttl: Duration) -> Self {
        Self {
            settle_window,
            ttl,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SETTLE_WINDOW, DEFAULT_KEY_TTL)
    }

    pub fn settle_window(&self) -> Duration {
        self.settle_window
    }

    /// Claim the key. Returns false while an equivalent send is in flight.
    pub async fn try_acquire(&self, key: DedupKey) -> bool {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        held.retain(|_, expiry| *expiry > now);
        if held.contains_key(&key) {
            return false;
        }
        held.insert(key, now + self.ttl);
        true
    }

    pub async fn is_held(&self, key: &DedupKey) -> bool {
        let held = self.held.lock().await;
        matches!(held.get(key), Some(expiry) if *expiry > Instant::now())
    }

    pub async fn release_now(&self, key: &DedupKey) {
        self.held.lock().await.remove(key);
    }

    /// Release once the settle window after dispatch resolution has passed.
    pub fn release_after_settle(self: &Arc<Self>, key: DedupKey) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(registry.settle_window).await;
            if registry.held.lock().await.remove(&key).is_some() {
                debug!(?key, "released in-flight send key");
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/inflight_tests.rs"]
mod tests;
