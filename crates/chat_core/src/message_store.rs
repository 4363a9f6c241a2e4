use shared::domain::{ExternalMessageId, MessageId};
use shared::protocol::{Message, MessagePatch};
use tracing::debug;

/// Lookup keys for the three-tier match: local id, then server id (including
/// an optimistic entry whose local id was echoed back as the external id),
/// then provider-assigned correlation metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageRef<'a> {
    pub id: Option<&'a MessageId>,
    pub external_id: Option<&'a ExternalMessageId>,
    pub provider_message_id: Option<&'a str>,
}

impl<'a> MessageRef<'a> {
    pub fn of(message: &'a Message) -> Self {
        Self {
            id: Some(&message.id),
            external_id: message.external_id.as_ref(),
            provider_message_id: message.provider_message_id.as_deref(),
        }
    }

    pub fn by_id(id: &'a MessageId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_external(external_id: &'a ExternalMessageId) -> Self {
        Self {
            external_id: Some(external_id),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// An entry with a matching key already existed and was patched instead.
    Merged,
}

/// Ordered, deduplicated per-conversation message log; the single source of
/// truth for the conversation view. Ordering is `created_at` ascending with
/// a stable tie-break on `id`.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.entries
    }

    pub fn get(&self, reference: &MessageRef<'_>) -> Option<&Message> {
        self.find(reference).map(|index| &self.entries[index])
    }

    /// Idempotent insert: a message matching an existing entry by any lookup
    /// tier is merged into it, never duplicated.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if let Some(index) = self.find(&MessageRef::of(&message)) {
            let patch = MessagePatch::from_message(&message);
            self.merge_at(index, patch);
            return AppendOutcome::Merged;
        }
        let at = self.insertion_point(&message);
        self.entries.insert(at, message);
        AppendOutcome::Inserted
    }

    /// Patch an existing entry. Returns false on a lookup miss; the caller
    /// decides whether that is a reconciliation miss worth buffering.
    pub fn update(&mut self, reference: &MessageRef<'_>, patch: MessagePatch) -> bool {
        match self.find(reference) {
            Some(index) => {
                self.merge_at(index, patch);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, reference: &MessageRef<'_>) -> Option<Message> {
        self.find(reference).map(|index| self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn find(&self, reference: &MessageRef<'_>) -> Option<usize> {
        if let Some(id) = reference.id {
            if let Some(index) = self.entries.iter().position(|m| &m.id == id) {
                return Some(index);
            }
        }
        if let Some(external) = reference.external_id {
            if let Some(index) = self.entries.iter().position(|m| {
                m.external_id.as_ref() == Some(external) || m.id.as_str() == external.as_str()
            }) {
                return Some(index);
            }
        }
        if let Some(provider) = reference.provider_message_id {
            if let Some(index) = self
                .entries
                .iter()
                .position(|m| m.provider_message_id.as_deref() == Some(provider))
            {
                return Some(index);
            }
        }
        None
    }

    fn insertion_point(&self, message: &Message) -> usize {
        self.entries.partition_point(|existing| {
            (existing.created_at, existing.id.as_str())
                <= (message.created_at, message.id.as_str())
        })
    }

    fn merge_at(&mut self, index: usize, patch: MessagePatch) {
        let mut needs_resort = false;
        {
            let entry = &mut self.entries[index];
            if let Some(external) = patch.external_id {
                // First confirmation wins; a second external id for the same
                // entry would break uniqueness.
                if entry.external_id.is_none() {
                    entry.external_id = Some(external);
                }
            }
            if let Some(status) = patch.status {
                if entry.status.can_transition_to(status) {
                    entry.status = status;
                } else if entry.status != status {
                    debug!(
                        id = %entry.id,
                        from = ?entry.status,
                        to = ?status,
                        "ignoring status regression"
                    );
                }
            }
            if let Some(content) = patch.content {
                entry.content = content;
            }
            if let Some(file_url) = patch.file_url {
                entry.file_url = Some(file_url);
            }
            if let Some(file_name) = patch.file_name {
                entry.file_name = Some(file_name);
            }
            if let Some(provider) = patch.provider_message_id {
                entry.provider_message_id = Some(provider);
            }
            if let Some(created_at) = patch.created_at {
                if entry.created_at != created_at {
                    // Server timestamp replaces the optimistic one.
                    entry.created_at = created_at;
                    needs_resort = true;
                }
            }
        }
        if needs_resort {
            let entry = self.entries.remove(index);
            let at = self.insertion_point(&entry);
            self.entries.insert(at, entry);
        }
    }
}

#[cfg(test)]
#[path = "tests/message_store_tests.rs"]
mod tests;
