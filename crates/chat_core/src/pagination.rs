use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use shared::domain::ConversationId;
use shared::protocol::{Message, PageCursor};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::channel::MessageChannel;
use crate::message_store::{AppendOutcome, MessageStore};

pub const DEFAULT_INITIAL_WINDOW: usize = 30;
pub const DEFAULT_LOAD_STEP: usize = 30;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Force-clears a wedged loading flag if the follow-up never arrives.
pub const DEFAULT_LOADING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct PaginationOptions {
    pub initial_window: usize,
    pub load_step: usize,
    pub page_size: u32,
    pub loading_timeout: Duration,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            initial_window: DEFAULT_INITIAL_WINDOW,
            load_step: DEFAULT_LOAD_STEP,
            page_size: DEFAULT_PAGE_SIZE,
            loading_timeout: DEFAULT_LOADING_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOlderOutcome {
    /// Already-fetched entries were revealed; no network traffic.
    Revealed { newly_visible: usize },
    /// A page was fetched and merged into the store.
    Fetched { merged: usize, newly_visible: usize },
    /// Full history is loaded and visible.
    AtStart,
    /// Another load is in flight.
    AlreadyLoading,
    /// The result resolved after it stopped mattering and was dropped.
    Stale,
}

struct PageState {
    visible_count: usize,
    has_more_older: bool,
    next_cursor: Option<PageCursor>,
    loading: bool,
    generation: u64,
}

/// Bounded window over the message log, extended backward on demand without
/// disturbing the viewport.
pub struct PaginationController {
    channel: Arc<dyn MessageChannel>,
    store: Arc<Mutex<MessageStore>>,
    conversation_id: ConversationId,
    options: PaginationOptions,
    state: Mutex<PageState>,
}

impl PaginationController {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        store: Arc<Mutex<MessageStore>>,
        conversation_id: ConversationId,
        options: PaginationOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            store,
            conversation_id,
            options,
            state: Mutex::new(PageState {
                visible_count: options.initial_window,
                has_more_older: false,
                next_cursor: None,
                loading: false,
                generation: 0,
            }),
        })
    }

    /// Seed from the initial page: a small recent window, scrolled to the
    /// bottom, with no anchor to preserve.
    pub async fn reset(
        &self,
        loaded: usize,
        next_cursor: Option<PageCursor>,
        has_more_older: bool,
    ) {
        let mut state = self.state.lock().await;
        state.visible_count = self.options.initial_window.min(loaded.max(1));
        state.next_cursor = next_cursor;
        state.has_more_older = has_more_older;
        state.loading = false;
        state.generation += 1;
    }

    pub async fn visible_count(&self) -> usize {
        self.state.lock().await.visible_count
    }

    pub async fn has_more_older(&self) -> bool {
        self.state.lock().await.has_more_older
    }

    pub async fn is_loading(&self) -> bool {
        self.state.lock().await.loading
    }

    /// Rendered suffix of the log.
    pub async fn visible_messages(&self) -> Vec<Message> {
        let visible = self.state.lock().await.visible_count;
        let store = self.store.lock().await;
        let snapshot = store.snapshot();
        let start = snapshot.len().saturating_sub(visible);
        snapshot[start..].to_vec()
    }

    /// Triggered when the viewport nears its top edge.
    pub async fn load_older(self: &Arc<Self>) -> Result<LoadOlderOutcome> {
        let (cursor, generation) = {
            let mut state = self.state.lock().await;
            if state.loading {
                return Ok(LoadOlderOutcome::AlreadyLoading);
            }
            let total = self.store.lock().await.len();
            if total > state.visible_count {
                // Older entries are already in memory; just widen the window.
                let newly_visible = (total - state.visible_count).min(self.options.load_step);
                state.visible_count += newly_visible;
                return Ok(LoadOlderOutcome::Revealed { newly_visible });
            }
            if !state.has_more_older {
                return Ok(LoadOlderOutcome::AtStart);
            }
            state.loading = true;
            state.generation += 1;
            (state.next_cursor.clone(), state.generation)
        };

        self.spawn_loading_guard(generation);

        let fetched = self
            .channel
            .fetch_page(&self.conversation_id, cursor.as_ref(), self.options.page_size)
            .await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(conversation = %self.conversation_id, "dropping superseded page fetch");
            return Ok(LoadOlderOutcome::Stale);
        }
        state.loading = false;

        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                warn!(conversation = %self.conversation_id, error = %err, "older-page fetch failed");
                return Err(err);
            }
        };

        let merged = {
            let mut store = self.store.lock().await;
            page.messages
                .into_iter()
                .filter(|m| m.conversation_id == self.conversation_id)
                .map(|m| store.append(m))
                .filter(|outcome| *outcome == AppendOutcome::Inserted)
                .count()
        };
        state.next_cursor = page.next_cursor;
        state.has_more_older = page.has_more;
        let newly_visible = merged.min(self.options.load_step);
        state.visible_count += newly_visible;

        debug!(
            conversation = %self.conversation_id,
            merged,
            newly_visible,
            has_more = state.has_more_older,
            "older page merged"
        );
        Ok(LoadOlderOutcome::Fetched {
            merged,
            newly_visible,
        })
    }

    fn spawn_loading_guard(self: &Arc<Self>, generation: u64) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(controller.options.loading_timeout).await;
            let mut state = controller.state.lock().await;
            if state.loading && state.generation == generation {
                warn!(
                    conversation = %controller.conversation_id,
                    "loading flag timed out; force-clearing"
                );
                state.loading = false;
                state.generation += 1;
            }
        });
    }
}

/// Viewport anchor captured immediately before prepended content changes the
/// content height. Pure math; no rendering backend involved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    offset: f64,
    height: f64,
}

impl ScrollAnchor {
    pub fn capture(offset: f64, height: f64) -> Self {
        Self { offset, height }
    }

    /// First pass: apply the height delta in the same frame as the content
    /// change.
    pub fn adjusted_offset(&self, new_height: f64) -> f64 {
        self.offset + (new_height - self.height)
    }

    /// Second pass on the next settle tick: height changes and scroll
    /// adjustment are not atomic everywhere, so correct for layout that
    /// settled after the first pass. `None` means the first pass held.
    pub fn corrected_offset(&self, applied_height: f64, settled_height: f64) -> Option<f64> {
        if (settled_height - applied_height).abs() < f64::EPSILON {
            return None;
        }
        Some(self.offset + (settled_height - self.height))
    }
}

#[cfg(test)]
#[path = "tests/pagination_tests.rs"]
mod tests;
