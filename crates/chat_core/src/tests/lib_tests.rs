use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use shared::domain::{
    ConversationId, ExternalMessageId, MessageId, MessageStatus, MessageType, SenderType,
};
use shared::protocol::{
    Capabilities, ConversationEvent, DispatchAck, Message, MessageDraft, MessagePage, PageCursor,
};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use super::*;

struct FakeBackend {
    pages: Mutex<HashMap<ConversationId, Vec<Message>>>,
    feeds: Mutex<HashMap<ConversationId, mpsc::Sender<ConversationEvent>>>,
    dispatched: Mutex<Vec<MessageDraft>>,
}

impl FakeBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(HashMap::new()),
            feeds: Mutex::new(HashMap::new()),
            dispatched: Mutex::new(Vec::new()),
        })
    }

    async fn seed_history(&self, conversation_id: &ConversationId, messages: Vec<Message>) {
        self.pages
            .lock()
            .await
            .insert(conversation_id.clone(), messages);
    }

    /// Push a realtime event into the conversation's open subscription.
    async fn feed(&self, conversation_id: &ConversationId, event: ConversationEvent) {
        let sender = self
            .feeds
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap();
        // A closed subscription just drops the event.
        let _ = sender.send(event).await;
    }
}

#[async_trait]
impl MessageChannel for FakeBackend {
    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel(32);
        self.feeds.lock().await.insert(conversation_id.clone(), tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn dispatch(&self, draft: &MessageDraft) -> Result<DispatchAck> {
        self.dispatched.lock().await.push(draft.clone());
        Ok(DispatchAck {
            external_id: ExternalMessageId::new(draft.client_id.as_str()),
        })
    }

    async fn fetch_page(
        &self,
        conversation_id: &ConversationId,
        _before: Option<&PageCursor>,
        _limit: u32,
    ) -> Result<MessagePage> {
        let messages = self
            .pages
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        Ok(MessagePage {
            messages,
            next_cursor: None,
            has_more: false,
        })
    }

    async fn delete_message(
        &self,
        _conversation_id: &ConversationId,
        _message_id: &MessageId,
        _external_id: Option<&ExternalMessageId>,
    ) -> Result<()> {
        Ok(())
    }
}

struct NoBlobs;

#[async_trait]
impl BlobStore for NoBlobs {
    async fn upload(
        &self,
        _bytes: Vec<u8>,
        _content_type: &str,
        file_name: &str,
    ) -> Result<String> {
        Ok(format!("https://blobs/{file_name}"))
    }
}

fn history(conversation: &str, count: i64) -> Vec<Message> {
    (0..count)
        .map(|seq| Message {
            id: MessageId::new(format!("{conversation}-{seq:03}")),
            external_id: Some(ExternalMessageId::new(format!("ext-{conversation}-{seq}"))),
            conversation_id: ConversationId::new(conversation),
            sender_type: SenderType::Contact,
            message_type: MessageType::Text,
            content: format!("history {seq}"),
            file_url: None,
            file_name: None,
            reply_to_message_id: None,
            quoted: None,
            status: MessageStatus::Read,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
                + ChronoDuration::seconds(seq),
            provider_message_id: None,
        })
        .collect()
}

fn engine_options() -> EngineOptions {
    EngineOptions {
        settle_window: Duration::from_millis(20),
        ..EngineOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn opening_a_conversation_loads_the_recent_window() {
    let backend = FakeBackend::new();
    backend
        .seed_history(&ConversationId::new("conv-1"), history("conv-1", 50))
        .await;
    let engine = ChatEngine::new(
        Arc::clone(&backend) as Arc<dyn MessageChannel>,
        Arc::new(NoBlobs),
        engine_options(),
    );

    engine
        .open_conversation(ConversationId::new("conv-1"), Capabilities::all())
        .await
        .unwrap();

    let visible = engine.visible_messages().await;
    assert_eq!(visible.len(), 30);
    assert_eq!(visible.last().unwrap().id.as_str(), "conv-1-049");
    assert_eq!(
        engine.active_conversation().await,
        Some(ConversationId::new("conv-1"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn switching_conversations_tears_the_previous_one_down() {
    let backend = FakeBackend::new();
    backend
        .seed_history(&ConversationId::new("conv-1"), history("conv-1", 5))
        .await;
    backend
        .seed_history(&ConversationId::new("conv-2"), history("conv-2", 3))
        .await;
    let engine = ChatEngine::new(
        Arc::clone(&backend) as Arc<dyn MessageChannel>,
        Arc::new(NoBlobs),
        engine_options(),
    );

    engine
        .open_conversation(ConversationId::new("conv-1"), Capabilities::all())
        .await
        .unwrap();
    engine
        .open_conversation(ConversationId::new("conv-2"), Capabilities::all())
        .await
        .unwrap();

    assert_eq!(
        engine.active_conversation().await,
        Some(ConversationId::new("conv-2"))
    );
    let visible = engine.visible_messages().await;
    assert_eq!(visible.len(), 3);
    assert!(visible.iter().all(|m| m.conversation_id.as_str() == "conv-2"));

    // An event pushed at the abandoned subscription goes nowhere.
    let mut stale = history("conv-1", 1).remove(0);
    stale.id = MessageId::new("late-arrival");
    stale.external_id = Some(ExternalMessageId::new("ext-late"));
    backend
        .feed(
            &ConversationId::new("conv-1"),
            ConversationEvent::Insert { message: stale },
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.visible_messages().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn send_then_realtime_echo_leaves_a_single_confirmed_entry() {
    let backend = FakeBackend::new();
    let conversation = ConversationId::new("conv-1");
    let engine = ChatEngine::new(
        Arc::clone(&backend) as Arc<dyn MessageChannel>,
        Arc::new(NoBlobs),
        engine_options(),
    );
    engine
        .open_conversation(conversation.clone(), Capabilities::all())
        .await
        .unwrap();

    let outcome = engine.send_text("hello", None).await.unwrap();
    let SendOutcome::Dispatched(local_id) = outcome else {
        panic!("expected dispatch, got {outcome:?}");
    };

    // The channel later echoes the confirmed row with its own id and the
    // client id as the external id.
    let echoed = Message {
        id: MessageId::new("srv-row-1"),
        external_id: Some(ExternalMessageId::new(local_id.as_str())),
        conversation_id: conversation.clone(),
        sender_type: SenderType::Agent,
        message_type: MessageType::Text,
        content: "hello".into(),
        file_url: None,
        file_name: None,
        reply_to_message_id: None,
        quoted: None,
        status: MessageStatus::Delivered,
        created_at: Utc::now(),
        provider_message_id: Some("wa-1".into()),
    };
    backend
        .feed(&conversation, ConversationEvent::Insert { message: echoed })
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let visible = engine.visible_messages().await;
    assert_eq!(visible.len(), 1);
    let entry = &visible[0];
    assert_eq!(entry.id, local_id);
    assert_eq!(entry.status, MessageStatus::Delivered);
    assert_eq!(entry.provider_message_id.as_deref(), Some("wa-1"));
    assert_eq!(backend.dispatched.lock().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn incoming_contact_message_in_the_open_conversation_is_read() {
    let backend = FakeBackend::new();
    let conversation = ConversationId::new("conv-1");
    let engine = ChatEngine::new(
        Arc::clone(&backend) as Arc<dyn MessageChannel>,
        Arc::new(NoBlobs),
        engine_options(),
    );
    engine
        .open_conversation(conversation.clone(), Capabilities::all())
        .await
        .unwrap();

    backend
        .feed(
            &conversation,
            ConversationEvent::Insert {
                message: history("conv-1", 1).remove(0),
            },
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.visible_messages().await.len(), 1);
    assert_eq!(engine.unread_counts().await.get(&conversation), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn operations_without_an_open_conversation_are_rejected() {
    let backend = FakeBackend::new();
    let engine = ChatEngine::new(
        Arc::clone(&backend) as Arc<dyn MessageChannel>,
        Arc::new(NoBlobs),
        engine_options(),
    );

    assert!(matches!(
        engine.send_text("hello", None).await,
        Err(SendError::NoConversation)
    ));
    assert!(engine.load_older().await.is_err());
    assert!(engine.visible_messages().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn close_conversation_clears_the_active_state() {
    let backend = FakeBackend::new();
    let engine = ChatEngine::new(
        Arc::clone(&backend) as Arc<dyn MessageChannel>,
        Arc::new(NoBlobs),
        engine_options(),
    );
    engine
        .open_conversation(ConversationId::new("conv-1"), Capabilities::all())
        .await
        .unwrap();

    engine.close_conversation().await;

    assert_eq!(engine.active_conversation().await, None);
    assert!(matches!(
        engine.send_text("hello", None).await,
        Err(SendError::NoConversation)
    ));
}
