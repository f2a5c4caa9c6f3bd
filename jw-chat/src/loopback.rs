use crate::error::TransportError;
use crate::traits::{ChatTransport, ContactHandle, RoomHandle};
use crate::types::{ChatMessage, ContactId, EventId, EventSource, InboundEvent, RoomId, SenderId};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// A message the loopback transport accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub destination: String,
    pub body: String,
    pub rich_body: Option<String>,
}

#[derive(Default)]
struct FailurePlan {
    connects: AtomicU32,
    logins: AtomicU32,
    joins: AtomicU32,
    sends_not_connected: AtomicU32,
    sends_protocol: AtomicU32,
}

/// Consume one unit of an injected failure budget.
fn take(counter: &AtomicU32) -> bool {
    let mut current = counter.load(Ordering::SeqCst);
    while current > 0 {
        match counter.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
    false
}

struct LoopbackState {
    connected: AtomicBool,
    authenticated: AtomicBool,
    connect_calls: AtomicU32,
    contact_resolves: AtomicU32,
    send_attempts: AtomicU32,
    failures: FailurePlan,
    outbox: Mutex<Vec<SentRecord>>,
    rooms: DashMap<RoomId, Arc<LoopbackRoom>>,
    contacts: DashMap<ContactId, Arc<LoopbackContact>>,
    inbound: RwLock<Option<mpsc::Sender<InboundEvent>>>,
}

impl LoopbackState {
    fn record_send(
        &self,
        destination: String,
        message: &ChatMessage,
    ) -> Result<(), TransportError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if take(&self.failures.sends_not_connected) {
            return Err(TransportError::NotConnected("stream closed".to_string()));
        }
        if take(&self.failures.sends_protocol) {
            return Err(TransportError::Protocol("stanza rejected".to_string()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected(
                "transport is not connected".to_string(),
            ));
        }
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentRecord {
                destination,
                body: message.body.clone(),
                rich_body: message.rich_body.clone(),
            });
        Ok(())
    }
}

struct LoopbackRoom {
    room_id: RoomId,
    joined: AtomicBool,
    join_calls: AtomicU32,
    state: Arc<LoopbackState>,
}

#[async_trait]
impl RoomHandle for LoopbackRoom {
    fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    async fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    async fn join(&self, _nickname: &str) -> Result<(), TransportError> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.state.failures.joins) {
            return Err(TransportError::Protocol("join refused".to_string()));
        }
        self.joined.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &ChatMessage) -> Result<(), TransportError> {
        self.state
            .record_send(format!("room:{}", self.room_id), message)
    }
}

struct LoopbackContact {
    contact_id: ContactId,
    state: Arc<LoopbackState>,
}

#[async_trait]
impl ContactHandle for LoopbackContact {
    fn contact_id(&self) -> &ContactId {
        &self.contact_id
    }

    async fn send(&self, message: &ChatMessage) -> Result<(), TransportError> {
        self.state
            .record_send(format!("contact:{}", self.contact_id), message)
    }
}

/// In-memory transport backing local development runs and the test suite.
/// Connectivity and failure behavior are scripted through the `fail_next_*`
/// knobs; accepted sends are recorded and inbound traffic is injected with
/// the `emit_*` methods.
pub struct LoopbackTransport {
    state: Arc<LoopbackState>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(LoopbackState {
                connected: AtomicBool::new(false),
                authenticated: AtomicBool::new(false),
                connect_calls: AtomicU32::new(0),
                contact_resolves: AtomicU32::new(0),
                send_attempts: AtomicU32::new(0),
                failures: FailurePlan::default(),
                outbox: Mutex::new(Vec::new()),
                rooms: DashMap::new(),
                contacts: DashMap::new(),
                inbound: RwLock::new(None),
            }),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected_now(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.authenticated.load(Ordering::SeqCst)
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.state.failures.connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_logins(&self, count: u32) {
        self.state.failures.logins.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_joins(&self, count: u32) {
        self.state.failures.joins.store(count, Ordering::SeqCst);
    }

    /// The next `count` sends fail with a disconnection-class error.
    pub fn fail_next_sends(&self, count: u32) {
        self.state
            .failures
            .sends_not_connected
            .store(count, Ordering::SeqCst);
    }

    /// The next `count` sends fail with a non-disconnection error.
    pub fn fail_next_sends_with_protocol_error(&self, count: u32) {
        self.state
            .failures
            .sends_protocol
            .store(count, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u32 {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> u32 {
        self.state.send_attempts.load(Ordering::SeqCst)
    }

    pub fn contact_resolve_calls(&self) -> u32 {
        self.state.contact_resolves.load(Ordering::SeqCst)
    }

    pub fn room_join_calls(&self, room_id: &RoomId) -> u32 {
        self.state
            .rooms
            .get(room_id)
            .map(|room| room.join_calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.state
            .outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Inject an inbound room message, as if a participant had spoken.
    pub async fn emit_room_message(
        &self,
        room_id: &RoomId,
        sender: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        self.emit(
            EventSource::Room(room_id.clone()),
            sender,
            body,
            serde_json::json!({ "room_id": room_id }),
        )
        .await
    }

    /// Inject an inbound one-to-one message.
    pub async fn emit_direct_message(
        &self,
        contact_id: &ContactId,
        sender: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        self.emit(
            EventSource::Direct(contact_id.clone()),
            sender,
            body,
            serde_json::Value::Null,
        )
        .await
    }

    async fn emit(
        &self,
        source: EventSource,
        sender: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> Result<(), TransportError> {
        let tx = self.state.inbound.read().await.clone();
        let Some(tx) = tx else {
            return Err(TransportError::Protocol(
                "no inbound subscriber".to_string(),
            ));
        };
        let event = InboundEvent {
            id: EventId::from(Uuid::new_v4().to_string()),
            source,
            sender: SenderId::from(sender),
            body: body.to_string(),
            metadata,
            received_at: Utc::now(),
        };
        tx.send(event)
            .await
            .map_err(|e| TransportError::Protocol(format!("inbound queue closed: {e}")))
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for LoopbackTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.state.failures.connects) {
            return Err(TransportError::NotConnected(
                "connection refused".to_string(),
            ));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn login(&self) -> Result<(), TransportError> {
        if take(&self.state.failures.logins) {
            return Err(TransportError::Auth("invalid credentials".to_string()));
        }
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected(
                "transport is not connected".to_string(),
            ));
        }
        self.state.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.authenticated.store(false, Ordering::SeqCst);
    }

    async fn resolve_room(&self, room_id: &RoomId) -> Result<Arc<dyn RoomHandle>, TransportError> {
        let room = self
            .state
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                Arc::new(LoopbackRoom {
                    room_id: room_id.clone(),
                    joined: AtomicBool::new(false),
                    join_calls: AtomicU32::new(0),
                    state: self.state.clone(),
                })
            })
            .value()
            .clone();
        Ok(room)
    }

    async fn resolve_contact(
        &self,
        contact_id: &ContactId,
    ) -> Result<Arc<dyn ContactHandle>, TransportError> {
        self.state.contact_resolves.fetch_add(1, Ordering::SeqCst);
        let contact = self
            .state
            .contacts
            .entry(contact_id.clone())
            .or_insert_with(|| {
                Arc::new(LoopbackContact {
                    contact_id: contact_id.clone(),
                    state: self.state.clone(),
                })
            })
            .value()
            .clone();
        Ok(contact)
    }

    async fn subscribe(&self, tx: mpsc::Sender<InboundEvent>) -> Result<(), TransportError> {
        *self.state.inbound.write().await = Some(tx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::LoopbackTransport;
    use crate::registry::DestinationRegistry;
    use crate::router::{CannedReplies, EventDispatcher, MessageRouter, SurfacePolicy};
    use crate::sender::ResilientSender;
    use crate::session::{ChatSessionManager, SessionConfig};
    use crate::traits::{ChatTransport, RequestHandler};
    use crate::types::{ContactId, GenericRequest, Output, RoomId};
    use crate::error::HandlerError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct UppercaseHandler;

    #[async_trait]
    impl RequestHandler for UppercaseHandler {
        async fn handle(&self, request: GenericRequest) -> Result<Output, HandlerError> {
            Ok(Output::text(request.args.join(" ").to_uppercase()))
        }
    }

    #[tokio::test]
    async fn events_flow_from_subscription_to_reply() {
        let transport = Arc::new(LoopbackTransport::new());
        let session = Arc::new(ChatSessionManager::new(
            transport.clone(),
            SessionConfig {
                host: "chat.example.com".to_string(),
                port: 5222,
                user: "bot@chat.example.com".to_string(),
                nickname: "Jabberwock".to_string(),
                conference_domain: "conf.chat.example.com".to_string(),
            },
        ));
        session.login().await.unwrap();
        let registry = Arc::new(DestinationRegistry::new(
            transport.clone(),
            "Jabberwock",
            vec![RoomId::from("ops")],
        ));
        let sender = Arc::new(ResilientSender::new(session));
        let handler: Arc<dyn RequestHandler> = Arc::new(UppercaseHandler);

        let room_router = Arc::new(MessageRouter::new(
            SurfacePolicy {
                name: "rooms".to_string(),
                nickname: "Jabberwock".to_string(),
                wake_word: "bot".to_string(),
                require_wake_word: true,
            },
            handler.clone(),
            registry.clone(),
            sender.clone(),
            CannedReplies::default(),
        ));
        let direct_router = Arc::new(MessageRouter::new(
            SurfacePolicy {
                name: "direct".to_string(),
                nickname: "Jabberwock".to_string(),
                wake_word: "bot".to_string(),
                require_wake_word: false,
            },
            handler,
            registry,
            sender,
            CannedReplies::default(),
        ));

        let (tx, rx) = mpsc::channel(16);
        transport.subscribe(tx).await.unwrap();
        let shutdown = CancellationToken::new();
        let dispatcher = EventDispatcher::new(room_router, direct_router).spawn(rx, shutdown.clone());

        transport
            .emit_room_message(&RoomId::from("ops"), "ops@conf/alice", "bot deploy api")
            .await
            .unwrap();
        transport
            .emit_direct_message(
                &ContactId::from("bob@chat.example.com"),
                "bob@chat.example.com",
                "ping",
            )
            .await
            .unwrap();

        let mut waited = Duration::ZERO;
        while transport.sent().len() < 2 && waited < Duration::from_secs(3) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        shutdown.cancel();
        dispatcher.await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        let room_reply = sent
            .iter()
            .find(|record| record.destination == "room:ops")
            .unwrap();
        assert_eq!(room_reply.body, "DEPLOY API");
        let direct_reply = sent
            .iter()
            .find(|record| record.destination == "contact:bob@chat.example.com")
            .unwrap();
        assert_eq!(direct_reply.body, "PING");
    }

    #[tokio::test]
    async fn emit_without_subscriber_is_an_error() {
        let transport = LoopbackTransport::new();
        let err = transport
            .emit_direct_message(
                &ContactId::from("bob@chat.example.com"),
                "bob@chat.example.com",
                "hello",
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no inbound subscriber"));
    }
}
