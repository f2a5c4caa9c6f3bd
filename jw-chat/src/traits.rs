use crate::error::{HandlerError, TransportError};
use crate::types::{ChatMessage, ContactId, GenericRequest, InboundEvent, Output, RoomId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle on a multi-user room. Obtained from the transport, cached by the
/// destination registry for the process lifetime.
#[async_trait]
pub trait RoomHandle: Send + Sync {
    fn room_id(&self) -> &RoomId;

    /// Live membership state, never a cached flag.
    async fn is_joined(&self) -> bool;

    async fn join(&self, nickname: &str) -> Result<(), TransportError>;

    async fn send(&self, message: &ChatMessage) -> Result<(), TransportError>;
}

/// Handle on a one-to-one chat. Contacts have no join concept; creation
/// success is sufficient.
#[async_trait]
pub trait ContactHandle: Send + Sync {
    fn contact_id(&self) -> &ContactId;

    async fn send(&self, message: &ChatMessage) -> Result<(), TransportError>;
}

/// The underlying chat-protocol client, consumed at this seam only.
/// Stanza encoding, TLS/SASL, and XML parsing live behind it.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn login(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self);

    async fn resolve_room(&self, room_id: &RoomId) -> Result<Arc<dyn RoomHandle>, TransportError>;

    async fn resolve_contact(
        &self,
        contact_id: &ContactId,
    ) -> Result<Arc<dyn ContactHandle>, TransportError>;

    /// Start delivering inbound chat events. Push to tx once per received
    /// message; events for distinct chats may be delivered concurrently.
    async fn subscribe(&self, tx: mpsc::Sender<InboundEvent>) -> Result<(), TransportError>;
}

/// The external business-logic pipeline.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: GenericRequest) -> Result<Output, HandlerError>;
}

/// A resolved send target: either kind of chat behind one send call.
#[derive(Clone)]
pub enum Destination {
    Room(Arc<dyn RoomHandle>),
    Contact(Arc<dyn ContactHandle>),
}

impl Destination {
    pub fn label(&self) -> String {
        match self {
            Self::Room(handle) => format!("room:{}", handle.room_id()),
            Self::Contact(handle) => format!("contact:{}", handle.contact_id()),
        }
    }

    pub async fn send(&self, message: &ChatMessage) -> Result<(), TransportError> {
        match self {
            Self::Room(handle) => handle.send(message).await,
            Self::Contact(handle) => handle.send(message).await,
        }
    }
}
