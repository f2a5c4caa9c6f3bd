//! Resilient chat-transport core for Jabberwock.
//!
//! Bridges an always-on federated-chat session (multi-user rooms and
//! one-to-one contacts) to a generic request/response pipeline: connection
//! lifecycle with lazy reconnect, lazy room join/contact creation,
//! bounded-retry sends, inbound-event routing, dual-format rendering, and
//! a periodic keepalive. The wire protocol itself and the business logic
//! live behind the `ChatTransport` and `RequestHandler` seams.

mod error;
mod keepalive;
mod loopback;
mod registry;
mod render;
mod router;
mod sender;
mod session;
mod traits;
mod types;

pub use error::{HandlerError, SessionError, TransportError};
pub use keepalive::{DEFAULT_KEEPALIVE_SCHEDULE, KeepAliveTask};
pub use loopback::{LoopbackTransport, SentRecord};
pub use registry::DestinationRegistry;
pub use render::{plain_to_rich, render};
pub use router::{CannedReplies, EventDispatcher, MessageRouter, SurfacePolicy};
pub use sender::{RETRY_BUDGET, ResilientSender};
pub use session::{ChatSessionManager, SessionConfig};
pub use traits::{ChatTransport, ContactHandle, Destination, RequestHandler, RoomHandle};
pub use types::{
    AttachmentOutput, ChatMessage, ContactId, EventId, EventSource, GenericRequest, InboundEvent,
    Output, RenderedMessage, RoomId, RoomMembership, SenderId, TextOutput,
};
