use crate::error::HandlerError;
use crate::registry::DestinationRegistry;
use crate::render;
use crate::sender::ResilientSender;
use crate::traits::{Destination, RequestHandler};
use crate::types::{ChatMessage, EventSource, GenericRequest, InboundEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Per-surface dispatch policy. Rooms are noisy shared channels and
/// require the wake-word; direct chats are inherently addressed to the bot
/// and usually do not.
#[derive(Debug, Clone)]
pub struct SurfacePolicy {
    /// Surface name stamped on every request, e.g. "hipchat".
    pub name: String,
    /// Bot nickname, used to drop self-authored room messages.
    pub nickname: String,
    /// Leading token stripped from message bodies when present.
    pub wake_word: String,
    /// Whether a message must start with the wake-word to be dispatched.
    pub require_wake_word: bool,
}

/// Canned replies for the handler error classes. All four are delivered
/// best-effort; none of the underlying errors escape the router.
#[derive(Debug, Clone)]
pub struct CannedReplies {
    pub missing_arguments: String,
    pub invalid_request: String,
    pub error: String,
    pub fatal: String,
}

impl Default for CannedReplies {
    fn default() -> Self {
        Self {
            missing_arguments: "You need to supply arguments".to_string(),
            invalid_request:
                "I could not understand your gibberish - type 'help' to speak my language"
                    .to_string(),
            error: "Sorry, I'm a little hungover and can't deal with that right now".to_string(),
            fatal: "Sorry, I encountered an unexpected error".to_string(),
        }
    }
}

/// Bridges inbound chat traffic for one surface to the external request
/// handler and back.
pub struct MessageRouter {
    policy: SurfacePolicy,
    handler: Arc<dyn RequestHandler>,
    registry: Arc<DestinationRegistry>,
    sender: Arc<ResilientSender>,
    replies: CannedReplies,
}

impl MessageRouter {
    pub fn new(
        policy: SurfacePolicy,
        handler: Arc<dyn RequestHandler>,
        registry: Arc<DestinationRegistry>,
        sender: Arc<ResilientSender>,
        replies: CannedReplies,
    ) -> Self {
        Self {
            policy,
            handler,
            registry,
            sender,
            replies,
        }
    }

    /// Pre-dispatch filters. Room messages from the bot's own nickname are
    /// dropped, and surfaces that require the wake-word drop bodies that do
    /// not start with it.
    fn accepts(&self, event: &InboundEvent) -> bool {
        if matches!(event.source, EventSource::Room(_))
            && event.sender.contains(&self.policy.nickname)
        {
            tracing::trace!(sender = %event.sender, "ignoring own message");
            return false;
        }
        if self.policy.require_wake_word && !event.body.starts_with(&self.policy.wake_word) {
            return false;
        }
        true
    }

    /// Handle one inbound event end to end: filter, tokenize, dispatch,
    /// render, reply. Never returns an error and never panics the caller;
    /// every failure class maps to a canned best-effort reply.
    pub async fn process(&self, event: InboundEvent) {
        if !self.accepts(&event) {
            return;
        }
        let body = event.body.trim();
        if body.is_empty() {
            tracing::trace!(sender = %event.sender, "empty message");
            return;
        }
        tracing::debug!(
            surface = %self.policy.name,
            sender = %event.sender,
            body = %body,
            "message accepted"
        );

        let mut tokens: Vec<String> = body.split_whitespace().map(str::to_string).collect();
        if tokens.first().map(String::as_str) == Some(self.policy.wake_word.as_str()) {
            tokens.remove(0);
        }
        let request = GenericRequest {
            surface: self.policy.name.clone(),
            args: tokens,
        };

        let reply = self.dispatch(&event, request).await;

        let destination = match &event.source {
            EventSource::Room(room_id) => self
                .registry
                .resolve_room(room_id)
                .await
                .map(Destination::Room),
            EventSource::Direct(contact_id) => self
                .registry
                .resolve_contact(contact_id)
                .await
                .map(Destination::Contact),
        };
        match destination {
            Ok(destination) => {
                self.sender.send(&destination, &reply).await;
            }
            Err(e) => {
                tracing::warn!(
                    sender = %event.sender,
                    error = %e,
                    "cannot resolve reply destination"
                );
            }
        }
    }

    /// Invoke the handler and map its outcome to an outbound message. The
    /// handler future runs on its own task: a panicking handler surfaces
    /// here as a join error and becomes the fatal canned reply instead of
    /// tearing down the session.
    async fn dispatch(&self, event: &InboundEvent, request: GenericRequest) -> ChatMessage {
        let handler = self.handler.clone();
        let outcome = tokio::spawn(async move { handler.handle(request).await }).await;
        match outcome {
            Ok(Ok(output)) => render::render(&output).into(),
            Ok(Err(HandlerError::MissingArguments(reason))) => {
                tracing::warn!(
                    sender = %event.sender,
                    request = %event.body,
                    reason = %reason,
                    "missing arguments"
                );
                ChatMessage::plain(&self.replies.missing_arguments)
            }
            Ok(Err(HandlerError::InvalidRequest(reason))) => {
                tracing::warn!(
                    sender = %event.sender,
                    request = %event.body,
                    reason = %reason,
                    "invalid request"
                );
                ChatMessage::plain(&self.replies.invalid_request)
            }
            Ok(Err(HandlerError::Failed(reason))) => {
                tracing::error!(
                    sender = %event.sender,
                    request = %event.body,
                    reason = %reason,
                    "error while handling message"
                );
                ChatMessage::plain(&self.replies.error)
            }
            Err(e) => {
                tracing::error!(
                    sender = %event.sender,
                    request = %event.body,
                    error = %e,
                    "fatal error while handling message"
                );
                ChatMessage::plain(&self.replies.fatal)
            }
        }
    }
}

/// Drains the transport's inbound subscription and fans events out to the
/// surface routers, one spawned task per event so distinct chats never
/// block each other.
pub struct EventDispatcher {
    room_router: Arc<MessageRouter>,
    direct_router: Arc<MessageRouter>,
}

impl EventDispatcher {
    pub fn new(room_router: Arc<MessageRouter>, direct_router: Arc<MessageRouter>) -> Self {
        Self {
            room_router,
            direct_router,
        }
    }

    pub fn spawn(
        self,
        mut rx: mpsc::Receiver<InboundEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("event dispatcher received shutdown signal");
                        break;
                    }
                    event = rx.recv() => {
                        let Some(event) = event else {
                            tracing::info!("inbound event stream closed");
                            break;
                        };
                        let router = match event.source {
                            EventSource::Room(_) => self.room_router.clone(),
                            EventSource::Direct(_) => self.direct_router.clone(),
                        };
                        tokio::spawn(async move { router.process(event).await });
                    }
                }
            }
        })
    }
}
