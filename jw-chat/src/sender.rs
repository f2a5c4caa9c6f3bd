use crate::session::ChatSessionManager;
use crate::traits::Destination;
use crate::types::ChatMessage;
use std::sync::Arc;

/// Reconnect-triggered retries per logical send (3 transport attempts
/// total). Kept small and constant: reconnect storms against the remote
/// service risk account-level rate limiting.
pub const RETRY_BUDGET: u32 = 2;

/// Wraps a transport send with bounded retry plus a single quiet reconnect
/// before each retry. Failures are reported by return value, never raised.
pub struct ResilientSender {
    session: Arc<ChatSessionManager>,
}

impl ResilientSender {
    pub fn new(session: Arc<ChatSessionManager>) -> Self {
        Self { session }
    }

    /// Send `message` to `destination`. Returns whether delivery succeeded.
    pub async fn send(&self, destination: &Destination, message: &ChatMessage) -> bool {
        self.send_with_budget(destination, message, RETRY_BUDGET)
            .await
    }

    async fn send_with_budget(
        &self,
        destination: &Destination,
        message: &ChatMessage,
        mut attempts: u32,
    ) -> bool {
        loop {
            match destination.send(message).await {
                Ok(()) => return true,
                Err(e) if e.is_disconnect() => {
                    tracing::warn!(
                        error = %e,
                        attempts_left = attempts,
                        "cannot send message"
                    );
                    if attempts > 0 && matches!(self.session.connect(true).await, Ok(true)) {
                        attempts -= 1;
                        continue;
                    }
                    tracing::error!(
                        destination = %destination.label(),
                        body = %message.body,
                        "failed to send response"
                    );
                    return false;
                }
                Err(e) => {
                    // Only disconnection-class failures are retried.
                    tracing::error!(
                        destination = %destination.label(),
                        error = %e,
                        "send failed"
                    );
                    return false;
                }
            }
        }
    }
}
