use crate::error::SessionError;
use crate::registry::DestinationRegistry;
use crate::sender::ResilientSender;
use crate::traits::Destination;
use crate::types::{ChatMessage, ContactId};
use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default schedule: every minute. The remote service drops connections
/// after 150s of inactivity; sending every 60s stays well inside that
/// window.
pub const DEFAULT_KEEPALIVE_SCHEDULE: &str = "0 * * * * *";

/// Payload sent on every tick.
const KEEPALIVE_BODY: &str = " ";

/// Periodically sends a single space over a loopback chat (a chat the bot
/// holds with its own account) to defeat the transport idle timeout.
/// Failures are logged only; the next tick retries naturally.
pub struct KeepAliveTask {
    sender: Arc<ResilientSender>,
    registry: Arc<DestinationRegistry>,
    loopback_contact: ContactId,
    schedule: Schedule,
}

impl std::fmt::Debug for KeepAliveTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAliveTask")
            .field("loopback_contact", &self.loopback_contact)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl KeepAliveTask {
    pub fn new(
        sender: Arc<ResilientSender>,
        registry: Arc<DestinationRegistry>,
        loopback_contact: ContactId,
        schedule: &str,
    ) -> Result<Self, SessionError> {
        let schedule = Schedule::from_str(schedule).map_err(|e| SessionError::Schedule {
            expression: schedule.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            sender,
            registry,
            loopback_contact,
            schedule,
        })
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self, shutdown: CancellationToken) {
        loop {
            let now = Utc::now();
            let Some(next) = self.schedule.after(&now).next() else {
                tracing::warn!("keepalive schedule has no upcoming tick; stopping");
                break;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("keepalive loop received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        tracing::trace!("sending keepalive message");
        match self.registry.resolve_contact(&self.loopback_contact).await {
            Ok(handle) => {
                let delivered = self
                    .sender
                    .send(&Destination::Contact(handle), &ChatMessage::plain(KEEPALIVE_BODY))
                    .await;
                if !delivered {
                    tracing::warn!("keepalive send failed; next tick will retry");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "keepalive chat unavailable");
            }
        }
    }
}
