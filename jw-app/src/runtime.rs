//! Bridge wiring: session, registry, routers, and keepalive built from
//! configuration and run until shutdown.

use crate::config::BridgeConfig;
use crate::handler::EchoHandler;
use anyhow::Result;
use jw_chat::{
    ChatSessionManager, ChatTransport, ContactId, DestinationRegistry, EventDispatcher,
    KeepAliveTask, LoopbackTransport, MessageRouter, RequestHandler, ResilientSender, RoomId,
    SurfacePolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const INBOUND_QUEUE_DEPTH: usize = 256;

const ROOM_SURFACE: &str = "rooms";
const DIRECT_SURFACE: &str = "direct";

pub struct Bridge {
    session: Arc<ChatSessionManager>,
    shutdown: CancellationToken,
    dispatcher: JoinHandle<()>,
    keepalive: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("keepalive", &self.keepalive.is_some())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    pub async fn start(
        cfg: &BridgeConfig,
        transport: Arc<dyn ChatTransport>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        let session = Arc::new(ChatSessionManager::new(
            transport.clone(),
            cfg.session_config(),
        ));
        session.login().await?;
        tracing::info!(
            host = %cfg.account.host,
            user = %cfg.account.user,
            connected = session.is_active(),
            "session established"
        );

        let registry = Arc::new(DestinationRegistry::new(
            transport.clone(),
            cfg.rooms.nickname.clone(),
            cfg.rooms.ids.iter().map(|id| RoomId::from(id.as_str())).collect(),
        ));
        registry.join_configured().await;
        for contact_id in &cfg.contacts.ids {
            let contact_id = ContactId::from(contact_id.as_str());
            if let Err(e) = registry.resolve_contact(&contact_id).await {
                tracing::warn!(contact = %contact_id, error = %e, "could not open contact chat");
            }
        }

        let sender = Arc::new(ResilientSender::new(session.clone()));
        let replies = cfg.canned_replies();

        let room_router = Arc::new(MessageRouter::new(
            SurfacePolicy {
                name: ROOM_SURFACE.to_string(),
                nickname: cfg.rooms.nickname.clone(),
                wake_word: cfg.rooms.wake_word.clone(),
                require_wake_word: true,
            },
            handler.clone(),
            registry.clone(),
            sender.clone(),
            replies.clone(),
        ));
        let direct_router = Arc::new(MessageRouter::new(
            SurfacePolicy {
                name: DIRECT_SURFACE.to_string(),
                nickname: cfg.rooms.nickname.clone(),
                wake_word: cfg.rooms.wake_word.clone(),
                require_wake_word: cfg.contacts.require_wake_word,
            },
            handler,
            registry.clone(),
            sender.clone(),
            replies,
        ));

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        transport.subscribe(tx).await?;

        let shutdown = CancellationToken::new();
        let dispatcher =
            EventDispatcher::new(room_router, direct_router).spawn(rx, shutdown.clone());

        let keepalive = if cfg.keepalive.enabled {
            let task = KeepAliveTask::new(
                sender,
                registry,
                ContactId::from(cfg.account.user.as_str()),
                &cfg.keepalive.schedule,
            )?;
            Some(task.spawn(shutdown.clone()))
        } else {
            None
        };

        Ok(Self {
            session,
            shutdown,
            dispatcher,
            keepalive,
        })
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.dispatcher.await {
            tracing::warn!(error = %e, "event dispatcher did not stop cleanly");
        }
        if let Some(keepalive) = self.keepalive {
            if let Err(e) = keepalive.await {
                tracing::warn!(error = %e, "keepalive loop did not stop cleanly");
            }
        }
        self.session.shutdown().await;
    }
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BridgeConfig::load_with_path(config_path).await?;
    tracing::info!(config_path = %path.display(), "starting jabberwock bridge");

    // The loopback backend stands in for a wire-protocol transport so a
    // local bridge runs end to end; production deployments plug a real
    // `ChatTransport` into `Bridge::start`.
    let transport = Arc::new(LoopbackTransport::new());
    let bridge = Bridge::start(&cfg, transport, Arc::new(EchoHandler)).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    bridge.shutdown().await;
    Ok(())
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BridgeConfig::load_with_path(config_path).await?;
    tracing::info!(
        host = %cfg.account.host,
        port = cfg.account.port,
        user = %cfg.account.user,
        rooms = cfg.rooms.ids.len(),
        contacts = cfg.contacts.ids.len(),
        keepalive_enabled = cfg.keepalive.enabled,
        config_path = %path.display(),
        "config ok"
    );
    Ok(())
}

pub async fn status(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BridgeConfig::load_with_path(config_path).await?;
    tracing::info!(
        host = %cfg.account.host,
        user = %cfg.account.user,
        wake_word = %cfg.rooms.wake_word,
        keepalive_schedule = %cfg.keepalive.schedule,
        config_path = %path.display(),
        "status ok"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Bridge;
    use crate::config::BridgeConfig;
    use crate::handler::EchoHandler;
    use jw_chat::{ContactId, LoopbackTransport, RoomId};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> BridgeConfig {
        BridgeConfig::from_toml(
            r#"
            [account]
            host = "chat.example.com"
            user = "bot@chat.example.com"

            [rooms]
            domain = "conf.chat.example.com"
            nickname = "Jabberwock"
            wake_word = "bot"
            ids = ["ops"]

            [contacts]
            ids = ["alice@chat.example.com"]

            [keepalive]
            enabled = false
        "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn bridge_answers_room_and_direct_traffic() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = Bridge::start(&config(), transport.clone(), Arc::new(EchoHandler))
            .await
            .unwrap();
        assert!(bridge.is_active());

        transport
            .emit_room_message(&RoomId::from("ops"), "ops@conf/alice", "bot ping")
            .await
            .unwrap();
        transport
            .emit_direct_message(
                &ContactId::from("bob@chat.example.com"),
                "bob@chat.example.com",
                "echo hi",
            )
            .await
            .unwrap();

        let mut waited = Duration::ZERO;
        while transport.sent().len() < 2 && waited < Duration::from_secs(3) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        bridge.shutdown().await;

        let sent = transport.sent();
        let room_reply = sent.iter().find(|r| r.destination == "room:ops").unwrap();
        assert_eq!(room_reply.body, "pong");
        let direct_reply = sent
            .iter()
            .find(|r| r.destination == "contact:bob@chat.example.com")
            .unwrap();
        assert_eq!(direct_reply.body, "hi");
        assert!(!transport.is_connected_now());
    }

    #[tokio::test]
    async fn startup_fails_loudly_when_the_server_is_unreachable() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.fail_next_connects(1);
        let err = Bridge::start(&config(), transport, Arc::new(EchoHandler))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot connect"));
    }
}
