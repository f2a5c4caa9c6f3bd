use crate::error::SessionError;
use crate::traits::ChatTransport;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    /// Account id, usually `<user>@<host>`.
    pub user: String,
    /// Nickname used when joining rooms.
    pub nickname: String,
    /// Conference (multi-user chat) domain, e.g. `conf.chat.example.com`.
    pub conference_domain: String,
}

/// Owns the single underlying transport connection for one configured
/// account. Startup failures are loud; the send path probes connectivity
/// through quiet reconnects instead.
pub struct ChatSessionManager {
    transport: Arc<dyn ChatTransport>,
    config: SessionConfig,
    // Serializes connect attempts so concurrent reconnects cannot race to
    // open duplicate connections.
    connect_lock: Mutex<()>,
}

impl ChatSessionManager {
    pub fn new(transport: Arc<dyn ChatTransport>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            connect_lock: Mutex::new(()),
        }
    }

    /// Establish the connection and authenticate. Either step failing is a
    /// startup-time, non-recoverable condition and propagates.
    pub async fn login(&self) -> Result<(), SessionError> {
        self.connect(false).await?;
        self.transport
            .login()
            .await
            .map_err(|e| SessionError::Login {
                user: self.config.user.clone(),
                reason: e.to_string(),
            })
    }

    /// Open the transport if it is not already connected. Returns `Ok(true)`
    /// when connected (including the already-connected no-op). With
    /// `quiet`, a failure is logged and reported as `Ok(false)`; otherwise
    /// it propagates.
    pub async fn connect(&self, quiet: bool) -> Result<bool, SessionError> {
        let _guard = self.connect_lock.lock().await;
        if self.transport.is_connected() {
            return Ok(true);
        }
        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            "connecting to server"
        );
        match self.transport.connect().await {
            Ok(()) => Ok(true),
            Err(e) if quiet => {
                tracing::warn!(error = %e, "could not connect to server");
                Ok(false)
            }
            Err(e) => Err(SessionError::Connect {
                host: self.config.host.clone(),
                port: self.config.port,
                reason: e.to_string(),
            }),
        }
    }

    /// Live transport state, never cached.
    pub fn is_active(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn shutdown(&self) {
        tracing::debug!("disconnecting");
        self.transport.disconnect().await;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn user(&self) -> &str {
        &self.config.user
    }

    pub fn nickname(&self) -> &str {
        &self.config.nickname
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatSessionManager, SessionConfig};
    use crate::loopback::LoopbackTransport;
    use std::sync::Arc;

    fn config() -> SessionConfig {
        SessionConfig {
            host: "chat.example.com".to_string(),
            port: 5222,
            user: "bot@chat.example.com".to_string(),
            nickname: "Jabberwock".to_string(),
            conference_domain: "conf.chat.example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn login_connects_and_authenticates() {
        let transport = Arc::new(LoopbackTransport::new());
        let session = ChatSessionManager::new(transport.clone(), config());
        session.login().await.unwrap();
        assert!(session.is_active());
        assert!(transport.is_authenticated());
    }

    #[tokio::test]
    async fn login_propagates_connect_failure() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.fail_next_connects(1);
        let session = ChatSessionManager::new(transport, config());
        let err = session.login().await.unwrap_err();
        assert!(err.to_string().contains("cannot connect"));
    }

    #[tokio::test]
    async fn login_propagates_authentication_failure() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.fail_next_logins(1);
        let session = ChatSessionManager::new(transport, config());
        let err = session.login().await.unwrap_err();
        assert!(err.to_string().contains("cannot authenticate"));
    }

    #[tokio::test]
    async fn quiet_connect_reports_failure_without_raising() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.fail_next_connects(1);
        let session = ChatSessionManager::new(transport.clone(), config());
        assert!(!session.connect(true).await.unwrap());
        assert!(!session.is_active());
        // The failure budget is spent; the next quiet attempt succeeds.
        assert!(session.connect(true).await.unwrap());
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn connect_is_a_noop_when_already_connected() {
        let transport = Arc::new(LoopbackTransport::new());
        let session = ChatSessionManager::new(transport.clone(), config());
        session.login().await.unwrap();
        assert_eq!(transport.connect_calls(), 1);
        assert!(session.connect(false).await.unwrap());
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn is_active_delegates_to_live_transport_state() {
        let transport = Arc::new(LoopbackTransport::new());
        let session = ChatSessionManager::new(transport.clone(), config());
        session.login().await.unwrap();
        assert!(session.is_active());
        transport.set_connected(false);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn shutdown_disconnects_unconditionally() {
        let transport = Arc::new(LoopbackTransport::new());
        let session = ChatSessionManager::new(transport.clone(), config());
        session.login().await.unwrap();
        session.shutdown().await;
        assert!(!transport.is_connected_now());
    }
}
