use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),
}

impl TransportError {
    /// Only disconnection-class failures are eligible for the
    /// reconnect-and-retry send path.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected(_))
    }
}

/// Errors a request handler may report. Each maps to a distinct canned
/// reply; none of them escape the router.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("missing arguments: {0}")]
    MissingArguments(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("handler failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("cannot authenticate user {user}: {reason}")]
    Login { user: String, reason: String },

    #[error("invalid keepalive schedule {expression:?}: {reason}")]
    Schedule { expression: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
