use std::io;

/// Broad class of a transport failure, used by hosts to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Acquiring the transport failed; the endpoint stays reusable.
    Setup,
    /// The current operation could not complete; endpoint state is unchanged.
    Transient,
    /// The connection is gone.
    Fatal,
    /// Expected noise while tearing a transport down.
    Shutdown,
}

/// Every failure a handler can report. The `Display` text is what hosts show
/// to the user.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to start server on {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("Failed to resolve {addr}: {reason}")]
    Resolve { addr: String, reason: String },
    #[error("Failed to connect: no server found at {addr}")]
    ServerNotFound { addr: String },
    #[error("Failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("Failed to start {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        source: io::Error,
    },
    #[error("No clients connected")]
    NoPeers,
    #[error("Not connected to server")]
    NotConnected,
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Connection to server lost")]
    ConnectionLost,
    #[error("Server not responding")]
    PeerNotResponding,
    #[error("Failed to send message: {0}")]
    Send(io::Error),
    #[error("Transport already closed: {0}")]
    Closed(io::Error),
}

impl TransportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Bind { .. }
            | TransportError::Resolve { .. }
            | TransportError::ServerNotFound { .. }
            | TransportError::Connect { .. }
            | TransportError::Spawn { .. } => FailureKind::Setup,
            TransportError::NoPeers | TransportError::NotConnected | TransportError::Encode(_) => {
                FailureKind::Transient
            }
            TransportError::ConnectionLost
            | TransportError::PeerNotResponding
            | TransportError::Send(_) => FailureKind::Fatal,
            TransportError::Closed(_) => FailureKind::Shutdown,
        }
    }

    /// Maps a failed write on an established connection.
    pub(crate) fn from_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero => TransportError::ConnectionLost,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                TransportError::PeerNotResponding
            }
            _ => TransportError::Send(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_facing_messages_are_stable() {
        assert_eq!(TransportError::NoPeers.to_string(), "No clients connected");
        assert_eq!(
            TransportError::NotConnected.to_string(),
            "Not connected to server"
        );
        let refused = TransportError::ServerNotFound {
            addr: "127.0.0.1:5000".into(),
        };
        assert!(refused.to_string().starts_with("Failed to connect"));
        assert!(refused.to_string().contains("no server found"));
    }

    #[test]
    fn write_failures_are_classified() {
        let lost = TransportError::from_write(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(lost, TransportError::ConnectionLost));

        let stalled = TransportError::from_write(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(stalled, TransportError::PeerNotResponding));

        let other = TransportError::from_write(io::Error::other("boom"));
        assert!(matches!(other, TransportError::Send(_)));
        assert_eq!(other.kind(), FailureKind::Fatal);
    }

    #[test]
    fn kinds_follow_the_failure_taxonomy() {
        let bind = TransportError::Bind {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(bind.kind(), FailureKind::Setup);
        assert_eq!(TransportError::NoPeers.kind(), FailureKind::Transient);
        assert_eq!(TransportError::ConnectionLost.kind(), FailureKind::Fatal);
        assert_eq!(
            TransportError::Closed(io::Error::from(io::ErrorKind::NotConnected)).kind(),
            FailureKind::Shutdown
        );
    }
}
