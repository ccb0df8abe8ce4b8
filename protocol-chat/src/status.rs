//! One-way lifecycle notifications from transport internals to an observer.

use std::{
    fmt,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crossbeam_channel::{Receiver, unbounded};
use tracing::{debug, warn};

use crate::registry::PeerId;

type StatusCallback = dyn Fn(&str) + Send + Sync;

/// Something worth telling the observer about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Listening { addr: SocketAddr },
    PeerJoined { id: PeerId, addr: SocketAddr },
    PeerLeft { id: PeerId, addr: SocketAddr },
    MessageReceived { addr: SocketAddr },
    MalformedFrame { addr: SocketAddr, reason: String },
    AcceptFailed { reason: String },
    DeliveryFailed { addr: SocketAddr, reason: String },
    ConnectionLost { addr: SocketAddr, reason: String },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Listening { addr } => write!(f, "Server listening on {addr}"),
            StatusEvent::PeerJoined { id, addr } => {
                write!(f, "New client connected: {addr} ({id})")
            }
            StatusEvent::PeerLeft { id, addr } => write!(f, "Client {addr} ({id}) disconnected"),
            StatusEvent::MessageReceived { addr } => write!(f, "Received message from {addr}"),
            StatusEvent::MalformedFrame { addr, reason } => {
                write!(f, "Malformed message from {addr}: {reason}")
            }
            StatusEvent::AcceptFailed { reason } => {
                write!(f, "Error accepting connection: {reason}")
            }
            StatusEvent::DeliveryFailed { addr, reason } => {
                write!(f, "Error sending to {addr}: {reason}")
            }
            StatusEvent::ConnectionLost { addr, reason } => {
                write!(f, "Connection to {addr} lost: {reason}")
            }
        }
    }
}

/// Fire-and-forget observer handle. Cloning shares the same callback.
#[derive(Clone, Default)]
pub struct StatusSink {
    callback: Option<Arc<StatusCallback>>,
}

impl StatusSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// A sink that only logs.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: &StatusEvent) {
        let text = event.to_string();
        debug!(status = %text, "status event");

        let Some(callback) = &self.callback else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&text))).is_err() {
            warn!(status = %text, "status observer panicked; event dropped");
        }
    }
}

impl fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSink")
            .field("registered", &self.callback.is_some())
            .finish()
    }
}

/// Builds a sink that forwards every event text into a channel, for hosts
/// that drain notifications on their own schedule.
pub fn channel() -> (StatusSink, Receiver<String>) {
    let (tx, rx) = unbounded();
    let sink = StatusSink::new(move |text| {
        let _ = tx.send(text.to_string());
    });
    (sink, rx)
}
