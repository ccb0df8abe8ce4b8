//! Single-connection endpoint that talks to one remote master.

use std::{
    io::{self, BufReader, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::{
    config::{ProtocolKind, TransportConfig, join_host_port},
    error::TransportError,
    handler::{ProtocolHandler, Received},
    message::{Envelope, read_envelope},
    queue::InboundQueue,
    status::{StatusEvent, StatusSink},
};

const DISCONNECTED: &str = "Client disconnected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The peer went away. Stays here until `cleanup` or a new `initialize`.
    Lost,
}

/// State shared with the reader thread. One lock covers the whole state so
/// "connected" and "running" can never be observed half-updated.
type SharedState = Arc<Mutex<ConnectionState>>;

pub struct ClientEndpoint {
    server_addr: String,
    config: TransportConfig,
    status: StatusSink,
    queue: InboundQueue,
    state: SharedState,
    connection: Option<Connection>,
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    reader: Option<JoinHandle<()>>,
}

impl ClientEndpoint {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self::with_config(server_addr, TransportConfig::default())
    }

    pub fn from_host_port(host: &str, port: u16) -> Self {
        Self::new(join_host_port(host, port))
    }

    pub fn with_config(server_addr: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            server_addr: server_addr.into(),
            config,
            status: StatusSink::disabled(),
            queue: InboundQueue::new(),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            connection: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, next: ConnectionState) {
        *lock(&self.state) = next;
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, TransportError> {
        let resolve_error = |reason: String| TransportError::Resolve {
            addr: self.server_addr.clone(),
            reason,
        };
        let addrs: Vec<SocketAddr> = self
            .server_addr
            .to_socket_addrs()
            .map_err(|err| resolve_error(err.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(resolve_error("no addresses found".to_string()));
        }
        Ok(addrs)
    }

    /// Tries every resolved address in order, like `TcpStream::connect`.
    fn dial(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        let mut last_error = None;
        for peer in self.resolve()? {
            match TcpStream::connect_timeout(&peer, self.config.connect_timeout) {
                Ok(stream) => return Ok((stream, peer)),
                Err(err) => {
                    debug!(%peer, error = %err, "connect attempt failed");
                    last_error = Some((peer, err));
                }
            }
        }

        let Some((peer, err)) = last_error else {
            return Err(TransportError::Resolve {
                addr: self.server_addr.clone(),
                reason: "no addresses found".to_string(),
            });
        };
        if err.kind() == io::ErrorKind::ConnectionRefused {
            Err(TransportError::ServerNotFound {
                addr: peer.to_string(),
            })
        } else {
            Err(TransportError::Connect {
                addr: peer.to_string(),
                source: err,
            })
        }
    }

    fn connect(&mut self) -> Result<SocketAddr, TransportError> {
        let (stream, peer) = self.dial()?;

        let connect_error = |source| TransportError::Connect {
            addr: peer.to_string(),
            source,
        };
        stream.set_nodelay(true).map_err(connect_error)?;
        stream
            .set_write_timeout(Some(self.config.write_timeout))
            .map_err(connect_error)?;
        let reader_stream = stream.try_clone().map_err(connect_error)?;

        // Connected before the reader starts, so an immediate EOF is seen as Lost.
        self.set_state(ConnectionState::Connected);

        let state = Arc::clone(&self.state);
        let inbound = self.queue.producer();
        let status = self.status.clone();
        let spawned = thread::Builder::new()
            .name(format!("client-reader-{peer}"))
            .spawn(move || read_loop(reader_stream, peer, state, inbound, status));
        let reader = match spawned {
            Ok(reader) => reader,
            Err(source) => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(TransportError::Spawn {
                    thread: "reader",
                    source,
                });
            }
        };

        self.connection = Some(Connection {
            stream,
            peer,
            reader: Some(reader),
        });
        Ok(peer)
    }

    /// Drops a dead or live connection and waits for its reader to exit.
    fn release_connection(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        if let Err(err) = connection.stream.shutdown(Shutdown::Both) {
            let err = TransportError::Closed(err);
            debug!(peer = %connection.peer, error = %err, "ignoring shutdown error");
        }
        if let Some(reader) = connection.reader.take() {
            if reader.join().is_err() {
                warn!(peer = %connection.peer, "client reader thread panicked");
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let stream = &mut connection.stream;
        let probe_timeout = self.config.probe_timeout;
        let write_timeout = self.config.write_timeout;

        // A zero-length write surfaces a reset peer quickly, before we commit
        // to a full write under the longer timeout.
        let result = stream
            .set_write_timeout(Some(probe_timeout))
            .and_then(|()| stream.write(&[]))
            .and_then(|_| stream.set_write_timeout(Some(write_timeout)))
            .and_then(|()| stream.write_all(frame))
            .and_then(|()| stream.flush());

        result.map_err(|err| {
            let peer = connection.peer;
            warn!(%peer, error = %err, "client send failed");
            let reason = err.to_string();
            let err = TransportError::from_write(err);
            if mark_lost(&self.state) {
                self.status.emit(&StatusEvent::ConnectionLost { addr: peer, reason });
            }
            err
        })
    }
}

impl ProtocolHandler for ClientEndpoint {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Client
    }

    fn set_status_sink(&mut self, sink: StatusSink) {
        self.status = sink;
    }

    fn initialize(&mut self) -> Result<String, TransportError> {
        match self.state() {
            ConnectionState::Connected => {
                if let Some(connection) = &self.connection {
                    return Ok(format!("Already connected to {}", connection.peer));
                }
            }
            ConnectionState::Lost => self.release_connection(),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.set_state(ConnectionState::Connecting);
        match self.connect() {
            Ok(peer) => {
                info!(%peer, "client connected");
                Ok(format!("Client connected to {peer}"))
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(server = %self.server_addr, error = %err, "client failed to connect");
                Err(err)
            }
        }
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Lost => return Err(TransportError::ConnectionLost),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return Err(TransportError::NotConnected);
            }
        }

        let frame = Envelope::message(text).encode()?;
        self.write_frame(&frame)
    }

    fn receive(&mut self) -> Received {
        self.queue
            .try_pop()
            .map_or(Received::Empty, Received::Message)
    }

    fn cleanup(&mut self) -> String {
        self.set_state(ConnectionState::Disconnected);
        if let Some(peer) = self.connection.as_ref().map(|connection| connection.peer) {
            self.release_connection();
            info!(%peer, "client disconnected");
        }
        DISCONNECTED.to_string()
    }
}

impl Drop for ClientEndpoint {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.cleanup();
        }
    }
}

fn lock(state: &SharedState) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Moves Connected to Lost. Returns false when the connection was already
/// lost or deliberately closed, so only the first failure gets reported.
fn mark_lost(state: &SharedState) -> bool {
    let mut state = lock(state);
    if *state == ConnectionState::Connected {
        *state = ConnectionState::Lost;
        true
    } else {
        false
    }
}

fn read_loop(
    stream: TcpStream,
    peer: SocketAddr,
    state: SharedState,
    inbound: Sender<String>,
    status: StatusSink,
) {
    let mut reader = BufReader::new(stream);
    let reason = loop {
        match read_envelope(&mut reader) {
            Ok(Some(envelope)) => {
                if inbound.send(envelope.content).is_err() {
                    return;
                }
            }
            Ok(None) => break "server closed the connection".to_string(),
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                // Framing survives a bad line, so skip it and keep reading.
                warn!(%peer, error = %err, "skipping malformed frame");
                status.emit(&StatusEvent::MalformedFrame {
                    addr: peer,
                    reason: err.to_string(),
                });
            }
            Err(err) => break err.to_string(),
        }
    };

    if mark_lost(&state) {
        warn!(%peer, %reason, "connection lost");
        status.emit(&StatusEvent::ConnectionLost { addr: peer, reason });
    } else {
        debug!(%peer, "client reader exited after cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_client_is_disconnected() {
        let mut client = ClientEndpoint::new("127.0.0.1:5000");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        let err = client.send("test message").expect_err("not connected");
        assert_eq!(err.to_string(), "Not connected to server");
        assert_eq!(client.receive(), Received::Empty);
    }

    #[test]
    fn unparseable_address_is_a_resolve_error() {
        let mut client = ClientEndpoint::new("no-port-here");
        let err = client.initialize().expect_err("cannot resolve");
        assert!(matches!(err, TransportError::Resolve { .. }));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn mark_lost_only_fires_from_connected() {
        let state: SharedState = Arc::new(Mutex::new(ConnectionState::Connected));
        assert!(mark_lost(&state));
        assert!(!mark_lost(&state));
        assert_eq!(*lock(&state), ConnectionState::Lost);

        *lock(&state) = ConnectionState::Disconnected;
        assert!(!mark_lost(&state));
        assert_eq!(*lock(&state), ConnectionState::Disconnected);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut client = ClientEndpoint::new("127.0.0.1:5000");
        assert_eq!(client.cleanup(), "Client disconnected");
        assert_eq!(client.cleanup(), "Client disconnected");
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
