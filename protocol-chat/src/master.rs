//! Listening endpoint that accepts any number of peers and fans messages in
//! and out.
//!
//! Threads:
//!
//! - one accept thread blocking on the listener;
//! - one reader thread per accepted peer, feeding the shared [`InboundQueue`].
//!
//! The peer registry and the running flag live behind a single mutex.
//! `cleanup` clears the flag, shuts every peer socket down so blocked reads
//! return, wakes the acceptor with a loopback connection, and joins all of
//! the threads.

use std::{
    io::{self, BufReader, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
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
    registry::{PeerId, PeerRegistry},
    status::{StatusEvent, StatusSink},
};

const STOPPED: &str = "Server stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    Listening,
    Stopped,
}

pub struct MasterEndpoint {
    bind_addr: String,
    config: TransportConfig,
    status: StatusSink,
    queue: InboundQueue,
    state: MasterState,
    session: Option<Session>,
}

/// Everything owned by one `initialize` .. `cleanup` cycle.
struct Session {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    acceptor: Option<JoinHandle<()>>,
}

/// State reachable from the accept and reader threads.
struct Shared {
    registry: Mutex<PeerRegistry<TcpStream>>,
    inbound: Sender<String>,
    status: StatusSink,
    config: TransportConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PeerRegistry<TcpStream>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Departure {
    Closed,
    Malformed(String),
    Failed(String),
}

impl MasterEndpoint {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self::with_config(bind_addr, TransportConfig::default())
    }

    pub fn from_host_port(host: &str, port: u16) -> Self {
        Self::new(join_host_port(host, port))
    }

    pub fn with_config(bind_addr: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            config,
            status: StatusSink::disabled(),
            queue: InboundQueue::new(),
            state: MasterState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Address actually bound, once listening. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().map(|session| session.local_addr)
    }

    pub fn peer_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.shared.lock().len())
    }

    fn start(&mut self) -> Result<SocketAddr, TransportError> {
        // std sets SO_REUSEADDR on Unix listeners, so a restart can re-bind
        // while old connections sit in TIME_WAIT.
        let bind_error = |source| TransportError::Bind {
            addr: self.bind_addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&self.bind_addr).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let shared = Arc::new(Shared {
            registry: Mutex::new(PeerRegistry::new()),
            inbound: self.queue.producer(),
            status: self.status.clone(),
            config: self.config.clone(),
        });

        let accept_shared = Arc::clone(&shared);
        let acceptor = thread::Builder::new()
            .name(format!("master-accept-{local_addr}"))
            .spawn(move || accept_loop(listener, accept_shared))
            .map_err(|source| TransportError::Spawn {
                thread: "accept",
                source,
            })?;

        self.session = Some(Session {
            shared,
            local_addr,
            acceptor: Some(acceptor),
        });
        Ok(local_addr)
    }
}

impl ProtocolHandler for MasterEndpoint {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Master
    }

    fn set_status_sink(&mut self, sink: StatusSink) {
        self.status = sink;
    }

    fn initialize(&mut self) -> Result<String, TransportError> {
        if let Some(addr) = self.local_addr() {
            return Ok(format!("Server already listening on {addr}"));
        }

        match self.start() {
            Ok(addr) => {
                self.state = MasterState::Listening;
                info!(%addr, "master listening");
                self.status.emit(&StatusEvent::Listening { addr });
                Ok(format!("Server listening on {addr}"))
            }
            Err(err) => {
                warn!(bind = %self.bind_addr, error = %err, "master failed to start");
                Err(err)
            }
        }
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let Some(session) = &self.session else {
            return Err(TransportError::NoPeers);
        };

        let mut failures = Vec::new();
        {
            let mut registry = session.shared.lock();
            if registry.is_empty() {
                return Err(TransportError::NoPeers);
            }

            let frame = Envelope::message(text).encode()?;
            for (id, peer) in registry.iter_mut() {
                if let Err(err) = peer.conn.write_all(&frame) {
                    debug!(peer = %peer.addr, %id, error = %err, "broadcast write failed");
                    failures.push(StatusEvent::DeliveryFailed {
                        addr: peer.addr,
                        reason: err.to_string(),
                    });
                }
            }
        }

        // Observers may call back into the endpoint, so report unlocked.
        for event in &failures {
            session.shared.status.emit(event);
        }
        Ok(())
    }

    fn receive(&mut self) -> Received {
        self.queue
            .try_pop()
            .map_or(Received::Empty, Received::Message)
    }

    fn cleanup(&mut self) -> String {
        let Some(mut session) = self.session.take() else {
            return STOPPED.to_string();
        };

        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        {
            let mut registry = session.shared.lock();
            for mut peer in registry.stop() {
                if let Err(err) = close_stream(&peer.conn) {
                    debug!(peer = %peer.addr, error = %err, "ignoring close error");
                }
                readers.extend(peer.reader.take());
            }
        }

        let woken = wake_acceptor(session.local_addr, &session.shared.config);
        if let Some(acceptor) = session.acceptor.take() {
            if woken {
                if acceptor.join().is_err() {
                    warn!("master accept thread panicked");
                }
            } else {
                // Joining would block until some stranger connects. The
                // thread exits on its next accept since running is cleared.
                warn!(addr = %session.local_addr, "could not wake accept thread; detaching it");
            }
        }
        for reader in readers {
            if reader.join().is_err() {
                warn!("master reader thread panicked");
            }
        }

        self.state = MasterState::Stopped;
        info!(addr = %session.local_addr, "master stopped");
        STOPPED.to_string()
    }
}

impl Drop for MasterEndpoint {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.cleanup();
        }
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    for incoming in listener.incoming() {
        if !shared.lock().is_running() {
            break;
        }
        match incoming {
            Ok(stream) => admit(stream, &shared),
            Err(err) => {
                warn!(error = %err, "failed to accept connection");
                shared.status.emit(&StatusEvent::AcceptFailed {
                    reason: err.to_string(),
                });
            }
        }
    }
    debug!("master accept loop exited");
}

fn admit(stream: TcpStream, shared: &Arc<Shared>) {
    let prepared = stream.peer_addr().and_then(|addr| {
        stream.set_write_timeout(Some(shared.config.write_timeout))?;
        let reader = stream.try_clone()?;
        Ok((addr, reader))
    });
    let (addr, reader_stream) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!(error = %err, "dropping connection that could not be prepared");
            shared.status.emit(&StatusEvent::AcceptFailed {
                reason: err.to_string(),
            });
            return;
        }
    };

    let id = {
        let mut registry = shared.lock();
        if !registry.is_running() {
            return;
        }
        let id = registry.next_id();
        registry.insert(id, addr, stream);

        // Spawned under the lock so the reader cannot try to unregister
        // before its entry exists.
        let reader_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("master-peer-{}", id.as_raw()))
            .spawn(move || read_loop(reader_stream, id, addr, reader_shared));
        match spawned {
            Ok(handle) => registry.attach_reader(id, handle),
            Err(err) => {
                warn!(peer = %addr, error = %err, "failed to spawn reader thread");
                if let Some(entry) = registry.remove(id) {
                    let _ = close_stream(&entry.conn);
                }
                return;
            }
        }
        id
    };

    info!(peer = %addr, %id, "client joined");
    shared.status.emit(&StatusEvent::PeerJoined { id, addr });
}

fn read_loop(stream: TcpStream, id: PeerId, addr: SocketAddr, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stream);
    let departure = loop {
        match read_envelope(&mut reader) {
            Ok(Some(envelope)) => {
                if shared.inbound.send(envelope.content).is_err() {
                    break Departure::Closed;
                }
                shared.status.emit(&StatusEvent::MessageReceived { addr });
            }
            Ok(None) => break Departure::Closed,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                break Departure::Malformed(err.to_string());
            }
            Err(err) => break Departure::Failed(err.to_string()),
        }
    };
    release(id, addr, departure, &shared);
}

fn release(id: PeerId, addr: SocketAddr, departure: Departure, shared: &Shared) {
    let Some(entry) = shared.lock().remove(id) else {
        // Cleanup already took this peer.
        return;
    };
    if let Err(err) = close_stream(&entry.conn) {
        debug!(peer = %addr, error = %err, "ignoring close error");
    }

    match departure {
        Departure::Closed => info!(peer = %addr, %id, "client disconnected"),
        Departure::Malformed(reason) => {
            warn!(peer = %addr, %id, %reason, "dropping client after malformed frame");
            shared
                .status
                .emit(&StatusEvent::MalformedFrame { addr, reason });
        }
        Departure::Failed(reason) => {
            warn!(peer = %addr, %id, %reason, "client connection failed");
        }
    }
    shared.status.emit(&StatusEvent::PeerLeft { id, addr });
}

fn close_stream(stream: &TcpStream) -> Result<(), TransportError> {
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
        Err(err) => Err(TransportError::Closed(err)),
    }
}

/// Unblocks `accept` by connecting to our own listener. The accept thread
/// sees the cleared running flag and exits, dropping the listener.
///
/// Returns whether the wake connection got through.
fn wake_acceptor(local_addr: SocketAddr, config: &TransportConfig) -> bool {
    let target = match local_addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local_addr.port())
        }
        _ => local_addr,
    };
    match TcpStream::connect_timeout(&target, config.wake_timeout) {
        Ok(_) => true,
        Err(err) => {
            warn!(%target, error = %err, "acceptor wake connection failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::OnceLock,
        time::{Duration, Instant},
    };

    use super::*;

    fn wait_for_peers(master: &MasterEndpoint, count: usize) {
        let start = Instant::now();
        while master.peer_count() < count {
            assert!(start.elapsed() < Duration::from_secs(3), "peers never registered");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn send_without_initialize_reports_no_clients() {
        let mut master = MasterEndpoint::new("127.0.0.1:0");
        let err = master.send("hello").expect_err("no peers");
        assert_eq!(err.to_string(), "No clients connected");
        assert_eq!(master.state(), MasterState::Idle);
    }

    #[test]
    fn cleanup_without_initialize_is_terminal_status() {
        let mut master = MasterEndpoint::new("127.0.0.1:0");
        assert_eq!(master.cleanup(), "Server stopped");
        assert_eq!(master.cleanup(), "Server stopped");
    }

    #[test]
    fn initialize_twice_keeps_the_same_listener() {
        let mut master = MasterEndpoint::new("127.0.0.1:0");
        master.initialize().expect("listen");
        let addr = master.local_addr().expect("bound");

        let again = master.initialize().expect("still listening");
        assert!(again.contains("already listening"));
        assert_eq!(master.local_addr(), Some(addr));
        master.cleanup();
    }

    #[test]
    fn bind_failure_is_a_setup_error() {
        let mut first = MasterEndpoint::new("127.0.0.1:0");
        first.initialize().expect("listen");
        let taken = first.local_addr().expect("bound").to_string();

        let mut second = MasterEndpoint::new(taken);
        let err = second.initialize().expect_err("port taken");
        assert_eq!(err.kind(), crate::error::FailureKind::Setup);
        assert!(err.to_string().starts_with("Failed to start server"));
        assert_eq!(second.state(), MasterState::Idle);

        first.cleanup();
    }

    #[test]
    fn from_host_port_binds_the_joined_address() {
        let mut master = MasterEndpoint::from_host_port("127.0.0.1", 0);
        let status = master.initialize().expect("listen");
        let addr = master.local_addr().expect("bound");
        assert!(addr.ip().is_loopback());
        assert_eq!(status, format!("Server listening on {addr}"));
        master.cleanup();
    }

    #[test]
    fn wake_reports_whether_the_listener_answered() {
        let config = TransportConfig::default();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let live = listener.local_addr().expect("addr");
        assert!(wake_acceptor(live, &config));

        drop(listener);
        assert!(!wake_acceptor(live, &config));

        let wildcard = TcpListener::bind("0.0.0.0:0").expect("bind any");
        assert!(wake_acceptor(wildcard.local_addr().expect("addr"), &config));
    }

    #[test]
    fn delivery_failures_are_reported_with_the_registry_unlocked() {
        let slot: Arc<OnceLock<Arc<Shared>>> = Arc::default();
        let unlocked = Arc::new(Mutex::new(Vec::<bool>::new()));
        let config = TransportConfig {
            write_timeout: Duration::from_millis(50),
            ..TransportConfig::default()
        };
        let mut master = MasterEndpoint::with_config("127.0.0.1:0", config);
        {
            let slot = Arc::clone(&slot);
            let unlocked = Arc::clone(&unlocked);
            master.set_status_sink(StatusSink::new(move |text| {
                if !text.starts_with("Error sending to") {
                    return;
                }
                if let Some(shared) = slot.get() {
                    let free = shared.registry.try_lock().is_ok();
                    unlocked.lock().unwrap().push(free);
                }
            }));
        }
        master.initialize().expect("listen");
        let session = master.session.as_ref().expect("session");
        let _ = slot.set(Arc::clone(&session.shared));
        let addr = session.local_addr;

        // Never reads, so its socket buffers eventually fill up.
        let _silent = TcpStream::connect(addr).expect("connect");
        wait_for_peers(&master, 1);

        let payload = "x".repeat(60 * 1024);
        for _ in 0..400 {
            master.send(&payload).expect("per-peer failures do not fail send");
            if !unlocked.lock().unwrap().is_empty() {
                break;
            }
        }

        let seen = unlocked.lock().unwrap().clone();
        assert!(!seen.is_empty(), "silent peer never caused a delivery failure");
        assert!(seen.iter().all(|free| *free));
        master.cleanup();
    }
}
