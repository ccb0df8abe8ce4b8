//! Bookkeeping for the peers a master is currently connected to.

use std::{collections::BTreeMap, fmt, net::SocketAddr, thread::JoinHandle};

/// Stable identifier for one accepted connection. Never reused within a
/// registry, so a peer reconnecting from the same address is a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(u64);

impl PeerId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

pub(crate) struct PeerEntry<C> {
    pub(crate) addr: SocketAddr,
    pub(crate) conn: C,
    pub(crate) reader: Option<JoinHandle<()>>,
}

/// Registered peers plus the running flag, guarded together by the master's
/// single lock.
pub(crate) struct PeerRegistry<C> {
    running: bool,
    next_id: u64,
    peers: BTreeMap<PeerId, PeerEntry<C>>,
}

impl<C> PeerRegistry<C> {
    pub(crate) fn new() -> Self {
        Self {
            running: true,
            next_id: 1,
            peers: BTreeMap::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn next_id(&mut self) -> PeerId {
        let id = PeerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, id: PeerId, addr: SocketAddr, conn: C) {
        self.peers.insert(
            id,
            PeerEntry {
                addr,
                conn,
                reader: None,
            },
        );
    }

    pub(crate) fn attach_reader(&mut self, id: PeerId, reader: JoinHandle<()>) {
        if let Some(entry) = self.peers.get_mut(&id) {
            entry.reader = Some(reader);
        }
    }

    pub(crate) fn remove(&mut self, id: PeerId) -> Option<PeerEntry<C>> {
        self.peers.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (PeerId, &mut PeerEntry<C>)> {
        self.peers.iter_mut().map(|(id, entry)| (*id, entry))
    }

    /// Clears the running flag and hands back every entry.
    pub(crate) fn stop(&mut self) -> Vec<PeerEntry<C>> {
        self.running = false;
        std::mem::take(&mut self.peers).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn ids_are_monotonic() {
        let mut registry: PeerRegistry<()> = PeerRegistry::new();
        let first = registry.next_id();
        let second = registry.next_id();
        assert!(second > first);
        assert_eq!(first.as_raw() + 1, second.as_raw());
    }

    #[test]
    fn same_address_reconnect_is_a_distinct_peer() {
        let mut registry = PeerRegistry::new();
        let old = registry.next_id();
        registry.insert(old, addr(6000), "old");
        let new = registry.next_id();
        registry.insert(new, addr(6000), "new");

        assert_eq!(registry.len(), 2);
        let removed = registry.remove(old).expect("old entry");
        assert_eq!(removed.conn, "old");
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(old).is_none());
    }

    #[test]
    fn stop_drains_and_clears_running() {
        let mut registry = PeerRegistry::new();
        for port in [6001, 6002] {
            let id = registry.next_id();
            registry.insert(id, addr(port), port);
        }

        let drained = registry.stop();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(!registry.is_running());
    }
}
