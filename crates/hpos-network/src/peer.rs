// hpos-network/src/peer.rs
//
// Per-connection bookkeeping: the peer's remote address, its validator
// identity (if it announced one at handshake), when it was last heard
// from, and a bounded outbound queue feeding its dedicated write task.
// Shaped after the teacher's PeerManager (a capacity-bounded table with
// add/remove/prune) but generalized from libp2p's PeerId/reputation model
// to this chain's simpler handshake-negotiated identity.

use crate::message::NetworkMessage;
use hpos_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Outbound messages queued per peer before backpressure kicks in. A full
/// queue drops the newest message rather than blocking the sender — a
/// slow peer must not stall the rest of the network.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Drop a peer that hasn't produced a frame (including a keepalive Pong)
/// within this long.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(120);

/// Cadence for the keepalive Ping sweep.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A snapshot of a connected peer's identity, safe to hand out without
/// holding the table lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub remote_addr: SocketAddr,
    pub validator_address: Option<Address>,
    pub is_validator: bool,
    pub outbound: bool,
    pub last_seen: u64,
}

/// A live connection's outbound handle plus its identity. Owned by the
/// peer table; torn down when the connection's read or write task exits.
pub struct Peer {
    pub info: PeerRecord,
    sender: mpsc::Sender<NetworkMessage>,
}

impl Peer {
    pub fn new(
        remote_addr: SocketAddr,
        validator_address: Option<Address>,
        is_validator: bool,
        outbound: bool,
        sender: mpsc::Sender<NetworkMessage>,
    ) -> Self {
        Self {
            info: PeerRecord {
                remote_addr,
                validator_address,
                is_validator,
                outbound,
                last_seen: now_unix(),
            },
            sender,
        }
    }

    pub fn touch(&mut self) {
        self.info.last_seen = now_unix();
    }

    pub fn is_stale(&self) -> bool {
        now_unix().saturating_sub(self.info.last_seen) > PEER_TIMEOUT.as_secs()
    }

    /// Queue a message for this peer's write task. Returns the message
    /// back on failure (queue full or the write task has exited) so the
    /// caller can log it; never blocks.
    pub fn try_send(&self, message: NetworkMessage) -> Result<(), NetworkMessage> {
        self.sender.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(m) => m,
            mpsc::error::TrySendError::Closed(m) => m,
        })
    }
}

/// Table of currently connected peers, keyed by remote address.
#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<SocketAddr, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.contains_key(addr)
    }

    pub fn has_validator_address(&self, address: &Address) -> bool {
        self.peers
            .values()
            .any(|p| p.info.validator_address.as_ref() == Some(address))
    }

    pub fn insert(&mut self, peer: Peer) {
        self.peers.insert(peer.info.remote_addr, peer);
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<Peer> {
        self.peers.remove(addr)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Peer> {
        self.peers.get(addr)
    }

    pub fn touch(&mut self, addr: &SocketAddr) {
        if let Some(p) = self.peers.get_mut(addr) {
            p.touch();
        }
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.values().map(|p| p.info.clone()).collect()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.peers.keys().copied().collect()
    }

    /// Remove and return the addresses of peers that haven't been heard
    /// from within `PEER_TIMEOUT`.
    pub fn prune_stale(&mut self) -> Vec<SocketAddr> {
        let stale: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, p)| p.is_stale())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            self.peers.remove(addr);
        }
        stale
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SocketAddr, &Peer)> {
        self.peers.iter()
    }

    pub fn validators(&self) -> impl Iterator<Item = (&SocketAddr, &Peer)> {
        self.peers.iter().filter(|(_, p)| p.info.is_validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpos_crypto::Address;

    fn table_with_peer(addr: &str, is_validator: bool) -> (PeerTable, mpsc::Receiver<NetworkMessage>) {
        let mut table = PeerTable::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        table.insert(Peer::new(
            addr.parse().unwrap(),
            Some(Address::zero()),
            is_validator,
            true,
            tx,
        ));
        (table, rx)
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let (mut table, _rx) = table_with_peer("127.0.0.1:9000", false);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&"127.0.0.1:9000".parse().unwrap()));
        table.remove(&"127.0.0.1:9000".parse().unwrap());
        assert!(table.is_empty());
    }

    #[test]
    fn validators_filters_by_role() {
        let (mut table, _rx) = table_with_peer("127.0.0.1:9000", true);
        table.insert(Peer::new(
            "127.0.0.1:9001".parse().unwrap(),
            None,
            false,
            false,
            mpsc::channel(8).0,
        ));
        assert_eq!(table.validators().count(), 1);
    }

    #[test]
    fn full_queue_returns_message_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let peer = Peer::new("127.0.0.1:9000".parse().unwrap(), None, false, true, tx);
        let msg = |n: u64| NetworkMessage {
            source: Address::zero(),
            destination: None,
            body: crate::message::MessageBody::BlockRequest(n),
            timestamp: 0,
            signature: hpos_crypto::Signature::new(hpos_crypto::SignatureScheme::Ed25519, vec![0; 64]),
        };
        assert!(peer.try_send(msg(1)).is_ok());
        assert!(peer.try_send(msg(2)).is_err());
    }
}
