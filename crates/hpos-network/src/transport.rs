// hpos-network/src/transport.rs
//
// The P2P transport itself: an accept loop plus one dial per bootstrap
// peer, a length-delimited frame codec, a handshake/keepalive lifecycle
// per connection, and the three broadcast classes the node runtime uses
// to fan proposals, votes, commits and transactions out to peers.
//
// Each live connection is driven by one task (`connection_loop`) that
// multiplexes reads and the peer's outbound queue with `tokio::select!`,
// rather than the teacher's separate-tasks-per-direction split, since a
// single task sharing one socket halves the bookkeeping needed to tear a
// connection down cleanly from either side.

use crate::message::{Handshake, MessageBody, NetworkMessage, MAX_FRAME_BYTES, PROTOCOL_VERSION};
use crate::peer::{Peer, PeerRecord, PeerTable, KEEPALIVE_INTERVAL, OUTBOUND_QUEUE_CAPACITY};
use crate::{NetworkError, NetworkResult};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hpos_core::collaborators::SignatureProvider;
use hpos_crypto::Address;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// I/O timeout applied to steady-state reads/writes.
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub listen_addr: SocketAddr,
    pub bootstrap_peers: Vec<SocketAddr>,
    pub max_peers: usize,
    pub chain_id: u64,
    pub node_address: Address,
    pub is_validator: bool,
}

/// Which peers a message is fanned out to. `All` covers Commit,
/// Transaction and freshly produced BlockData; `ValidatorsOnly` covers
/// Proposal and Vote. Unicast replies (BlockData served for a
/// BlockRequest, PeerInfo announcements) go through `NetworkService::unicast`
/// instead of a broadcast class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastClass {
    All,
    ValidatorsOnly,
}

type FramedConn = Framed<TcpStream, LengthDelimitedCodec>;

/// The P2P transport: owns the peer table, the accept loop, and the
/// channel inbound application messages are forwarded to. Cheap to
/// clone — every background task and per-connection task shares the same
/// `Arc`-backed peer table and signer.
#[derive(Clone)]
pub struct NetworkService {
    config: Arc<NetworkConfig>,
    signer: Arc<dyn SignatureProvider>,
    peers: Arc<RwLock<PeerTable>>,
    inbound_tx: mpsc::Sender<NetworkMessage>,
    shutdown: broadcast::Sender<()>,
}

impl NetworkService {
    /// Build a service and its inbound channel. Does not yet bind or dial
    /// anything; call `run` for that.
    pub fn new(
        config: NetworkConfig,
        signer: Arc<dyn SignatureProvider>,
        inbound_capacity: usize,
    ) -> (Self, mpsc::Receiver<NetworkMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        let (shutdown, _) = broadcast::channel(1);
        let service = Self {
            config: Arc::new(config),
            signer,
            peers: Arc::new(RwLock::new(PeerTable::new())),
            inbound_tx,
            shutdown,
        };
        (service, inbound_rx)
    }

    /// Clone of the sender side of the shutdown broadcast; fire it to
    /// stop the accept loop, keepalive sweep, and every connection task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peer_snapshot(&self) -> Vec<PeerRecord> {
        self.peers.read().await.snapshot()
    }

    /// Run the accept loop, dial configured bootstrap peers, and run the
    /// keepalive sweep, until a shutdown signal arrives.
    pub async fn run(self) -> NetworkResult<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?;
        tracing::info!(addr = %self.config.listen_addr, "p2p transport listening");

        for addr in self.config.bootstrap_peers.clone() {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.dial(addr).await {
                    tracing::warn!(%addr, error = %err, "failed to dial bootstrap peer");
                }
            });
        }

        let keepalive = self.clone();
        tokio::spawn(async move {
            keepalive.keepalive_loop().await;
        });

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = this.handshake_inbound(stream, remote_addr).await {
                            tracing::warn!(%remote_addr, error = %err, "inbound connection rejected");
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("p2p transport shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn dial(&self, addr: SocketAddr) -> NetworkResult<()> {
        let stream = tokio::time::timeout(IO_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?;
        self.handshake_outbound(stream, addr).await
    }

    fn framed(stream: TcpStream) -> FramedConn {
        Framed::new(
            stream,
            LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_BYTES)
                .length_field_length(4)
                .new_codec(),
        )
    }

    fn admission_check(&self, table: &PeerTable, remote_addr: &SocketAddr) -> NetworkResult<()> {
        if table.contains(remote_addr) {
            return Err(NetworkError::PeerError(format!("{remote_addr} already connected")));
        }
        if table.len() >= self.config.max_peers {
            return Err(NetworkError::PeerError("peer limit reached".into()));
        }
        Ok(())
    }

    async fn handshake_outbound(&self, stream: TcpStream, remote_addr: SocketAddr) -> NetworkResult<()> {
        let mut framed = Self::framed(stream);
        self.send_handshake(&mut framed).await?;
        let remote = self.recv_handshake(&mut framed).await?;
        self.finish_handshake(framed, remote_addr, remote, true).await
    }

    async fn handshake_inbound(&self, stream: TcpStream, remote_addr: SocketAddr) -> NetworkResult<()> {
        let mut framed = Self::framed(stream);
        let remote = self.recv_handshake(&mut framed).await?;
        self.send_handshake(&mut framed).await?;
        self.finish_handshake(framed, remote_addr, remote, false).await
    }

    async fn send_handshake(&self, framed: &mut FramedConn) -> NetworkResult<()> {
        let handshake = Handshake {
            chain_id: self.config.chain_id,
            node_address: self.config.node_address,
            listen_port: self.config.listen_addr.port(),
            is_validator: self.config.is_validator,
            protocol_version: PROTOCOL_VERSION,
        };
        let bytes = bincode::serialize(&handshake).map_err(|e| NetworkError::SerializationError(e.to_string()))?;
        tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.send(Bytes::from(bytes)))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))
    }

    async fn recv_handshake(&self, framed: &mut FramedConn) -> NetworkResult<Handshake> {
        let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next())
            .await
            .map_err(|_| NetworkError::Timeout)?
            .ok_or_else(|| NetworkError::ConnectionError("connection closed during handshake".into()))?
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?;
        let handshake: Handshake =
            bincode::deserialize(&frame).map_err(|e| NetworkError::SerializationError(e.to_string()))?;
        if handshake.protocol_version != PROTOCOL_VERSION {
            return Err(NetworkError::ProtocolError(format!(
                "unsupported protocol version {}",
                handshake.protocol_version
            )));
        }
        if handshake.chain_id != self.config.chain_id {
            return Err(NetworkError::ProtocolError(format!(
                "chain id mismatch: expected {}, got {}",
                self.config.chain_id, handshake.chain_id
            )));
        }
        if handshake.node_address == self.config.node_address {
            return Err(NetworkError::ProtocolError("peer announced our own address".into()));
        }
        Ok(handshake)
    }

    async fn finish_handshake(
        &self,
        framed: FramedConn,
        remote_addr: SocketAddr,
        remote: Handshake,
        outbound: bool,
    ) -> NetworkResult<()> {
        {
            let table = self.peers.read().await;
            self.admission_check(&table, &remote_addr)?;
            if table.has_validator_address(&remote.node_address) {
                return Err(NetworkError::PeerError(format!(
                    "validator {} already connected from a different address",
                    remote.node_address
                )));
            }
        }

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        {
            let mut table = self.peers.write().await;
            self.admission_check(&table, &remote_addr)?;
            table.insert(Peer::new(
                remote_addr,
                Some(remote.node_address),
                remote.is_validator,
                outbound,
                tx,
            ));
        }
        tracing::info!(%remote_addr, validator = remote.is_validator, outbound, "peer connected");

        let (sink, stream) = framed.split();
        let this = self.clone();
        tokio::spawn(async move {
            this.connection_loop(remote_addr, sink, stream, rx).await;
        });
        Ok(())
    }

    async fn connection_loop(
        &self,
        remote_addr: SocketAddr,
        mut sink: SplitSink<FramedConn, Bytes>,
        mut stream: SplitStream<FramedConn>,
        mut outbound_rx: mpsc::Receiver<NetworkMessage>,
    ) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(bytes)) => {
                            match bincode::deserialize::<NetworkMessage>(&bytes) {
                                Ok(message) => self.handle_inbound(remote_addr, message).await,
                                Err(err) => {
                                    tracing::warn!(%remote_addr, error = %err, "malformed frame, dropping peer");
                                    break;
                                }
                            }
                        }
                        Some(Err(err)) => {
                            tracing::warn!(%remote_addr, error = %err, "read error, dropping peer");
                            break;
                        }
                        None => {
                            tracing::info!(%remote_addr, "peer closed connection");
                            break;
                        }
                    }
                }
                outgoing = outbound_rx.recv() => {
                    let Some(message) = outgoing else { break };
                    let bytes = match bincode::serialize(&message) {
                        Ok(b) => b,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize outbound message");
                            continue;
                        }
                    };
                    if tokio::time::timeout(IO_TIMEOUT, sink.send(Bytes::from(bytes))).await.is_err() {
                        tracing::warn!(%remote_addr, "write timed out, dropping peer");
                        break;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        self.peers.write().await.remove(&remote_addr);
    }

    async fn handle_inbound(&self, remote_addr: SocketAddr, message: NetworkMessage) {
        self.peers.write().await.touch(&remote_addr);
        match &message.body {
            MessageBody::Ping => {
                let pong = self.sign_message(Some(message.source), MessageBody::Pong).await;
                if let Some(peer) = self.peers.read().await.get(&remote_addr) {
                    let _ = peer.try_send(pong);
                }
            }
            MessageBody::Pong => {}
            _ => {
                if self.inbound_tx.send(message).await.is_err() {
                    tracing::warn!("inbound dispatcher channel closed, dropping message");
                }
            }
        }
    }

    async fn keepalive_loop(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stale = self.peers.write().await.prune_stale();
                    for addr in &stale {
                        tracing::info!(remote_addr = %addr, "pruned idle peer");
                    }
                    let ping = self.sign_message(None, MessageBody::Ping).await;
                    let table = self.peers.read().await;
                    for (addr, peer) in table.iter() {
                        if peer.try_send(ping.clone()).is_err() {
                            tracing::warn!(remote_addr = %addr, "outbound queue full, dropping keepalive ping");
                        }
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    async fn sign_message(&self, destination: Option<Address>, body: MessageBody) -> NetworkMessage {
        let mut message = NetworkMessage {
            source: self.signer.address(),
            destination,
            body,
            timestamp: now_unix(),
            signature: hpos_crypto::Signature::new(hpos_crypto::SignatureScheme::Ed25519, Vec::new()),
        };
        message.signature = self.signer.sign(&message.signing_bytes()).await;
        message
    }

    /// Broadcast a message to peers selected by `class`.
    pub async fn broadcast(&self, body: MessageBody, class: BroadcastClass) {
        let message = self.sign_message(None, body).await;
        let table = self.peers.read().await;
        let targets: Vec<(&SocketAddr, &Peer)> = match class {
            BroadcastClass::All => table.iter().collect(),
            BroadcastClass::ValidatorsOnly => table.validators().collect(),
        };
        for (addr, peer) in targets {
            if peer.try_send(message.clone()).is_err() {
                tracing::warn!(remote_addr = %addr, "outbound queue full, dropping broadcast frame");
            }
        }
    }

    /// Send a message to exactly one peer, identified by the validator
    /// address it announced at handshake (e.g. a `BlockData` reply to a
    /// `BlockRequest`, or a `PeerInfo` announcement to a newly joined peer).
    pub async fn unicast(&self, destination: Address, body: MessageBody) -> NetworkResult<()> {
        let message = self.sign_message(Some(destination), body).await;
        let table = self.peers.read().await;
        let peer = table
            .iter()
            .find(|(_, p)| p.info.validator_address == Some(destination))
            .map(|(_, p)| p)
            .ok_or_else(|| NetworkError::PeerError(format!("no connected peer for {destination}")))?;
        peer.try_send(message)
            .map_err(|_| NetworkError::PeerError("outbound queue full".into()))
    }
}
