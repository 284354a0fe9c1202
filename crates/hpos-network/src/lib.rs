// hpos-network/src/lib.rs

//! Validator-priority P2P transport.
//!
//! Framed TCP links between nodes: length-delimited frames carrying a
//! typed `NetworkMessage`, a chain-id-checked handshake, Ping/Pong
//! keepalive, and three ways to fan a message out — every peer, only
//! peers that announced themselves as validators, or a single peer by
//! validator address.

pub mod message;
pub mod peer;
pub mod transport;

pub use message::{Handshake, MessageBody, MessageKind, NetworkMessage, MAX_FRAME_BYTES, PROTOCOL_VERSION};
pub use peer::{Peer, PeerRecord, PeerTable, KEEPALIVE_INTERVAL, OUTBOUND_QUEUE_CAPACITY, PEER_TIMEOUT};
pub use transport::{BroadcastClass, NetworkConfig, NetworkService, IO_TIMEOUT};

/// Result type for networking operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors that can occur during networking operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("peer error: {0}")]
    PeerError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("timeout")]
    Timeout,
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test to ensure all modules compile together.
    }
}
