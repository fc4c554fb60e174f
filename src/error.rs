//! Error types for the CFT transport core.

use thiserror::Error;

use crate::pool::Direction;
use crate::PeerId;

/// CFT protocol error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic number: expected {expected:#06X}, got {got:#06X}")]
    InvalidMagicNumber { expected: u16, got: u16 },

    #[error("invalid protocol version: expected {expected}, got {got}")]
    InvalidVersion { expected: u8, got: u8 },

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("invalid chunk hash: {0}")]
    InvalidHash(String),

    #[error("payload too large: {len} bytes, max {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("unknown chunk: {0}")]
    UnknownChunk(String),

    #[error("peer {peer} already has an active {direction} flow")]
    DuplicateConnection { peer: PeerId, direction: Direction },

    #[error("connection pool full: {max_peers} peers")]
    PoolFull { max_peers: usize },

    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("bad chunk index file: {0}")]
    BadIndex(String),

    #[error("bad peer table: {0}")]
    BadPeerTable(String),

    #[error("bad command: {0}")]
    BadCommand(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
