//! # CFT (Chunk Flow Transport)
//!
//! Reliable exchange of fixed-size file chunks over UDP.
//!
//! ## Core features
//! - **Fixed wire format**: 16-byte header, GET / DATA / ACK packet kinds
//! - **Sliding windows**: one send window and one receive window per peer
//! - **Cumulative ACKs**: receiver only acknowledges the contiguous prefix
//! - **Fast retransmit**: triple duplicate ACK resends the lost packet
//! - **Slow start**: congestion window grows by one per fresh cumulative ACK
//! - **Single-threaded core**: all state mutation happens inside packet
//!   handlers and periodic ticks driven by one event loop
//!
//! The library owns the transport state machines only. Socket I/O, peer
//! topology, and the event loop live in the caller (see `src/bin/peer.rs`);
//! the core talks to them through the [`engine::DatagramSink`] and
//! [`store::ChunkStore`] traits.

pub mod config;
pub mod congestion;
pub mod engine;
pub mod error;
pub mod packet;
pub mod pool;
pub mod recv_window;
pub mod send_window;
pub mod store;

pub use config::Config;
pub use congestion::CongestionController;
pub use engine::{Engine, Event};
pub use error::{Error, Result};
pub use packet::{Packet, PacketKind};
pub use pool::{ConnectionPool, Direction};
pub use recv_window::ReceiveWindow;
pub use send_window::SendWindow;
pub use store::{ChunkStore, FileChunkStore};

/// Peer identifier (bounded id space, assigned by topology configuration).
pub type PeerId = u16;

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic number (packet identification).
pub const MAGIC_NUMBER: u16 = 15441;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Raw (binary) chunk hash size; hex form is twice this.
pub const HASH_LEN: usize = 20;

/// Hard cap on a single packet payload (1500-byte datagram budget).
pub const MAX_PAYLOAD: usize = 1484;

/// Default chunk size (bytes).
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Default DATA packet payload size (bytes).
pub const DEFAULT_DATA_PAYLOAD_SIZE: usize = 1024;
