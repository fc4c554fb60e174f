//! Protocol configuration.

use std::path::PathBuf;

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_DATA_PAYLOAD_SIZE};

/// CFT protocol configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chunk size (bytes). Every chunk in the master file has this size.
    pub chunk_size: usize,

    /// DATA packet payload size (bytes). Must not exceed `MAX_PAYLOAD`.
    pub data_payload_size: usize,

    /// Hard ceiling on the congestion window (packets).
    pub max_window_size: u32,

    /// Slow-start threshold.
    pub ssthresh: u32,

    /// Tear down a download flow after this long without a DATA packet.
    pub data_timeout_ms: u64,

    /// Tear down an upload flow after this long without an ACK.
    pub crash_timeout_ms: u64,

    /// Upper bound on concurrently connected peers.
    pub max_peers: usize,

    /// Periodic send tick interval for the event loop.
    pub tick_interval_ms: u64,

    /// Where to append per-flow cwnd telemetry; `None` disables the log.
    pub cwnd_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            data_payload_size: DEFAULT_DATA_PAYLOAD_SIZE,
            max_window_size: 8,
            ssthresh: 64,
            data_timeout_ms: 3000,
            crash_timeout_ms: 6000,
            max_peers: 64,
            tick_interval_ms: 20,
            cwnd_log: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for lossy links: smaller window, patient timeouts.
    pub fn lossy_network() -> Self {
        Self {
            max_window_size: 4,
            data_timeout_ms: 8000,
            crash_timeout_ms: 15000,
            tick_interval_ms: 50,
            ..Self::default()
        }
    }

    /// Number of DATA packets needed to cover one chunk.
    pub fn packets_per_chunk(&self) -> u32 {
        ((self.chunk_size + self.data_payload_size - 1) / self.data_payload_size) as u32
    }
}
