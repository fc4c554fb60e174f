//! Receive window: download-side sliding window for one chunk.
//!
//! The receiver never NACKs missing sequence numbers. It only ever
//! acknowledges the highest contiguous prefix received, and re-signals that
//! same value when a gap is observed; the repeated value is what drives the
//! sender's duplicate-ACK fast retransmit.

use std::collections::HashMap;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::packet::Packet;

/// Per-peer, per-chunk download state.
#[derive(Debug)]
pub struct ReceiveWindow {
    /// Hex hash of the chunk being downloaded.
    chunk_hash: String,

    /// Sparse buffer of DATA packets, keyed by sequence number.
    buffer: HashMap<u32, Packet>,

    /// Lowest sequence number not yet contiguously received; starts at 1
    /// and only ever increases.
    next_expected: u32,

    /// Number of DATA packets that cover the whole chunk.
    total_packets: u32,

    /// Payload bytes buffered so far.
    accumulated_bytes: usize,

    /// Timestamp of the last DATA arrival, for the inactivity sweep.
    last_data_at: Instant,
}

impl ReceiveWindow {
    pub fn new(chunk_hash: String, total_packets: u32) -> Self {
        Self {
            chunk_hash,
            buffer: HashMap::new(),
            next_expected: 1,
            total_packets,
            accumulated_bytes: 0,
            last_data_at: Instant::now(),
        }
    }

    /// Process one DATA packet, returning the ACK to send back (if any).
    ///
    /// - in-order arrival: advance `next_expected` past every contiguously
    ///   buffered slot and emit one cumulative ACK for `next_expected - 1`
    /// - arrival beyond `next_expected`: buffer it and emit a duplicate ACK
    ///   for `next_expected - 1` to signal the gap
    /// - arrival below `next_expected`: stale duplicate, dropped silently
    pub fn on_data(&mut self, packet: Packet) -> Option<Packet> {
        let seq = packet.seq;
        self.last_data_at = Instant::now();

        if seq < self.next_expected {
            debug!(seq, next_expected = self.next_expected, "stale DATA, dropped");
            return None;
        }

        // overwriting a prior entry keeps duplicate delivery idempotent
        if let Some(prior) = self.buffer.insert(seq, packet) {
            self.accumulated_bytes -= prior.payload.len();
        }
        self.accumulated_bytes += self.buffer[&seq].payload.len();

        if seq == self.next_expected {
            while self.buffer.contains_key(&self.next_expected) {
                self.next_expected += 1;
            }
            Some(Packet::ack(self.next_expected - 1))
        } else {
            debug!(
                seq,
                next_expected = self.next_expected,
                "gap in receive buffer, duplicate ACK"
            );
            Some(Packet::ack(self.next_expected - 1))
        }
    }

    /// Complete once every sequence number for the chunk is contiguous.
    pub fn is_complete(&self) -> bool {
        self.next_expected == self.total_packets + 1
    }

    /// Assemble the chunk from the buffered payloads, in sequence order.
    ///
    /// Only meaningful after [`is_complete`](Self::is_complete).
    pub fn into_chunk(mut self) -> Bytes {
        let mut data = BytesMut::with_capacity(self.accumulated_bytes);
        for seq in 1..=self.total_packets {
            if let Some(packet) = self.buffer.remove(&seq) {
                data.extend_from_slice(&packet.payload);
            }
        }
        data.freeze()
    }

    pub fn chunk_hash(&self) -> &str {
        &self.chunk_hash
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn accumulated_bytes(&self) -> usize {
        self.accumulated_bytes
    }

    pub fn last_data_at(&self) -> Instant {
        self.last_data_at
    }
}
