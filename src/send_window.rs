//! Send window: upload-side sliding window for one chunk.
//!
//! All DATA packets for the chunk are built and buffered up front, then
//! reused for retransmission. Three frontiers track progress:
//!
//! ```text
//!  last_acked        last_sent      last_available
//!      │                 │                │
//!  ────┼─────────────────┼────────────────┼──────▶ seq space
//!      │ <── in flight ─▶│ <─ sendable ──▶│
//! ```
//!
//! `last_acked <= last_sent <= last_available` always holds, and
//! `last_available = last_acked + cwnd`.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tracing::debug;

use crate::congestion::CongestionController;
use crate::packet::Packet;
use crate::Result;

/// Outcome of feeding one ACK into the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Fresh cumulative ACK; the window advanced.
    Advanced,

    /// Duplicate ACK below the fast-retransmit threshold, or a stale value.
    Ignored,

    /// Third occurrence of the same ACK; the packet at `seq = ack` must be
    /// resent.
    FastRetransmit(Packet),
}

/// Per-peer, per-chunk upload state.
#[derive(Debug)]
pub struct SendWindow {
    /// Every DATA packet for the chunk, keyed by sequence number (1..=N).
    buffer: HashMap<u32, Packet>,

    total_packets: u32,

    /// Highest cumulatively acknowledged sequence number.
    last_acked: u32,

    /// Highest sequence number handed to the socket.
    last_sent: u32,

    /// Highest sequence number the congestion window permits.
    last_available: u32,

    /// Consecutive-occurrence counts per ACK value, reset on every window
    /// advance so a recurring ACK value cannot false-trigger a retransmit.
    dup_acks: HashMap<u32, u32>,

    cc: CongestionController,

    /// Timestamp of the last ACK arrival, for the inactivity sweep.
    last_ack_at: Instant,
}

impl SendWindow {
    /// Build the window for one chunk, slicing `chunk` into
    /// `payload_size`-byte DATA packets (the last one may be shorter).
    pub fn new(chunk: Bytes, payload_size: usize, cc: CongestionController) -> Result<Self> {
        let mut buffer = HashMap::new();
        let mut seq = 0u32;
        let mut offset = 0usize;
        while offset < chunk.len() {
            let end = (offset + payload_size).min(chunk.len());
            seq += 1;
            buffer.insert(seq, Packet::data(seq, chunk.slice(offset..end))?);
            offset = end;
        }

        let last_available = cc.window_size();
        Ok(Self {
            buffer,
            total_packets: seq,
            last_acked: 0,
            last_sent: 0,
            last_available,
            dup_acks: HashMap::new(),
            cc,
            last_ack_at: Instant::now(),
        })
    }

    /// Drain every packet the window currently permits, advancing
    /// `last_sent`. This is the only place new DATA packets leave the
    /// window; it is driven by the periodic tick, not by ACK arrival.
    pub fn tick(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();
        while self.last_sent < self.last_available.min(self.total_packets) {
            self.last_sent += 1;
            if let Some(packet) = self.buffer.get(&self.last_sent) {
                out.push(packet.clone());
            }
        }
        out
    }

    /// Process one cumulative/duplicate ACK.
    pub fn on_ack(&mut self, ack: u32) -> AckOutcome {
        self.last_ack_at = Instant::now();

        if ack > self.last_acked {
            // fresh cumulative ACK: everything up to `ack` is received
            self.dup_acks.clear();
            self.dup_acks.insert(ack, 1);
            self.last_acked = ack;
            self.last_available = self.last_acked + self.cc.on_ack_advance();
            return AckOutcome::Advanced;
        }

        let count = self.dup_acks.entry(ack).or_insert(0);
        *count += 1;
        if *count == 3 {
            // two duplicates after the original: assume the packet at
            // seq = ack is lost and resend it unconditionally
            debug!(ack, "triple duplicate ACK, fast retransmit");
            if let Some(packet) = self.buffer.get(&ack) {
                return AckOutcome::FastRetransmit(packet.clone());
            }
        }
        AckOutcome::Ignored
    }

    /// Complete once the final packet has been cumulatively acknowledged.
    pub fn is_complete(&self) -> bool {
        self.last_acked == self.total_packets
    }

    pub fn total_packets(&self) -> u32 {
        self.total_packets
    }

    pub fn last_acked(&self) -> u32 {
        self.last_acked
    }

    pub fn last_sent(&self) -> u32 {
        self.last_sent
    }

    pub fn last_available(&self) -> u32 {
        self.last_available
    }

    pub fn last_ack_at(&self) -> Instant {
        self.last_ack_at
    }

    /// `true` when the ACK value names no packet in this chunk; the engine
    /// downgrades such a protocol violation to a logged drop.
    pub fn unexpected_ack(&self, ack: u32) -> bool {
        ack > self.total_packets
    }

    #[cfg(test)]
    fn window_size(&self) -> u32 {
        self.cc.window_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::CongestionController;

    fn window(packets: u32, max_window: u32) -> SendWindow {
        let chunk = Bytes::from(vec![0u8; packets as usize * 10]);
        let cc = CongestionController::new(1, 2, 64, max_window);
        SendWindow::new(chunk, 10, cc).unwrap()
    }

    #[test]
    fn test_buffer_built_up_front() {
        let w = window(4, 8);
        assert_eq!(w.total_packets(), 4);
        assert_eq!(w.last_acked(), 0);
        assert_eq!(w.last_available(), 1);
    }

    #[test]
    fn test_short_last_segment() {
        let chunk = Bytes::from(vec![0u8; 25]);
        let cc = CongestionController::new(1, 2, 64, 8);
        let mut w = SendWindow::new(chunk, 10, cc).unwrap();
        assert_eq!(w.total_packets(), 3);

        w.last_available = 3;
        let packets = w.tick();
        assert_eq!(packets[2].payload.len(), 5);
    }

    #[test]
    fn test_tick_respects_window() {
        let mut w = window(4, 8);

        // cwnd starts at 1: only the first packet may leave
        let sent = w.tick();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].seq, 1);

        // a second tick with no ACK in between sends nothing new
        assert!(w.tick().is_empty());
    }

    #[test]
    fn test_fresh_ack_grows_window() {
        let mut w = window(4, 8);
        w.tick();

        assert_eq!(w.on_ack(1), AckOutcome::Advanced);
        assert_eq!(w.last_acked(), 1);
        assert_eq!(w.last_available(), 3); // 1 acked + cwnd 2

        let sent = w.tick();
        assert_eq!(sent.iter().map(|p| p.seq).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_triple_duplicate_triggers_single_retransmit() {
        let mut w = window(4, 8);
        w.tick();
        w.on_ack(1);
        w.tick();

        assert_eq!(w.on_ack(1), AckOutcome::Ignored); // 2nd occurrence
        match w.on_ack(1) {
            AckOutcome::FastRetransmit(packet) => assert_eq!(packet.seq, 1),
            other => panic!("expected fast retransmit, got {other:?}"),
        }
        // a fourth duplicate stays quiet
        assert_eq!(w.on_ack(1), AckOutcome::Ignored);
    }

    #[test]
    fn test_dup_counts_reset_on_advance() {
        let mut w = window(6, 8);
        w.tick();
        w.on_ack(1);
        w.on_ack(1);
        assert_eq!(w.on_ack(2), AckOutcome::Advanced);

        // the two earlier occurrences of ACK 1 must not linger: a recurring
        // value needs three fresh occurrences again
        assert_eq!(w.on_ack(2), AckOutcome::Ignored);
        assert!(matches!(w.on_ack(2), AckOutcome::FastRetransmit(_)));
    }

    #[test]
    fn test_window_never_exceeds_acked_plus_max() {
        let mut w = window(20, 4);
        for ack in 1..=10 {
            w.tick();
            w.on_ack(ack);
            assert!(w.last_available() <= w.last_acked() + 4);
        }
    }

    #[test]
    fn test_duplicates_do_not_grow_cwnd() {
        let mut w = window(8, 8);
        w.tick();
        w.on_ack(1);
        let cwnd = w.window_size();
        w.on_ack(1);
        w.on_ack(1);
        assert_eq!(w.window_size(), cwnd);
    }

    #[test]
    fn test_completion() {
        let mut w = window(2, 8);
        w.tick();
        w.on_ack(1);
        assert!(!w.is_complete());
        w.tick();
        w.on_ack(2);
        assert!(w.is_complete());
    }
}
