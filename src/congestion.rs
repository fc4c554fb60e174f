//! Slow-start congestion controller, one per upload flow.
//!
//! Deliberately simplified: the window grows by one on every fresh
//! cumulative ACK and saturates at the configured maximum. There is no
//! RTT-epoch doubling and no timeout-based backoff; conformance testing
//! depends on this exact rule.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use tracing::debug;

use crate::{PeerId, Result};

/// Congestion control phase.
///
/// Only `SlowStart` drives the growth rule; `CongestionAvoidance` is
/// bookkeeping once `cwnd` crosses `ssthresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcState {
    SlowStart,
    CongestionAvoidance,
}

/// Append-only per-flow cwnd telemetry log.
///
/// One line per sample: `f<sender>-<receiver> <elapsed_ms> <cwnd>`.
/// The underlying file handle is closed when the owning send window is
/// released.
#[derive(Debug)]
pub struct CwndLog {
    file: File,
}

impl CwndLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    fn record(&mut self, sender: PeerId, receiver: PeerId, elapsed_ms: u128, cwnd: u32) {
        // telemetry only, a failed write must not disturb the flow
        let _ = writeln!(self.file, "f{sender}-{receiver} {elapsed_ms} {cwnd}");
    }
}

/// Per-upload-flow congestion controller.
#[derive(Debug)]
pub struct CongestionController {
    state: CcState,

    /// Congestion window (packets).
    cwnd: u32,

    /// Slow-start threshold.
    ssthresh: u32,

    /// Hard window ceiling.
    max_window: u32,

    /// Flow identity, telemetry only.
    sender: PeerId,
    receiver: PeerId,
    started_at: Instant,

    log: Option<CwndLog>,
}

impl CongestionController {
    pub fn new(sender: PeerId, receiver: PeerId, ssthresh: u32, max_window: u32) -> Self {
        Self {
            state: CcState::SlowStart,
            cwnd: 1,
            ssthresh,
            max_window,
            sender,
            receiver,
            started_at: Instant::now(),
            log: None,
        }
    }

    /// Attach an append-only telemetry log for this flow.
    pub fn with_log(mut self, log: CwndLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Advance the window on a fresh cumulative ACK and return the new size.
    pub fn on_ack_advance(&mut self) -> u32 {
        self.cwnd = (self.cwnd + 1).min(self.max_window);
        if self.state == CcState::SlowStart && self.cwnd >= self.ssthresh {
            debug!(
                sender = self.sender,
                receiver = self.receiver,
                cwnd = self.cwnd,
                "entering congestion avoidance"
            );
            self.state = CcState::CongestionAvoidance;
        }

        let elapsed_ms = self.started_at.elapsed().as_millis();
        let (sender, receiver, cwnd) = (self.sender, self.receiver, self.cwnd);
        if let Some(log) = &mut self.log {
            log.record(sender, receiver, elapsed_ms, cwnd);
        }

        self.cwnd
    }

    /// Current window size used to place `last_packet_available`.
    pub fn window_size(&self) -> u32 {
        self.cwnd
    }

    pub fn state(&self) -> CcState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_grows_by_one_per_ack() {
        let mut cc = CongestionController::new(1, 2, 64, 8);
        assert_eq!(cc.window_size(), 1);
        assert_eq!(cc.on_ack_advance(), 2);
        assert_eq!(cc.on_ack_advance(), 3);
    }

    #[test]
    fn test_window_saturates_at_max() {
        let mut cc = CongestionController::new(1, 2, 64, 4);
        for _ in 0..10 {
            cc.on_ack_advance();
        }
        assert_eq!(cc.window_size(), 4);
    }

    #[test]
    fn test_state_flips_at_ssthresh() {
        let mut cc = CongestionController::new(1, 2, 3, 8);
        assert_eq!(cc.state(), CcState::SlowStart);
        cc.on_ack_advance();
        cc.on_ack_advance();
        assert_eq!(cc.state(), CcState::CongestionAvoidance);
        // the growth rule does not change with the state
        assert_eq!(cc.on_ack_advance(), 4);
    }

    #[test]
    fn test_cwnd_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cwnd.log");

        let log = CwndLog::open(&path).unwrap();
        let mut cc = CongestionController::new(3, 7, 64, 8).with_log(log);
        cc.on_ack_advance();
        cc.on_ack_advance();
        drop(cc);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("f3-7 "));
        assert!(lines[0].ends_with(" 2"));
        assert!(lines[1].ends_with(" 3"));
    }
}
