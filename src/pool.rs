//! Connection pool: per-peer upload and download flow tables.
//!
//! At most one active flow of each direction per peer id. A second GET from
//! a peer with an active upload is rejected, never queued. Window teardown
//! releases every buffered packet and the cwnd log handle with it.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::Config;
use crate::recv_window::ReceiveWindow;
use crate::send_window::SendWindow;
use crate::{Error, PeerId, Result};

/// Flow direction, from the local peer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Process-wide table of active flows, indexed by peer id.
#[derive(Debug)]
pub struct ConnectionPool {
    uploads: HashMap<PeerId, SendWindow>,
    downloads: HashMap<PeerId, ReceiveWindow>,

    /// Chunk hashes of GETs we have sent, stamped at request time and
    /// consumed when the first DATA packet from that peer establishes the
    /// download window.
    pending_downloads: HashMap<PeerId, (String, Instant)>,

    max_peers: usize,
}

impl ConnectionPool {
    pub fn new(config: &Config) -> Self {
        Self {
            uploads: HashMap::new(),
            downloads: HashMap::new(),
            pending_downloads: HashMap::new(),
            max_peers: config.max_peers,
        }
    }

    /// Check that a new upload to `peer` would be accepted, without
    /// installing anything. Lets the caller reject a GET before the chunk
    /// is read and its send window built.
    pub fn ensure_upload_slot(&self, peer: PeerId) -> Result<()> {
        if self.uploads.contains_key(&peer) {
            return Err(Error::DuplicateConnection {
                peer,
                direction: Direction::Upload,
            });
        }
        if self.uploads.len() >= self.max_peers {
            return Err(Error::PoolFull {
                max_peers: self.max_peers,
            });
        }
        Ok(())
    }

    /// Install a send window for an accepted GET.
    ///
    /// Rejects with [`Error::DuplicateConnection`] when an upload to this
    /// peer is already active, without touching the existing window.
    pub fn accept_get(&mut self, peer: PeerId, window: SendWindow) -> Result<()> {
        self.ensure_upload_slot(peer)?;
        info!(peer, "established upload connection");
        self.uploads.insert(peer, window);
        Ok(())
    }

    /// Record the chunk hash a GET was sent for, so the first DATA packet
    /// from that peer can establish the download window.
    pub fn expect_download(&mut self, peer: PeerId, chunk_hash: String) -> Result<()> {
        if self.downloads.contains_key(&peer) || self.pending_downloads.contains_key(&peer) {
            return Err(Error::DuplicateConnection {
                peer,
                direction: Direction::Download,
            });
        }
        self.pending_downloads
            .insert(peer, (chunk_hash, Instant::now()));
        Ok(())
    }

    /// Fetch the download window for a peer, creating it on the first DATA
    /// packet when a GET is pending.
    pub fn download_for_data(
        &mut self,
        peer: PeerId,
        total_packets: u32,
    ) -> Option<&mut ReceiveWindow> {
        if !self.downloads.contains_key(&peer) {
            let (chunk_hash, _) = self.pending_downloads.remove(&peer)?;
            info!(peer, %chunk_hash, "established download connection");
            self.downloads
                .insert(peer, ReceiveWindow::new(chunk_hash, total_packets));
        }
        self.downloads.get_mut(&peer)
    }

    pub fn upload_mut(&mut self, peer: PeerId) -> Option<&mut SendWindow> {
        self.uploads.get_mut(&peer)
    }

    pub fn download_mut(&mut self, peer: PeerId) -> Option<&mut ReceiveWindow> {
        self.downloads.get_mut(&peer)
    }

    /// Iterate mutably over active uploads, for the periodic send tick.
    pub fn uploads_mut(&mut self) -> impl Iterator<Item = (PeerId, &mut SendWindow)> {
        self.uploads.iter_mut().map(|(peer, w)| (*peer, w))
    }

    /// Tear down one flow. The window value (packet buffers, cwnd log
    /// handle) is dropped here; returns it so a completed download can
    /// still be assembled by the caller.
    pub fn release(&mut self, peer: PeerId, direction: Direction) -> Option<ReceiveWindow> {
        match direction {
            Direction::Upload => {
                if self.uploads.remove(&peer).is_some() {
                    info!(peer, "released upload connection");
                }
                None
            }
            Direction::Download => {
                self.pending_downloads.remove(&peer);
                let window = self.downloads.remove(&peer);
                if window.is_some() {
                    info!(peer, "released download connection");
                }
                window
            }
        }
    }

    /// Report flows with no activity inside their timeout, so the event
    /// loop can tear them down.
    pub fn sweep_stalled(&self, now: Instant, config: &Config) -> Vec<(PeerId, Direction)> {
        let data_timeout = Duration::from_millis(config.data_timeout_ms);
        let crash_timeout = Duration::from_millis(config.crash_timeout_ms);
        let mut stalled = Vec::new();

        for (&peer, window) in &self.downloads {
            if now.duration_since(window.last_data_at()) > data_timeout {
                warn!(peer, "download stalled, no DATA inside timeout");
                stalled.push((peer, Direction::Download));
            }
        }
        for (&peer, (chunk_hash, requested_at)) in &self.pending_downloads {
            if now.duration_since(*requested_at) > data_timeout {
                warn!(peer, %chunk_hash, "GET went unanswered inside timeout");
                stalled.push((peer, Direction::Download));
            }
        }
        for (&peer, window) in &self.uploads {
            if now.duration_since(window.last_ack_at()) > crash_timeout {
                warn!(peer, "upload stalled, no ACK inside timeout");
                stalled.push((peer, Direction::Upload));
            }
        }
        stalled
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::CongestionController;
    use bytes::Bytes;

    fn send_window() -> SendWindow {
        let cc = CongestionController::new(1, 2, 64, 8);
        SendWindow::new(Bytes::from(vec![0u8; 40]), 10, cc).unwrap()
    }

    #[test]
    fn test_second_get_rejected_without_mutating() {
        let mut pool = ConnectionPool::new(&Config::default());
        pool.accept_get(3, send_window()).unwrap();
        pool.upload_mut(3).unwrap().tick();
        let before = pool.upload_mut(3).unwrap().last_sent();

        let err = pool.accept_get(3, send_window()).unwrap_err();
        assert!(matches!(err, Error::DuplicateConnection { peer: 3, .. }));
        assert_eq!(pool.upload_mut(3).unwrap().last_sent(), before);
        assert_eq!(pool.upload_count(), 1);
    }

    #[test]
    fn test_first_data_establishes_download() {
        let mut pool = ConnectionPool::new(&Config::default());
        assert!(pool.download_for_data(5, 4).is_none()); // no GET pending

        pool.expect_download(5, "cafe".into()).unwrap();
        let window = pool.download_for_data(5, 4).unwrap();
        assert_eq!(window.chunk_hash(), "cafe");
        assert_eq!(pool.download_count(), 1);
    }

    #[test]
    fn test_unanswered_get_expires_and_frees_the_peer() {
        let config = Config {
            data_timeout_ms: 0,
            ..Config::default()
        };
        let mut pool = ConnectionPool::new(&config);
        pool.expect_download(7, "cafe".into()).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let stalled = pool.sweep_stalled(Instant::now(), &config);
        assert_eq!(stalled, vec![(7, Direction::Download)]);

        // teardown clears the pending entry, so a re-request goes through
        pool.release(7, Direction::Download);
        assert!(pool.expect_download(7, "cafe".into()).is_ok());
    }

    #[test]
    fn test_duplicate_pending_download_rejected() {
        let mut pool = ConnectionPool::new(&Config::default());
        pool.expect_download(5, "cafe".into()).unwrap();
        assert!(pool.expect_download(5, "beef".into()).is_err());
    }

    #[test]
    fn test_release_frees_slot_for_new_flow() {
        let mut pool = ConnectionPool::new(&Config::default());
        pool.accept_get(3, send_window()).unwrap();
        pool.release(3, Direction::Upload);
        assert_eq!(pool.upload_count(), 0);
        assert!(pool.accept_get(3, send_window()).is_ok());
    }

    #[test]
    fn test_pool_full() {
        let config = Config {
            max_peers: 1,
            ..Config::default()
        };
        let mut pool = ConnectionPool::new(&config);
        pool.accept_get(1, send_window()).unwrap();
        assert!(matches!(
            pool.accept_get(2, send_window()),
            Err(Error::PoolFull { .. })
        ));
    }

    #[test]
    fn test_sweep_reports_stalled_flows() {
        let config = Config {
            data_timeout_ms: 0,
            crash_timeout_ms: 0,
            ..Config::default()
        };
        let mut pool = ConnectionPool::new(&config);
        pool.accept_get(1, send_window()).unwrap();
        pool.expect_download(2, "cafe".into()).unwrap();
        pool.download_for_data(2, 4).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let stalled = pool.sweep_stalled(Instant::now(), &config);
        assert_eq!(stalled.len(), 2);
    }
}
