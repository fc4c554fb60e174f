//! Transport engine: stateless dispatch between the socket event loop and
//! the per-peer windows.
//!
//! The external event loop calls [`Engine::handle_datagram`] for every
//! inbound datagram and [`Engine::tick`] on its periodic timer. All
//! outbound I/O goes through the caller-supplied [`DatagramSink`]; chunk
//! contents come from the caller-supplied [`ChunkStore`]. The engine itself
//! holds only the [`ConnectionPool`] and the configuration.
//!
//! Malformed or rejected packets are dropped without a response: the
//! protocol has no NACK or error message kind, and recovery rides on
//! timeouts and retransmission.

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::congestion::{CongestionController, CwndLog};
use crate::packet::{Packet, PacketKind};
use crate::pool::{ConnectionPool, Direction};
use crate::recv_window::ReceiveWindow;
use crate::send_window::{AckOutcome, SendWindow};
use crate::store::ChunkStore;
use crate::{PeerId, Result};

/// Outbound datagram delivery, owned by the event loop.
pub trait DatagramSink {
    fn send_datagram(&mut self, peer: PeerId, bytes: &[u8]) -> Result<()>;
}

/// Completion events the engine reports back to the event loop. Teardown of
/// the finished flow is the caller's move (via [`ConnectionPool::release`]).
#[derive(Debug)]
pub enum Event {
    /// Every DATA packet of a download was received contiguously.
    DownloadComplete { peer: PeerId, chunk_hash: String },

    /// Every DATA packet of an upload was cumulatively acknowledged.
    UploadComplete { peer: PeerId },
}

/// Dispatch engine: one per process, single-threaded.
pub struct Engine {
    config: Config,
    local_id: PeerId,
    pool: ConnectionPool,
}

impl Engine {
    pub fn new(config: Config, local_id: PeerId) -> Self {
        let pool = ConnectionPool::new(&config);
        Self {
            config,
            local_id,
            pool,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ConnectionPool {
        &mut self.pool
    }

    /// Start downloading a chunk: register the pending flow and send the
    /// GET to the serving peer.
    pub fn request_chunk<T: DatagramSink>(
        &mut self,
        sink: &mut T,
        peer: PeerId,
        chunk_hash: &str,
    ) -> Result<()> {
        let get = Packet::get(chunk_hash)?;
        self.pool.expect_download(peer, chunk_hash.to_string())?;
        info!(peer, chunk_hash, "requesting chunk");
        sink.send_datagram(peer, &get.to_bytes())
    }

    /// Route one inbound datagram to the matching window.
    ///
    /// Decode and validation failures are logged and swallowed; the peer
    /// never receives an error response.
    pub fn handle_datagram<S: ChunkStore, T: DatagramSink>(
        &mut self,
        store: &S,
        sink: &mut T,
        peer: PeerId,
        raw: &[u8],
    ) -> Option<Event> {
        let packet = match Packet::from_bytes(raw) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(peer, %err, "dropping malformed datagram");
                return None;
            }
        };

        match packet.kind {
            PacketKind::Get => {
                if let Err(err) = self.handle_get(store, packet, peer) {
                    warn!(peer, %err, "GET rejected");
                }
                None
            }
            PacketKind::Data => self.handle_data(sink, packet, peer),
            PacketKind::Ack => self.handle_ack(sink, packet, peer),
        }
    }

    /// Accept a GET: resolve the chunk, build every DATA packet up front,
    /// and install the send window. The packets leave on subsequent ticks.
    fn handle_get<S: ChunkStore>(&mut self, store: &S, packet: Packet, peer: PeerId) -> Result<()> {
        if packet.payload.len() != crate::HASH_LEN {
            return Err(crate::Error::InvalidHash(packet.chunk_hash_hex()));
        }
        let chunk_hash = packet.chunk_hash_hex();
        info!(local = self.local_id, peer, %chunk_hash, "received GET");

        // reject duplicates before the chunk is read and the window built
        self.pool.ensure_upload_slot(peer)?;

        let offset = store
            .lookup(&chunk_hash)
            .ok_or_else(|| crate::Error::UnknownChunk(chunk_hash.clone()))?;

        let chunk = store.read_chunk(offset)?;
        let window = self.new_send_window(peer, chunk)?;
        self.pool.accept_get(peer, window)
    }

    fn new_send_window(&self, peer: PeerId, chunk: Bytes) -> Result<SendWindow> {
        let mut cc = CongestionController::new(
            self.local_id,
            peer,
            self.config.ssthresh,
            self.config.max_window_size,
        );
        if let Some(path) = &self.config.cwnd_log {
            cc = cc.with_log(CwndLog::open(path)?);
        }
        SendWindow::new(chunk, self.config.data_payload_size, cc)
    }

    fn handle_data<T: DatagramSink>(
        &mut self,
        sink: &mut T,
        packet: Packet,
        peer: PeerId,
    ) -> Option<Event> {
        let total_packets = self.config.packets_per_chunk();
        let window = match self.pool.download_for_data(peer, total_packets) {
            Some(window) => window,
            None => {
                // DATA from a peer we never sent a GET to; protocol
                // violation downgraded to a logged drop
                warn!(peer, seq = packet.seq, "DATA with no download flow, dropped");
                return None;
            }
        };

        let ack = window.on_data(packet);
        let complete = window.is_complete();
        let chunk_hash = window.chunk_hash().to_string();

        if let Some(ack) = ack {
            debug!(peer, ack = ack.ack, "sending ACK");
            if let Err(err) = sink.send_datagram(peer, &ack.to_bytes()) {
                warn!(peer, %err, "failed to send ACK");
            }
        }

        if complete {
            info!(peer, %chunk_hash, "download complete");
            Some(Event::DownloadComplete { peer, chunk_hash })
        } else {
            None
        }
    }

    fn handle_ack<T: DatagramSink>(
        &mut self,
        sink: &mut T,
        packet: Packet,
        peer: PeerId,
    ) -> Option<Event> {
        let window = match self.pool.upload_mut(peer) {
            Some(window) => window,
            None => {
                // ACK with no active send window; protocol violation
                // downgraded to a logged drop
                warn!(peer, ack = packet.ack, "ACK with no upload flow, dropped");
                return None;
            }
        };
        if window.unexpected_ack(packet.ack) {
            warn!(peer, ack = packet.ack, "ACK beyond chunk bounds, dropped");
            return None;
        }

        match window.on_ack(packet.ack) {
            AckOutcome::Advanced => {
                debug!(peer, ack = packet.ack, "window advanced");
            }
            AckOutcome::Ignored => {}
            AckOutcome::FastRetransmit(lost) => {
                info!(peer, seq = lost.seq, "fast retransmit");
                if let Err(err) = sink.send_datagram(peer, &lost.to_bytes()) {
                    warn!(peer, %err, "failed to retransmit");
                }
            }
        }

        if window.is_complete() {
            info!(peer, "upload complete");
            Some(Event::UploadComplete { peer })
        } else {
            None
        }
    }

    /// Periodic send tick: for every upload flow, push buffered DATA
    /// packets until `last_sent` reaches `last_available`.
    pub fn tick<T: DatagramSink>(&mut self, sink: &mut T) {
        for (peer, window) in self.pool.uploads_mut() {
            for packet in window.tick() {
                debug!(peer, seq = packet.seq, "sending DATA");
                if let Err(err) = sink.send_datagram(peer, &packet.to_bytes()) {
                    warn!(peer, %err, "failed to send DATA");
                }
            }
        }
    }

    /// Tear down flows that exceeded their inactivity timeout and report
    /// which peers were affected.
    pub fn sweep_timeouts(&mut self) -> Vec<(PeerId, Direction)> {
        let stalled = self
            .pool
            .sweep_stalled(std::time::Instant::now(), &self.config);
        for &(peer, direction) in &stalled {
            self.pool.release(peer, direction);
        }
        stalled
    }

    /// Take the assembled chunk bytes for a completed download and release
    /// the flow.
    pub fn finish_download(&mut self, peer: PeerId) -> Option<(String, Bytes)> {
        let window: ReceiveWindow = self.pool.release(peer, Direction::Download)?;
        if !window.is_complete() {
            return None;
        }
        let chunk_hash = window.chunk_hash().to_string();
        Some((chunk_hash, window.into_chunk()))
    }
}
