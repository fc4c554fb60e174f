//! CFT peer - chunk exchange over UDP.
//!
//! Owns the socket, the peer table, and the event loop; the transport
//! engine does the rest. Downloads are started from stdin:
//!
//!   GET <peer-id> <chunk-hash>
//!
//! Usage:
//!   cargo run --release --bin cft-peer -- [OPTIONS]
//!
//! Example:
//!   cargo run --release --bin cft-peer -- \
//!     --id 1 --peers nodes.map --chunks node1.haschunks --master master.dat

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cft::engine::DatagramSink;
use cft::{Config, Engine, Error, Event, FileChunkStore, PeerId, Result};

/// Peer process settings.
struct PeerConfig {
    id: PeerId,
    peers_path: PathBuf,
    chunks_path: PathBuf,
    master_path: PathBuf,
    output_path: PathBuf,
    config: Config,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            id: 1,
            peers_path: PathBuf::from("nodes.map"),
            chunks_path: PathBuf::from("node.haschunks"),
            master_path: PathBuf::from("master.dat"),
            output_path: PathBuf::from("download.out"),
            config: Config::default(),
        }
    }
}

fn parse_args() -> PeerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = PeerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--id" | "-i" => {
                if i + 1 < args.len() {
                    config.id = args[i + 1].parse().expect("valid peer id required");
                    i += 1;
                }
            }
            "--peers" | "-p" => {
                if i + 1 < args.len() {
                    config.peers_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--chunks" | "-c" => {
                if i + 1 < args.len() {
                    config.chunks_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--master" | "-m" => {
                if i + 1 < args.len() {
                    config.master_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    config.output_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--cwnd-log" => {
                if i + 1 < args.len() {
                    config.config.cwnd_log = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--max-window" => {
                if i + 1 < args.len() {
                    config.config.max_window_size =
                        args[i + 1].parse().expect("valid number required");
                    i += 1;
                }
            }
            "--lossy" => {
                let cwnd_log = config.config.cwnd_log.take();
                config.config = Config::lossy_network();
                config.config.cwnd_log = cwnd_log;
            }
            "--help" | "-h" => {
                println!(
                    r#"CFT Peer - Chunk Flow Transport

Exchanges fixed-size file chunks with other peers over UDP.

Usage:
  cargo run --release --bin cft-peer -- [OPTIONS]

Options:
  -i, --id <ID>           local peer id (default: 1)
  -p, --peers <PATH>      peer table, one "<id> <host> <port>" per line
  -c, --chunks <PATH>     has-chunks index, one "<id> <hash>" per line
  -m, --master <PATH>     master data file holding the local chunks
  -o, --output <PATH>     file completed chunks are appended to
  --cwnd-log <PATH>       append per-flow cwnd telemetry to this file
  --max-window <N>        congestion window ceiling (default: 8)
  --lossy                 preset for lossy links
  -h, --help              print this help

Commands (stdin):
  GET <peer-id> <chunk-hash>   download a chunk from a peer
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

/// Peer table loaded from the peers file: `<id> <host> <port>` lines.
fn load_peers(path: &PathBuf) -> Result<HashMap<PeerId, SocketAddr>> {
    let contents = std::fs::read_to_string(path)?;
    let mut peers = HashMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Error::BadPeerTable(format!("bad line: {line:?}")));
        }
        let id: PeerId = parts[0]
            .parse()
            .map_err(|_| Error::BadPeerTable(format!("bad peer id: {line:?}")))?;
        let addr: SocketAddr = format!("{}:{}", parts[1], parts[2])
            .parse()
            .map_err(|_| Error::BadPeerTable(format!("bad address: {line:?}")))?;
        peers.insert(id, addr);
    }

    Ok(peers)
}

/// Outbound side of the event loop: resolves peer ids to socket addresses.
struct UdpSink<'a> {
    socket: &'a UdpSocket,
    peers: &'a HashMap<PeerId, SocketAddr>,
}

impl DatagramSink for UdpSink<'_> {
    fn send_datagram(&mut self, peer: PeerId, bytes: &[u8]) -> Result<()> {
        let addr = self.peers.get(&peer).ok_or(Error::UnknownPeer(peer))?;
        self.socket.try_send_to(bytes, *addr)?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let peer_config = parse_args();
    let peers = load_peers(&peer_config.peers_path)?;
    let local_addr = *peers
        .get(&peer_config.id)
        .ok_or(Error::UnknownPeer(peer_config.id))?;

    let store = FileChunkStore::load(
        &peer_config.chunks_path,
        &peer_config.master_path,
        peer_config.config.chunk_size,
    )?;

    let socket = UdpSocket::bind(local_addr).await?;
    info!("CFT peer {} listening on {}", peer_config.id, local_addr);

    let addr_to_peer: HashMap<SocketAddr, PeerId> =
        peers.iter().map(|(id, addr)| (*addr, *id)).collect();

    let mut engine = Engine::new(peer_config.config.clone(), peer_config.id);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(
        peer_config.config.tick_interval_ms,
    ));
    let mut sweep = tokio::time::interval(Duration::from_millis(1000));
    let mut buf = vec![0u8; 65535];

    loop {
        let mut sink = UdpSink {
            socket: &socket,
            peers: &peers,
        };

        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, from) = result?;
                let Some(&peer) = addr_to_peer.get(&from) else {
                    warn!(%from, "datagram from unknown peer, dropped");
                    continue;
                };

                match engine.handle_datagram(&store, &mut sink, peer, &buf[..len]) {
                    Some(Event::DownloadComplete { peer, chunk_hash }) => {
                        if let Some((hash, data)) = engine.finish_download(peer) {
                            info!(peer, %hash, bytes = data.len(), "chunk downloaded");
                            append_chunk(&peer_config.output_path, &data)?;
                        } else {
                            warn!(peer, %chunk_hash, "completed download vanished");
                        }
                    }
                    Some(Event::UploadComplete { peer }) => {
                        engine.pool_mut().release(peer, cft::Direction::Upload);
                    }
                    None => {}
                }
            }

            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                if let Err(err) = handle_command(&mut engine, &mut sink, &line) {
                    warn!(%err, "command failed");
                }
            }

            _ = tick.tick() => {
                engine.tick(&mut sink);
            }

            _ = sweep.tick() => {
                for (peer, direction) in engine.sweep_timeouts() {
                    warn!(peer, %direction, "flow timed out");
                }
            }
        }
    }

    Ok(())
}

fn handle_command<T: DatagramSink>(engine: &mut Engine, sink: &mut T, line: &str) -> Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["GET", peer, hash] => {
            let peer: PeerId = peer
                .parse()
                .map_err(|_| Error::BadCommand(format!("bad peer id: {peer:?}")))?;
            engine.request_chunk(sink, peer, hash)
        }
        [] => Ok(()),
        _ => {
            warn!(line, "unknown command, expected: GET <peer-id> <chunk-hash>");
            Ok(())
        }
    }
}

fn append_chunk(path: &PathBuf, data: &[u8]) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;

    impl DatagramSink for NullSink {
        fn send_datagram(&mut self, _peer: PeerId, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_bad_peer_id_in_get_command() {
        let mut engine = Engine::new(Config::default(), 1);
        let err = handle_command(&mut engine, &mut NullSink, "GET seven cafe").unwrap_err();
        assert!(matches!(err, Error::BadCommand(_)));
    }

    #[test]
    fn test_blank_and_unknown_commands_are_tolerated() {
        let mut engine = Engine::new(Config::default(), 1);
        assert!(handle_command(&mut engine, &mut NullSink, "").is_ok());
        assert!(handle_command(&mut engine, &mut NullSink, "PUT 3 cafe").is_ok());
    }
}
