//! Wire format and packet codec.
//!
//! Every CFT datagram carries a fixed 16-byte header followed by a
//! variable-length payload, all integer fields in network byte order:
//!
//! ```text
//! magic (u16) | version (u8) | kind (u8) | header_len (u16) | payload_len (u16)
//! sequence_number (u32) | ack_number (u32) | payload ...
//! ```
//!
//! `payload_len` is `header_len + payload.len()`. The payload is a raw
//! 20-byte chunk hash for GET, chunk bytes for DATA, and empty for ACK.
//! The codec is stateless; window logic owns every decoded packet.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, HASH_LEN, HEADER_LEN, MAGIC_NUMBER, MAX_PAYLOAD, PROTOCOL_VERSION};

/// Packet kind discriminant as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Chunk request; payload is the raw chunk hash.
    Get = 2,

    /// Chunk data; payload is one window-buffered segment.
    Data = 3,

    /// Cumulative acknowledgment; no payload.
    Ack = 4,
}

impl PacketKind {
    fn from_wire(raw: u8) -> Result<Self> {
        match raw {
            2 => Ok(PacketKind::Get),
            3 => Ok(PacketKind::Data),
            4 => Ok(PacketKind::Ack),
            other => Err(Error::MalformedPacket(format!("unknown kind {other}"))),
        }
    }
}

/// A decoded (or to-be-encoded) CFT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind.
    pub kind: PacketKind,

    /// DATA sequence number (1-based); 0 for GET/ACK.
    pub seq: u32,

    /// Cumulative ack value for ACK; 0 otherwise.
    pub ack: u32,

    /// Payload bytes (empty for ACK).
    pub payload: Bytes,
}

impl Packet {
    /// Build a GET packet from a hex-encoded chunk hash string.
    pub fn get(chunk_hash: &str) -> Result<Self> {
        let raw = hex::decode(chunk_hash)
            .map_err(|_| Error::InvalidHash(chunk_hash.to_string()))?;
        if raw.len() != HASH_LEN {
            return Err(Error::InvalidHash(chunk_hash.to_string()));
        }

        Ok(Self {
            kind: PacketKind::Get,
            seq: 0,
            ack: 0,
            payload: Bytes::from(raw),
        })
    }

    /// Build a DATA packet for one chunk segment.
    pub fn data(seq: u32, payload: Bytes) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        Ok(Self {
            kind: PacketKind::Data,
            seq,
            ack: 0,
            payload,
        })
    }

    /// Build an ACK packet with an empty payload.
    pub fn ack(ack: u32) -> Self {
        Self {
            kind: PacketKind::Ack,
            seq: 0,
            ack,
            payload: Bytes::new(),
        }
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u16(MAGIC_NUMBER);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u16(HEADER_LEN as u16);
        buf.put_u16((HEADER_LEN + self.payload.len()) as u16);
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a packet from raw datagram bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(Error::MalformedPacket(format!(
                "short datagram: {} bytes",
                raw.len()
            )));
        }

        let mut buf = raw;
        let magic = buf.get_u16();
        if magic != MAGIC_NUMBER {
            return Err(Error::InvalidMagicNumber {
                expected: MAGIC_NUMBER,
                got: magic,
            });
        }

        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(Error::InvalidVersion {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let kind = PacketKind::from_wire(buf.get_u8())?;
        let header_len = buf.get_u16() as usize;
        let payload_len = buf.get_u16() as usize;

        if header_len != HEADER_LEN {
            return Err(Error::MalformedPacket(format!(
                "bad header length {header_len}"
            )));
        }
        if payload_len < header_len || payload_len > raw.len() {
            return Err(Error::MalformedPacket(format!(
                "declared length {payload_len} exceeds datagram of {} bytes",
                raw.len()
            )));
        }

        let seq = buf.get_u32();
        let ack = buf.get_u32();
        let payload = Bytes::copy_from_slice(&raw[HEADER_LEN..payload_len]);

        Ok(Self {
            kind,
            seq,
            ack,
            payload,
        })
    }

    /// Hex form of a GET payload, for store lookup and logging.
    pub fn chunk_hash_hex(&self) -> String {
        hex::encode(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "6ff0a4991tinvalid"; // not hex, used for the failure case
    const GOOD_HASH: &str = "de6f204b00ee4a1c8ea3e2f4f0d79455a0c856eb";

    #[test]
    fn test_data_round_trip() {
        let packet = Packet::data(7, Bytes::from(vec![1, 2, 3, 4, 5])).unwrap();
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(packet, restored);
    }

    #[test]
    fn test_get_round_trip() {
        let packet = Packet::get(GOOD_HASH).unwrap();
        assert_eq!(packet.payload.len(), HASH_LEN);
        assert_eq!(packet.seq, 0);

        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(restored.chunk_hash_hex(), GOOD_HASH);
    }

    #[test]
    fn test_ack_round_trip() {
        let packet = Packet::ack(42);
        let restored = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(restored.kind, PacketKind::Ack);
        assert_eq!(restored.ack, 42);
        assert!(restored.payload.is_empty());
    }

    #[test]
    fn test_invalid_hash_rejected() {
        assert!(matches!(Packet::get(HASH), Err(Error::InvalidHash(_))));
        // valid hex, wrong length
        assert!(matches!(Packet::get("deadbeef"), Err(Error::InvalidHash(_))));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = Packet::data(1, Bytes::from(vec![0u8; MAX_PAYLOAD + 1])).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut raw = Packet::ack(1).to_bytes().to_vec();
        raw[0] = 0xFF;
        assert!(matches!(
            Packet::from_bytes(&raw),
            Err(Error::InvalidMagicNumber { .. })
        ));
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut raw = Packet::ack(1).to_bytes().to_vec();
        raw[2] = 9;
        assert!(matches!(
            Packet::from_bytes(&raw),
            Err(Error::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_truncated_datagram_rejected() {
        let raw = Packet::data(1, Bytes::from(vec![0u8; 100])).unwrap().to_bytes();
        // cut the datagram below its declared payload_len
        assert!(matches!(
            Packet::from_bytes(&raw[..HEADER_LEN + 10]),
            Err(Error::MalformedPacket(_))
        ));
        assert!(matches!(
            Packet::from_bytes(&raw[..4]),
            Err(Error::MalformedPacket(_))
        ));
    }
}
