//! Packet framing
//!
//! Packets delimit message bodies on a client stream:
//! - 1 byte packet type
//! - 3 bytes body length (big-endian)
//! - body

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::codec::{CodecError, CodecResult};

/// Header size: type(1) + length(3)
pub const PACKET_HEADER_SIZE: usize = 4;

/// Largest body a 3-byte length can describe
pub const MAX_PACKET_SIZE: usize = (1 << 24) - 1;

/// Packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Handshake = 0x01,
    HandshakeAck = 0x02,
    Heartbeat = 0x03,
    Data = 0x04,
    Kick = 0x05,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PacketType::Handshake),
            0x02 => Some(PacketType::HandshakeAck),
            0x03 => Some(PacketType::Heartbeat),
            0x04 => Some(PacketType::Data),
            0x05 => Some(PacketType::Kick),
            _ => None,
        }
    }
}

/// A framed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub body: Bytes,
}

impl Packet {
    pub fn new(kind: PacketType, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    /// A Data packet carrying an encoded message body
    pub fn data(body: impl Into<Bytes>) -> Self {
        Self::new(PacketType::Data, body)
    }

    /// Append this packet to `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> CodecResult<()> {
        let len = self.body.len();
        if len > MAX_PACKET_SIZE {
            return Err(CodecError::PacketTooLarge(len, MAX_PACKET_SIZE));
        }

        buf.reserve(PACKET_HEADER_SIZE + len);
        buf.put_u8(self.kind as u8);
        buf.put_uint(len as u64, 3);
        buf.put_slice(&self.body);
        Ok(())
    }
}

/// Take one complete packet off the head of a growing buffer.
///
/// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
/// On success the packet's bytes are split off and `buf` holds the remainder.
pub fn decode(buf: &mut BytesMut) -> CodecResult<Option<Packet>> {
    if buf.len() < PACKET_HEADER_SIZE {
        return Ok(None);
    }

    let kind = PacketType::from_u8(buf[0]).ok_or(CodecError::InvalidPacketType(buf[0]))?;
    let len = ((buf[1] as usize) << 16) | ((buf[2] as usize) << 8) | buf[3] as usize;

    if buf.len() < PACKET_HEADER_SIZE + len {
        return Ok(None);
    }

    buf.advance(PACKET_HEADER_SIZE);
    let body = buf.split_to(len).freeze();
    Ok(Some(Packet { kind, body }))
}
