//! Message codec
//!
//! Header byte layout: bit 0 = route compressed, bits 1-3 = message type,
//! bits 4-7 reserved (zero).
//!
//! ```text
//! request  | header | varint id | route | payload
//! notify   | header | route | payload
//! response | header | varint id | payload
//! push     | header | route | payload
//! ```
//!
//! A route is either a 2-byte big-endian dictionary code (compressed) or a
//! 1-byte length followed by the route bytes. The payload runs to the end of
//! the message body; message bodies are delimited by the packet layer.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::route::{self, RouteDictionary, RouteError};
use super::varint::{self, VarintError};
use super::{Message, MessageType};

const ROUTE_COMPRESS_MASK: u8 = 0x01;
const TYPE_MASK: u8 = 0x07;
const RESERVED_MASK: u8 = 0xF0;
const MAX_ROUTE_LEN: usize = u8::MAX as usize;

/// Header byte plus at least one byte of id or route
pub const MIN_HEADER_LEN: usize = 2;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Wrong message type: {0}")]
    InvalidType(u8),

    #[error("Invalid message: {0} bytes is shorter than the minimum header")]
    TooShort(usize),

    #[error("Reserved header bits set: {0:#04x}")]
    ReservedBits(u8),

    #[error("Incomplete message")]
    Incomplete,

    #[error("Request id overflows 64 bits")]
    IdOverflow,

    #[error("Route too long: {0} bytes (max: 255)")]
    RouteTooLong(usize),

    #[error("Route is not valid UTF-8")]
    InvalidRoute,

    #[error("Route dictionary error: {0}")]
    Route(#[from] RouteError),

    #[error("Wrong packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Packet too large: {0} bytes (max: {1})")]
    PacketTooLarge(usize, usize),
}

impl From<VarintError> for CodecError {
    fn from(err: VarintError) -> Self {
        match err {
            VarintError::Incomplete => CodecError::Incomplete,
            VarintError::Overflow => CodecError::IdOverflow,
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Encode a message against the process-wide route dictionary
pub fn encode(message: &Message) -> CodecResult<BytesMut> {
    encode_with(message, route::routes())
}

/// Encode a message against an explicit route dictionary
pub fn encode_with(message: &Message, dict: &RouteDictionary) -> CodecResult<BytesMut> {
    let kind = message.kind;
    let code = if kind.has_route() {
        dict.code(&message.route).ok()
    } else {
        None
    };

    if kind.has_route() && code.is_none() && message.route.len() > MAX_ROUTE_LEN {
        return Err(CodecError::RouteTooLong(message.route.len()));
    }

    let mut buf = BytesMut::with_capacity(
        1 + varint::MAX_VARINT_LEN + 1 + message.route.len() + message.data.len(),
    );

    let mut flag = (kind as u8) << 1;
    if code.is_some() {
        flag |= ROUTE_COMPRESS_MASK;
    }
    buf.put_u8(flag);

    if kind.has_id() {
        varint::encode(message.id, &mut buf);
    }

    if kind.has_route() {
        match code {
            Some(code) => buf.put_u16(code),
            None => {
                buf.put_u8(message.route.len() as u8);
                buf.put_slice(message.route.as_bytes());
            }
        }
    }

    buf.put_slice(&message.data);
    Ok(buf)
}

/// Decode a message body against the process-wide route dictionary
pub fn decode(data: &[u8]) -> CodecResult<Message> {
    decode_with(data, route::routes())
}

/// Decode a message body against an explicit route dictionary.
///
/// Truncated header fields yield `Incomplete`; the payload is whatever
/// follows the header.
pub fn decode_with(data: &[u8], dict: &RouteDictionary) -> CodecResult<Message> {
    if data.len() < MIN_HEADER_LEN {
        return Err(CodecError::TooShort(data.len()));
    }

    let flag = data[0];
    if flag & RESERVED_MASK != 0 {
        return Err(CodecError::ReservedBits(flag));
    }

    let type_bits = (flag >> 1) & TYPE_MASK;
    let kind = MessageType::from_u8(type_bits).ok_or(CodecError::InvalidType(type_bits))?;
    let compressed = flag & ROUTE_COMPRESS_MASK != 0;
    let mut offset = 1;

    let mut id = 0;
    if kind.has_id() {
        let (value, used) = varint::decode(&data[offset..])?;
        id = value;
        offset += used;
    }

    let mut route = String::new();
    if kind.has_route() {
        if compressed {
            let code_bytes = data.get(offset..offset + 2).ok_or(CodecError::Incomplete)?;
            let code = u16::from_be_bytes([code_bytes[0], code_bytes[1]]);
            route = dict.route(code)?.to_string();
            offset += 2;
        } else {
            let len = *data.get(offset).ok_or(CodecError::Incomplete)? as usize;
            offset += 1;
            let raw = data.get(offset..offset + len).ok_or(CodecError::Incomplete)?;
            route = std::str::from_utf8(raw)
                .map_err(|_| CodecError::InvalidRoute)?
                .to_string();
            offset += len;
        }
    }

    Ok(Message {
        kind,
        id,
        route,
        data: Bytes::copy_from_slice(&data[offset..]),
        compressed: compressed && kind.has_route(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> RouteDictionary {
        RouteDictionary::from_table([("room.join", 7), ("chat.send", 300)])
    }

    #[test]
    fn test_compressed_notify_layout() {
        let msg = Message::notify("room.join", &b"abc"[..]);
        let encoded = encode_with(&msg, &dict()).unwrap();
        assert_eq!(&encoded[..], &[0x03, 0x00, 0x07, b'a', b'b', b'c']);

        let decoded = decode_with(&encoded, &dict()).unwrap();
        assert_eq!(decoded.kind, MessageType::Notify);
        assert_eq!(decoded.route, "room.join");
        assert_eq!(&decoded.data[..], b"abc");
        assert!(decoded.compressed);
    }

    #[test]
    fn test_literal_request_layout() {
        let msg = Message::request(300, "lobby.enter", &b"{}"[..]);
        let encoded = encode_with(&msg, &dict()).unwrap();

        let mut expected = vec![0x00, 0xAC, 0x02, 11];
        expected.extend_from_slice(b"lobby.enter{}");
        assert_eq!(&encoded[..], &expected[..]);

        let decoded = decode_with(&encoded, &dict()).unwrap();
        assert!(decoded.same_content(&msg));
        assert!(!decoded.compressed);
    }

    #[test]
    fn test_response_has_no_route() {
        let msg = Message::response(5, &b"ok"[..]);
        let encoded = encode_with(&msg, &dict()).unwrap();
        assert_eq!(&encoded[..], &[0x04, 0x05, b'o', b'k']);

        let decoded = decode_with(&encoded, &dict()).unwrap();
        assert_eq!(decoded.kind, MessageType::Response);
        assert_eq!(decoded.id, 5);
        assert!(decoded.route.is_empty());
    }

    #[test]
    fn test_push_roundtrip_with_large_code() {
        let msg = Message::push("chat.send", &b"hello"[..]);
        let encoded = encode_with(&msg, &dict()).unwrap();
        assert_eq!(&encoded[..3], &[0x07, 0x01, 0x2C]);
        assert!(decode_with(&encoded, &dict()).unwrap().same_content(&msg));
    }

    #[test]
    fn test_roundtrip_independent_of_compression() {
        let messages = vec![
            Message::request(1, "room.join", &b"x"[..]),
            Message::request(u64::MAX, "room.join", Bytes::new()),
            Message::notify("unknown.route", &b"payload"[..]),
            Message::response(42, &b"reply"[..]),
            Message::push("room.join", &b""[..]),
        ];

        for msg in &messages {
            for dict in [dict(), RouteDictionary::new()] {
                let encoded = encode_with(msg, &dict).unwrap();
                let decoded = decode_with(&encoded, &dict).unwrap();
                assert!(decoded.same_content(msg), "{} did not round-trip", msg);
            }
        }
    }

    #[test]
    fn test_rejects_short_input() {
        assert_eq!(decode_with(&[], &dict()), Err(CodecError::TooShort(0)));
        assert_eq!(decode_with(&[0x02], &dict()), Err(CodecError::TooShort(1)));
    }

    #[test]
    fn test_rejects_invalid_type() {
        // type bits = 4
        assert_eq!(
            decode_with(&[0x08, 0x00, 0x00], &dict()),
            Err(CodecError::InvalidType(4))
        );
        assert_eq!(
            decode_with(&[0x0E, 0x00], &dict()),
            Err(CodecError::InvalidType(7))
        );
    }

    #[test]
    fn test_rejects_reserved_bits() {
        assert_eq!(
            decode_with(&[0x12, 0x01], &dict()),
            Err(CodecError::ReservedBits(0x12))
        );
    }

    #[test]
    fn test_unknown_code_is_an_error() {
        let encoded = [0x03, 0x00, 0x63, b'a'];
        assert_eq!(
            decode_with(&encoded, &dict()),
            Err(CodecError::Route(RouteError::UnknownCode(0x63)))
        );
    }

    #[test]
    fn test_truncated_header_is_incomplete() {
        let msg = Message::request(1 << 20, "lobby.enter", &b"data"[..]);
        let encoded = encode_with(&msg, &RouteDictionary::new()).unwrap();
        let header_len = 1 + varint::encoded_len(1 << 20) + 1 + "lobby.enter".len();

        for end in MIN_HEADER_LEN..header_len {
            assert_eq!(
                decode_with(&encoded[..end], &RouteDictionary::new()),
                Err(CodecError::Incomplete),
                "prefix of {} bytes",
                end
            );
        }
        assert!(decode_with(&encoded[..header_len], &RouteDictionary::new()).is_ok());
    }

    #[test]
    fn test_truncated_compressed_code_is_incomplete() {
        assert_eq!(decode_with(&[0x03, 0x00], &dict()), Err(CodecError::Incomplete));
    }

    #[test]
    fn test_route_too_long() {
        let msg = Message::notify("r".repeat(256), Bytes::new());
        assert_eq!(
            encode_with(&msg, &dict()),
            Err(CodecError::RouteTooLong(256))
        );

        let msg = Message::notify("r".repeat(255), Bytes::new());
        assert!(encode_with(&msg, &dict()).is_ok());
    }

    #[test]
    fn test_invalid_utf8_route() {
        assert_eq!(
            decode_with(&[0x02, 0x01, 0xFF], &dict()),
            Err(CodecError::InvalidRoute)
        );
    }
}
