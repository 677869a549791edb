//! Peer record codec
//!
//! Records exchanged between server processes:
//! - 4 bytes body length (big-endian)
//! - bincode-serialized `Record`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum record body size (16 MB)
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size
const LENGTH_SIZE: usize = 4;

/// Record codec errors
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Record too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type RecordResult<T> = Result<T, RecordError>;

/// What a record is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordKind {
    /// Call expecting a response
    Request = 0,
    /// Fire-and-forget call
    Notify = 1,
    /// Reply to a Request, correlated by sequence number
    Response = 2,
    /// Unsolicited push toward a client session
    Push = 3,
    /// Handler response relayed to a client session
    Forward = 4,
}

impl RecordKind {
    /// Records the receive loop hands to the push queue instead of the
    /// pending-call table
    pub fn is_unsolicited(self) -> bool {
        matches!(self, RecordKind::Push | RecordKind::Forward)
    }
}

/// One RPC record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub seq: u64,
    /// `Service.Method`
    pub service_method: String,
    pub data: Bytes,
    pub kind: RecordKind,
    pub session_id: i64,
    /// Empty on success
    pub error: String,
}

impl Record {
    pub fn request(
        kind: RecordKind,
        seq: u64,
        service_method: impl Into<String>,
        session_id: i64,
        data: Bytes,
    ) -> Self {
        Self {
            seq,
            service_method: service_method.into(),
            data,
            kind,
            session_id,
            error: String::new(),
        }
    }

    /// Successful reply to `request`
    pub fn reply_to(request: &Record, data: Bytes) -> Self {
        Self {
            seq: request.seq,
            service_method: request.service_method.clone(),
            data,
            kind: RecordKind::Response,
            session_id: request.session_id,
            error: String::new(),
        }
    }

    /// Failed reply to `request`
    pub fn error_reply(request: &Record, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::reply_to(request, Bytes::new())
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Append a record to `buf`
pub fn encode(record: &Record, buf: &mut BytesMut) -> RecordResult<()> {
    let body = bincode::serialize(record)?;
    if body.len() > MAX_RECORD_SIZE {
        return Err(RecordError::TooLarge(body.len(), MAX_RECORD_SIZE));
    }

    buf.reserve(LENGTH_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(())
}

/// Take one complete record off the head of a growing buffer.
///
/// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
pub fn decode(buf: &mut BytesMut) -> RecordResult<Option<Record>> {
    if buf.len() < LENGTH_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_RECORD_SIZE {
        return Err(RecordError::TooLarge(len, MAX_RECORD_SIZE));
    }

    if buf.len() < LENGTH_SIZE + len {
        return Ok(None);
    }

    buf.advance(LENGTH_SIZE);
    let body = buf.split_to(len);
    let record = bincode::deserialize(&body)?;
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u64) -> Record {
        Record::request(
            RecordKind::Request,
            seq,
            "Room.Join",
            99,
            Bytes::from_static(b"args"),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode(&sample(7), &mut buf).unwrap();

        let decoded = decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, sample(7));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_records() {
        let mut buf = BytesMut::new();
        for seq in 0..3 {
            encode(&sample(seq), &mut buf).unwrap();
        }

        for seq in 0..3 {
            let record = decode(&mut buf).unwrap().unwrap();
            assert_eq!(record.seq, seq);
        }
        assert!(decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_partial_buffer_is_left_untouched() {
        let mut full = BytesMut::new();
        encode(&sample(1), &mut full).unwrap();

        let mut buf = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            if i + 1 < full.len() {
                assert!(decode(&mut buf).unwrap().is_none());
                assert_eq!(buf.len(), i + 1);
            }
        }
        assert_eq!(decode(&mut buf).unwrap().unwrap(), sample(1));
    }

    #[test]
    fn test_error_reply() {
        let reply = Record::error_reply(&sample(4), "boom");
        assert_eq!(reply.seq, 4);
        assert_eq!(reply.kind, RecordKind::Response);
        assert!(reply.is_error());
        assert!(reply.data.is_empty());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_RECORD_SIZE as u32 + 1);
        assert!(matches!(decode(&mut buf), Err(RecordError::TooLarge(_, _))));
    }

    #[test]
    fn test_garbage_body_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_slice(&[0xFF, 0xFF]);
        assert!(matches!(
            decode(&mut buf),
            Err(RecordError::Serialization(_))
        ));
    }

    #[test]
    fn test_unsolicited_kinds() {
        assert!(RecordKind::Push.is_unsolicited());
        assert!(RecordKind::Forward.is_unsolicited());
        assert!(!RecordKind::Response.is_unsolicited());
        assert!(!RecordKind::Request.is_unsolicited());
    }
}
