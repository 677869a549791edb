//! In-flight calls
//!
//! A `Call` is created by the caller, moved into the pending-call table while
//! a reply is outstanding, and handed back through its completion queue
//! exactly once.

use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::record::RecordError;

/// Call errors
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// The connection is closing or closed
    #[error("connection is shut down")]
    Shutdown,

    /// The peer closed the stream while calls were outstanding
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),

    #[error("protocol error: {0}")]
    Protocol(Arc<RecordError>),

    /// The callee reported failure
    #[error("{0}")]
    Remote(String),
}

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        RpcError::Transport(Arc::new(err))
    }
}

impl From<RecordError> for RpcError {
    fn from(err: RecordError) -> Self {
        RpcError::Protocol(Arc::new(err))
    }
}

impl RpcError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, RpcError::Shutdown)
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Arguments of one invocation
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub service: String,
    pub method: String,
    pub args: Bytes,
    /// Frontend session the call acts on behalf of
    pub session_id: i64,
    /// Output slot; `None` makes the call fire-and-forget
    pub reply: Option<BytesMut>,
}

impl CallRequest {
    pub fn new(service: impl Into<String>, method: impl Into<String>, args: impl Into<Bytes>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            args: args.into(),
            session_id: 0,
            reply: None,
        }
    }

    pub fn with_session(mut self, session_id: i64) -> Self {
        self.session_id = session_id;
        self
    }

    /// Expect a reply, appended to `slot`
    pub fn with_reply(mut self, slot: BytesMut) -> Self {
        self.reply = Some(slot);
        self
    }

    /// Expect a reply in a fresh buffer
    pub fn expect_reply(self) -> Self {
        self.with_reply(BytesMut::new())
    }

    pub fn service_method(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}

/// An active call
#[derive(Debug)]
pub struct Call {
    pub service_method: String,
    pub args: Bytes,
    pub session_id: i64,
    /// Receives the result bytes on success
    pub reply: Option<BytesMut>,
    /// Set on failure
    pub error: Option<RpcError>,
    done: mpsc::Sender<Call>,
}

impl Call {
    pub(crate) fn new(request: CallRequest, done: mpsc::Sender<Call>) -> Self {
        Self {
            service_method: request.service_method(),
            args: request.args,
            session_id: request.session_id,
            reply: request.reply,
            error: None,
            done,
        }
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// The reply slot, or the error the call completed with
    pub fn into_result(self) -> RpcResult<Option<BytesMut>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.reply),
        }
    }

    pub(crate) fn fill_reply(&mut self, data: &[u8]) {
        if let Some(slot) = self.reply.as_mut() {
            slot.extend_from_slice(data);
        }
    }

    pub(crate) fn fail(mut self, err: RpcError) {
        self.error = Some(err);
        self.complete();
    }

    /// Hand the call back through its completion queue.
    ///
    /// Never blocks: if the queue is full the signal is dropped. Sizing the
    /// queue for the number of calls sharing it is the caller's job.
    pub(crate) fn complete(self) {
        let done = self.done.clone();
        match done.try_send(self) {
            Ok(()) => {}
            Err(TrySendError::Full(call)) => {
                tracing::warn!(
                    "discarding completion of {}: done queue is full",
                    call.service_method
                );
            }
            Err(TrySendError::Closed(call)) => {
                tracing::debug!(
                    "discarding completion of {}: nobody is waiting",
                    call.service_method
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CallRequest::new("Room", "Join", &b"args"[..])
            .with_session(12)
            .expect_reply();
        assert_eq!(request.service_method(), "Room.Join");
        assert_eq!(request.session_id, 12);
        assert!(request.reply.is_some());
    }

    #[tokio::test]
    async fn test_complete_delivers_call() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut call = Call::new(CallRequest::new("Room", "Join", Bytes::new()).expect_reply(), tx);
        call.fill_reply(b"joined");
        call.complete();

        let done = rx.recv().await.unwrap();
        let reply = done.into_result().unwrap().unwrap();
        assert_eq!(&reply[..], b"joined");
    }

    #[tokio::test]
    async fn test_complete_never_blocks_on_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let first = Call::new(CallRequest::new("A", "B", Bytes::new()), tx.clone());
        let second = Call::new(CallRequest::new("A", "C", Bytes::new()), tx);

        first.complete();
        second.fail(RpcError::Shutdown);

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.service_method, "A.B");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fill_reply_appends_to_slot() {
        let (tx, _rx) = mpsc::channel(1);
        let mut slot = BytesMut::new();
        slot.extend_from_slice(b"prefix:");
        let mut call = Call::new(CallRequest::new("A", "B", Bytes::new()).with_reply(slot), tx);
        call.fill_reply(b"data");
        assert_eq!(&call.reply.unwrap()[..], b"prefix:data");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(RpcError::Shutdown.to_string(), "connection is shut down");
        assert_eq!(RpcError::UnexpectedEof.to_string(), "unexpected end of stream");
        assert_eq!(RpcError::Remote("no room".into()).to_string(), "no room");
    }
}
