//! Serving side of the RPC protocol
//!
//! Reads request records from one stream, runs them against a handler
//! registry and writes the responses back. Each request runs in its own
//! task; responses go out in completion order, correlated by sequence number.

use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::call::{RpcError, RpcResult};
use super::handler::{HandlerRegistry, RequestContext};
use super::record::{self, Record, RecordKind};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serialized write access to a connection
#[derive(Clone)]
pub struct Outbound {
    writer: Arc<tokio::sync::Mutex<BoxedWriter>>,
}

impl Outbound {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
        }
    }

    /// Write one record as a unit
    pub async fn send(&self, record: &Record) -> RpcResult<()> {
        let mut buf = BytesMut::new();
        record::encode(record, &mut buf)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&self) -> RpcResult<()> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Serve requests on `stream` until the peer closes it.
///
/// A clean close between records returns `Ok`; a close in the middle of a
/// record is `UnexpectedEof`.
pub async fn serve_connection<S>(stream: S, registry: Arc<HandlerRegistry>) -> RpcResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let outbound = Outbound::new(writer);
    let mut buf = BytesMut::with_capacity(4096);

    let result = loop {
        match decode_all(&mut buf, &registry, &outbound) {
            Ok(()) => {}
            Err(e) => break Err(e),
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) if buf.is_empty() => break Ok(()),
            Ok(0) => break Err(RpcError::UnexpectedEof),
            Ok(_) => {}
            Err(e) => break Err(e.into()),
        }
    };

    if let Err(e) = outbound.shutdown().await {
        tracing::debug!("rpc: shutting down connection: {}", e);
    }
    result
}

fn decode_all(
    buf: &mut BytesMut,
    registry: &Arc<HandlerRegistry>,
    outbound: &Outbound,
) -> RpcResult<()> {
    while let Some(record) = record::decode(buf)? {
        match record.kind {
            RecordKind::Request | RecordKind::Notify => {
                let registry = registry.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    handle_record(record, registry, outbound).await;
                });
            }
            kind => {
                tracing::warn!(
                    "rpc: ignoring {:?} record for {} on serving side",
                    kind,
                    record.service_method
                );
            }
        }
    }
    Ok(())
}

async fn handle_record(record: Record, registry: Arc<HandlerRegistry>, outbound: Outbound) {
    let ctx = RequestContext::for_record(&record, outbound.clone());
    let result = registry.dispatch(&ctx, record.data.clone()).await;

    if record.kind == RecordKind::Notify {
        if let Err(e) = result {
            tracing::warn!("rpc: notify {} failed: {}", record.service_method, e);
        }
        return;
    }

    let reply = match result {
        Ok(data) => Record::reply_to(&record, data),
        Err(e) => {
            tracing::debug!("rpc: {} failed: {}", record.service_method, e);
            Record::error_reply(&record, e.to_string())
        }
    };

    if let Err(e) = outbound.send(&reply).await {
        tracing::debug!("rpc: dropping reply to {}: {}", record.service_method, e);
    }
}
