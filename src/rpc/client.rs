//! RPC client
//!
//! Multiplexes many concurrent calls over one stream. Requests carry a
//! sequence number; a background receive loop matches responses back to
//! their calls in whatever order they arrive, and forwards pushes and
//! relayed responses to a shared queue.
//!
//! Lock order is always send lock, then table lock.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use super::call::{Call, CallRequest, RpcError, RpcResult};
use super::pending::PendingCalls;
use super::record::{self, Record, RecordKind};
use crate::network::{self, NetworkConfig};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type ShutdownCallback = Box<dyn FnOnce() + Send>;

/// Write side, guarded by the send lock
struct Sender {
    writer: BoxedWriter,
    buf: BytesMut,
}

impl Sender {
    async fn write_record(&mut self, record: &Record) -> RpcResult<()> {
        self.buf.clear();
        record::encode(record, &mut self.buf)?;
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Guarded by the table lock
struct State {
    seq: u64,
    pending: PendingCalls,
    /// The user called `close`
    closing: bool,
    /// The receive loop has stopped
    shutdown: bool,
    /// Pending calls have been completed after shutdown
    drained: bool,
    on_shutdown: Option<ShutdownCallback>,
}

struct Inner {
    sender: tokio::sync::Mutex<Sender>,
    state: Mutex<State>,
    close_requested: Notify,
    done_queue_capacity: usize,
}

/// Why the receive loop stopped
enum LoopEnd {
    Closed,
    Eof,
    Failed(RpcError),
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one decoded record
    fn dispatch(&self, record: Record, pushes: &mpsc::Sender<Record>) {
        if record.kind.is_unsolicited() {
            match pushes.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(record)) => {
                    tracing::error!(
                        "rpc: push queue full, dropping {} for session {}",
                        record.service_method,
                        record.session_id
                    );
                }
                Err(TrySendError::Closed(record)) => {
                    tracing::debug!(
                        "rpc: no push consumer, dropping {}",
                        record.service_method
                    );
                }
            }
            return;
        }

        let call = self.state().pending.remove(record.seq);
        let Some(mut call) = call else {
            // Usually a report about a call whose write already failed
            tracing::debug!("rpc: discarding response with unknown sequence {}", record.seq);
            return;
        };

        if record.is_error() {
            call.fail(RpcError::Remote(record.error));
        } else {
            call.fill_reply(&record.data);
            call.complete();
        }
    }

    /// Mark the client shut down and fail every pending call
    async fn terminate(&self, end: LoopEnd) {
        let sender = self.sender.lock().await;
        let callback = {
            let mut state = self.state();
            state.shutdown = true;
            let closing = state.closing;

            let err = match end {
                LoopEnd::Closed => RpcError::Shutdown,
                LoopEnd::Eof if closing => RpcError::Shutdown,
                LoopEnd::Eof => RpcError::UnexpectedEof,
                LoopEnd::Failed(err) => err,
            };

            match &err {
                RpcError::Shutdown => tracing::debug!("rpc: client closed"),
                RpcError::UnexpectedEof => tracing::warn!("rpc: peer closed the connection"),
                err if !closing => tracing::error!("rpc: client protocol error: {}", err),
                err => tracing::debug!("rpc: receive loop ended while closing: {}", err),
            }

            let pending = state.pending.len();
            for (_, call) in state.pending.drain() {
                call.fail(err.clone());
            }
            if pending > 0 {
                tracing::info!("rpc: failed {} pending calls: {}", pending, err);
            }

            state.drained = true;
            state.on_shutdown.take()
        };
        drop(sender);

        if let Some(callback) = callback {
            callback();
        }
    }
}

async fn receive_loop<R>(
    inner: Arc<Inner>,
    mut reader: R,
    pushes: mpsc::Sender<Record>,
    read_buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(read_buffer_size);

    let end = 'read: loop {
        buf.reserve(read_buffer_size);
        let n = tokio::select! {
            biased;
            _ = inner.close_requested.notified() => break 'read LoopEnd::Closed,
            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => break 'read LoopEnd::Eof,
                Ok(n) => n,
                Err(e) => break 'read LoopEnd::Failed(e.into()),
            },
        };
        tracing::trace!("rpc: read {} bytes, {} buffered", n, buf.len());

        loop {
            match record::decode(&mut buf) {
                Ok(Some(record)) => inner.dispatch(record, &pushes),
                Ok(None) => break,
                Err(e) => break 'read LoopEnd::Failed(e.into()),
            }
        }
    };

    inner.terminate(end).await;
}

/// Handle to a sent call
#[derive(Debug)]
pub struct Invocation {
    /// Sequence number, for calls that expect a reply and were registered
    pub seq: Option<u64>,
    done: Option<mpsc::Receiver<Call>>,
}

impl Invocation {
    /// The completion queue the client allocated, if the caller supplied none
    pub fn take_done(&mut self) -> Option<mpsc::Receiver<Call>> {
        self.done.take()
    }

    /// Wait on the client-allocated completion queue.
    ///
    /// Returns `None` when the caller supplied its own queue, or when a
    /// fire-and-forget call was written and will never complete.
    pub async fn wait(mut self) -> Option<Call> {
        self.done.as_mut()?.recv().await
    }
}

/// Shared consumer side of the push queue
#[derive(Clone)]
pub struct PushReceiver {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Record>>>,
}

impl PushReceiver {
    fn new(rx: mpsc::Receiver<Record>) -> Self {
        Self {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Next push or relayed response; `None` once the client has shut down
    /// and the queue is empty
    pub async fn recv(&self) -> Option<Record> {
        self.rx.lock().await.recv().await
    }

    pub fn try_recv(&self) -> Option<Record> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

/// RPC client bound to one stream
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Wrap an established stream and start its receive loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, config: &NetworkConfig) -> (Self, PushReceiver)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (push_tx, push_rx) = mpsc::channel(config.push_queue_capacity.max(1));

        let inner = Arc::new(Inner {
            sender: tokio::sync::Mutex::new(Sender {
                writer: Box::new(writer),
                buf: BytesMut::with_capacity(config.read_buffer_size),
            }),
            state: Mutex::new(State {
                seq: 0,
                pending: PendingCalls::new(),
                closing: false,
                shutdown: false,
                drained: false,
                on_shutdown: None,
            }),
            close_requested: Notify::new(),
            done_queue_capacity: config.done_queue_capacity.max(1),
        });

        tokio::spawn(receive_loop(
            inner.clone(),
            reader,
            push_tx,
            config.read_buffer_size.max(1),
        ));

        (Self { inner }, PushReceiver::new(push_rx))
    }

    /// Connect over TCP
    pub async fn dial(addr: SocketAddr, config: &NetworkConfig) -> RpcResult<(Self, PushReceiver)> {
        let stream = network::connect(addr, config).await?;
        Ok(Self::new(stream, config))
    }

    /// Send a call.
    ///
    /// When `done` is `None` a completion queue is allocated and returned in
    /// the `Invocation`. A supplied queue must have room for every call
    /// sharing it; completions that do not fit are dropped.
    pub async fn invoke(
        &self,
        kind: RecordKind,
        request: CallRequest,
        done: Option<mpsc::Sender<Call>>,
    ) -> Invocation {
        let (done, receiver) = match done {
            Some(done) => (done, None),
            None => {
                let (tx, rx) = mpsc::channel(self.inner.done_queue_capacity);
                (tx, Some(rx))
            }
        };

        let seq = self.send(kind, Call::new(request, done)).await;
        Invocation {
            seq,
            done: receiver,
        }
    }

    /// Send a call and wait for it to complete.
    ///
    /// A fire-and-forget call resolves to `Ok(None)` once written.
    pub async fn invoke_sync(
        &self,
        kind: RecordKind,
        request: CallRequest,
    ) -> RpcResult<Option<BytesMut>> {
        let (tx, mut rx) = mpsc::channel(1);
        self.invoke(kind, request, Some(tx)).await;

        match rx.recv().await {
            Some(call) => call.into_result(),
            None => Ok(None),
        }
    }

    async fn send(&self, kind: RecordKind, call: Call) -> Option<u64> {
        let mut sender = self.inner.sender.lock().await;

        // Register before writing so a fast response always finds its call
        let (seq, record, untracked) = {
            let mut state = self.inner.state();
            if state.closing || state.shutdown {
                drop(state);
                call.fail(RpcError::Shutdown);
                return None;
            }

            let seq = state.seq;
            let record = Record::request(
                kind,
                seq,
                call.service_method.clone(),
                call.session_id,
                call.args.clone(),
            );

            if call.expects_reply() {
                state.seq += 1;
                state.pending.insert(seq, call);
                (seq, record, None)
            } else {
                (seq, record, Some(call))
            }
        };
        let tracked = untracked.is_none();

        if let Err(err) = sender.write_record(&record).await {
            tracing::error!("rpc: failed to send {}: {}", record.service_method, err);
            let call = match untracked {
                Some(call) => Some(call),
                None => self.inner.state().pending.remove(seq),
            };
            if let Some(call) = call {
                call.fail(err);
            }
        }

        tracked.then_some(seq)
    }

    /// Close the connection. Pending calls fail with `Shutdown`.
    pub async fn close(&self) -> RpcResult<()> {
        let already_down = {
            let mut state = self.inner.state();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
            state.shutdown
        };

        self.inner.close_requested.notify_one();

        let mut sender = self.inner.sender.lock().await;
        match sender.writer.shutdown().await {
            Ok(()) => Ok(()),
            // The stream already failed; closing it is all that is left to do
            Err(e) if already_down => {
                tracing::debug!("rpc: closing a failed stream: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run `callback` once the receive loop has stopped and pending calls
    /// have been failed. Runs immediately if that already happened.
    pub fn on_shutdown<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state();
        if state.drained {
            drop(state);
            callback();
            return;
        }

        if state.on_shutdown.replace(Box::new(callback)).is_some() {
            tracing::warn!("rpc: replacing shutdown callback");
        }
    }

    pub fn is_closing(&self) -> bool {
        self.inner.state().closing
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state().shutdown
    }

    /// Number of calls awaiting a response
    pub fn pending_len(&self) -> usize {
        self.inner.state().pending.len()
    }
}
