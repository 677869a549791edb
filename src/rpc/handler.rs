//! Handler registry
//!
//! Maps `Service.Method` names to handlers behind one uniform signature.
//! The registry is filled at startup and then shared read-only, so method
//! resolution never changes while requests are being served.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = HandlerRegistry::new();
//! registry.register("Room.Join", |ctx: RequestContext, room: String| async move {
//!     Ok(format!("session {} joined {}", ctx.session_id, room))
//! })?;
//! let registry = Arc::new(registry);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use super::record::{Record, RecordKind};
use super::server::Outbound;
use super::call::{RpcError, RpcResult};

/// Handler errors
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("rpc: can't find method {0}")]
    UnknownMethod(String),

    #[error("Method already registered: {0}")]
    Duplicate(String),

    #[error("Invalid method name: {0} (expected Service.Method)")]
    InvalidName(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Failure reported by the handler itself
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// What a handler knows about the request it is serving
#[derive(Clone)]
pub struct RequestContext {
    pub seq: u64,
    pub service_method: String,
    pub session_id: i64,
    pub kind: RecordKind,
    outbound: Option<Outbound>,
}

impl RequestContext {
    pub fn new(service_method: impl Into<String>, session_id: i64) -> Self {
        Self {
            seq: 0,
            service_method: service_method.into(),
            session_id,
            kind: RecordKind::Request,
            outbound: None,
        }
    }

    pub(crate) fn for_record(record: &Record, outbound: Outbound) -> Self {
        Self {
            seq: record.seq,
            service_method: record.service_method.clone(),
            session_id: record.session_id,
            kind: record.kind,
            outbound: Some(outbound),
        }
    }

    /// Push `data` to this request's session through the calling connection
    pub async fn push(&self, route: &str, data: Bytes) -> RpcResult<()> {
        let outbound = self.outbound.as_ref().ok_or(RpcError::Shutdown)?;
        let record = Record::request(RecordKind::Push, 0, route, self.session_id, data);
        outbound.send(&record).await
    }
}

/// A callable method
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &RequestContext, args: Bytes) -> HandlerResult<Bytes>;
}

/// Handler over raw argument and result bytes
pub struct RawHandler<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> Handler for RawHandler<F>
where
    F: Fn(RequestContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Bytes>> + Send + 'static,
{
    async fn call(&self, ctx: &RequestContext, args: Bytes) -> HandlerResult<Bytes> {
        (self.handler)(ctx.clone(), args).await
    }
}

/// Handler that decodes its arguments and encodes its result with bincode
pub struct TypedHandler<F, T, R, Fut> {
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, Fut)>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(RequestContext, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(RequestContext, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    async fn call(&self, ctx: &RequestContext, args: Bytes) -> HandlerResult<Bytes> {
        let args: T = bincode::deserialize(&args)?;
        let result = (self.handler)(ctx.clone(), args).await?;
        Ok(Bytes::from(bincode::serialize(&result)?))
    }
}

/// Registry mapping method names to handlers
#[derive(Default)]
pub struct HandlerRegistry {
    methods: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler
    pub fn register<F, T, R, Fut>(&mut self, name: &str, handler: F) -> HandlerResult<()>
    where
        F: Fn(RequestContext, T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        self.register_handler(name, Arc::new(TypedHandler::new(handler)))
    }

    /// Register a handler over raw bytes
    pub fn register_raw<F, Fut>(&mut self, name: &str, handler: F) -> HandlerResult<()>
    where
        F: Fn(RequestContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Bytes>> + Send + 'static,
    {
        self.register_handler(name, Arc::new(RawHandler { handler }))
    }

    pub fn register_handler(&mut self, name: &str, handler: Arc<dyn Handler>) -> HandlerResult<()> {
        let name = name.trim();
        let valid = matches!(
            name.split_once('.'),
            Some((service, method)) if !service.is_empty() && !method.is_empty() && !method.contains('.')
        );
        if !valid {
            return Err(HandlerError::InvalidName(name.to_string()));
        }

        if self.methods.contains_key(name) {
            return Err(HandlerError::Duplicate(name.to_string()));
        }

        tracing::debug!("Registered method {}", name);
        self.methods.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.methods.get(name).cloned()
    }

    /// Run the handler named by `ctx.service_method`
    pub async fn dispatch(&self, ctx: &RequestContext, args: Bytes) -> HandlerResult<Bytes> {
        let handler = self
            .resolve(&ctx.service_method)
            .ok_or_else(|| HandlerError::UnknownMethod(ctx.service_method.clone()))?;
        handler.call(ctx, args).await
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct JoinArgs {
        room: String,
        seat: u8,
    }

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register("Room.Join", |ctx: RequestContext, args: JoinArgs| async move {
                if args.seat > 4 {
                    return Err(HandlerError::failed("no such seat"));
                }
                Ok(format!("{}:{}:{}", ctx.session_id, args.room, args.seat))
            })
            .unwrap();
        registry
            .register_raw("Sys.Echo", |_ctx, args: Bytes| async move {
                Ok::<_, HandlerError>(args)
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_typed_dispatch() {
        let registry = registry();
        let args = bincode::serialize(&JoinArgs {
            room: "lobby".into(),
            seat: 2,
        })
        .unwrap();

        let ctx = RequestContext::new("Room.Join", 77);
        let reply = registry.dispatch(&ctx, args.into()).await.unwrap();
        let reply: String = bincode::deserialize(&reply).unwrap();
        assert_eq!(reply, "77:lobby:2");
    }

    #[tokio::test]
    async fn test_handler_failure_surfaces() {
        let registry = registry();
        let args = bincode::serialize(&JoinArgs {
            room: "lobby".into(),
            seat: 9,
        })
        .unwrap();

        let err = registry
            .dispatch(&RequestContext::new("Room.Join", 1), args.into())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no such seat");
    }

    #[tokio::test]
    async fn test_bad_arguments_are_serialization_errors() {
        let registry = registry();
        let err = registry
            .dispatch(&RequestContext::new("Room.Join", 1), Bytes::from_static(&[1]))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_raw_dispatch_and_unknown_method() {
        let registry = registry();
        let reply = registry
            .dispatch(&RequestContext::new("Sys.Echo", 0), Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(&reply[..], b"ping");

        let err = registry
            .dispatch(&RequestContext::new("Sys.Missing", 0), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "rpc: can't find method Sys.Missing");
    }

    #[test]
    fn test_registration_rules() {
        let mut registry = registry();
        let echo = |_ctx: RequestContext, args: Bytes| async move { Ok::<_, HandlerError>(args) };

        assert!(matches!(
            registry.register_raw("Sys.Echo", echo),
            Err(HandlerError::Duplicate(_))
        ));
        for bad in ["Echo", ".Echo", "Sys.", "Sys.Echo.Twice"] {
            assert!(matches!(
                registry.register_raw(bad, echo),
                Err(HandlerError::InvalidName(_))
            ));
        }
        assert_eq!(registry.methods(), vec!["Room.Join", "Sys.Echo"]);
        assert!(registry.resolve("Room.Join").is_some());
    }

    #[tokio::test]
    async fn test_push_without_connection_fails() {
        let ctx = RequestContext::new("Room.Join", 3);
        let err = ctx.push("Room.Update", Bytes::new()).await.unwrap_err();
        assert!(err.is_shutdown());
    }
}
