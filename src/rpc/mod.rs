//! RPC module - Multiplexed remote calls between server processes
//!
//! Provides:
//! - The peer record format exchanged between processes
//! - A client that runs many concurrent calls over one stream
//! - A handler registry and the loop that serves it on a stream

pub mod record;
mod call;
mod pending;
mod client;
mod handler;
mod server;

pub use call::*;
pub use client::*;
pub use handler::*;
pub use pending::PendingCalls;
pub use record::{Record, RecordKind};
pub use server::*;
