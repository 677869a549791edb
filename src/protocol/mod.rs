//! Protocol module - Defines the client-facing wire formats
//!
//! - `varint`: 7-bit continuation integers used for request ids
//! - `route`: route name <-> code dictionary for route compression
//! - `message`/`codec`: the request/notify/response/push message frame
//! - `packet`: length-prefixed packets that delimit message bodies on a stream

pub mod varint;
pub mod route;
mod message;
pub mod codec;
pub mod packet;

pub use message::*;
pub use codec::{CodecError, CodecResult};
pub use packet::{Packet, PacketType};
pub use route::{RouteDictionary, RouteError};

/// Default port for gamewire servers
pub const DEFAULT_PORT: u16 = 3250;
