//! Protocol message definitions
//!
//! A message is the logical unit exchanged between a client and a frontend
//! server: a request, a notify, a response, or a push.

use bytes::Bytes;
use std::fmt;

/// Message kinds, as carried in bits 1-3 of the header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0x00,
    Notify = 0x01,
    Response = 0x02,
    Push = 0x03,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(MessageType::Request),
            0x01 => Some(MessageType::Notify),
            0x02 => Some(MessageType::Response),
            0x03 => Some(MessageType::Push),
            _ => None,
        }
    }

    /// Request and Response carry a request id
    pub fn has_id(self) -> bool {
        matches!(self, MessageType::Request | MessageType::Response)
    }

    /// Everything except Response carries a route
    pub fn has_route(self) -> bool {
        matches!(
            self,
            MessageType::Request | MessageType::Notify | MessageType::Push
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Request => "Request",
            MessageType::Notify => "Notify",
            MessageType::Response => "Response",
            MessageType::Push => "Push",
        };
        f.write_str(name)
    }
}

/// A decoded or to-be-encoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    /// Request id; only meaningful for Request and Response
    pub id: u64,
    /// Route; empty for Response
    pub route: String,
    pub data: Bytes,
    /// Whether the route travelled as a dictionary code
    pub compressed: bool,
}

impl Message {
    pub fn request(id: u64, route: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Request,
            id,
            route: route.into(),
            data: data.into(),
            compressed: false,
        }
    }

    pub fn notify(route: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Notify,
            id: 0,
            route: route.into(),
            data: data.into(),
            compressed: false,
        }
    }

    pub fn response(id: u64, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Response,
            id,
            route: String::new(),
            data: data.into(),
            compressed: false,
        }
    }

    pub fn push(route: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Push,
            id: 0,
            route: route.into(),
            data: data.into(),
            compressed: false,
        }
    }

    /// Equality ignoring whether the route was compressed
    pub fn same_content(&self, other: &Message) -> bool {
        self.kind == other.kind
            && (!self.kind.has_id() || self.id == other.id)
            && (!self.kind.has_route() || self.route == other.route)
            && self.data == other.data
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type: {}, ID: {}, Route: {}, Compressed: {}, BodyLength: {}",
            self.kind,
            self.id,
            self.route,
            self.compressed,
            self.data.len()
        )
    }
}
