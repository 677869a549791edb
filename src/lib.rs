//! Gamewire - Wire protocol and RPC plumbing for multiplayer game servers
//!
//! - `protocol`: the client-facing message frame, route compression and packets
//! - `rpc`: multiplexed calls between server processes
//! - `network`: dialing and the TCP server
//! - `config`: file configuration

pub mod config;
pub mod network;
pub mod protocol;
pub mod rpc;
