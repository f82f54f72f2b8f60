// src/core/protocol/mod.rs

//! The FOSP message model and its line-oriented wire format.

mod codec;
mod message;

/// The only protocol version this implementation speaks.
pub const PROTOCOL_VERSION: &str = "0.1";

pub use codec::{parse_message, serialize_message};
pub use message::{
    Headers, Message, Method, Notification, Request, Response, Status, header, status,
};
