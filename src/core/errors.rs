// src/core/errors.rs

//! Defines the primary error type for the entire application.

use crate::core::protocol::status;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum FospError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported protocol version")]
    UnsupportedVersion,

    #[error("Request not allowed in the current connection state")]
    InvalidState,

    #[error("Name or password missing")]
    CredentialsMissing,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Object was not found")]
    NotFound,

    #[error("Parent object does not exist")]
    ParentNotFound,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Request timed out")]
    RequestTimedOut,

    #[error("Transport closed")]
    TransportClosed,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl FospError {
    /// The FOSP status code a FAILED response carries for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            FospError::MalformedMessage(_)
            | FospError::InvalidUrl(_)
            | FospError::UnsupportedVersion
            | FospError::InvalidState
            | FospError::CredentialsMissing
            | FospError::BadRequest(_) => status::BAD_REQUEST,
            FospError::AuthenticationFailed => status::UNAUTHORIZED,
            FospError::NotAuthorized => status::FORBIDDEN,
            FospError::NotFound | FospError::ParentNotFound => status::NOT_FOUND,
            FospError::UserAlreadyExists => status::CONFLICT,
            FospError::Gateway(_) => status::BAD_GATEWAY,
            FospError::RequestTimedOut => status::GATEWAY_TIMEOUT,
            FospError::Io(_)
            | FospError::Storage(_)
            | FospError::TransportClosed
            | FospError::Internal(_) => status::INTERNAL_SERVER_ERROR,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for FospError {
    fn clone(&self) -> Self {
        match self {
            FospError::Io(e) => FospError::Io(Arc::clone(e)),
            FospError::MalformedMessage(s) => FospError::MalformedMessage(s.clone()),
            FospError::InvalidUrl(s) => FospError::InvalidUrl(s.clone()),
            FospError::UnsupportedVersion => FospError::UnsupportedVersion,
            FospError::InvalidState => FospError::InvalidState,
            FospError::CredentialsMissing => FospError::CredentialsMissing,
            FospError::AuthenticationFailed => FospError::AuthenticationFailed,
            FospError::NotAuthorized => FospError::NotAuthorized,
            FospError::NotFound => FospError::NotFound,
            FospError::ParentNotFound => FospError::ParentNotFound,
            FospError::UserAlreadyExists => FospError::UserAlreadyExists,
            FospError::BadRequest(s) => FospError::BadRequest(s.clone()),
            FospError::Gateway(s) => FospError::Gateway(s.clone()),
            FospError::Storage(s) => FospError::Storage(s.clone()),
            FospError::RequestTimedOut => FospError::RequestTimedOut,
            FospError::TransportClosed => FospError::TransportClosed,
            FospError::Internal(s) => FospError::Internal(s.clone()),
        }
    }
}

impl PartialEq for FospError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FospError::Io(e1), FospError::Io(e2)) => e1.to_string() == e2.to_string(),
            (FospError::MalformedMessage(s1), FospError::MalformedMessage(s2)) => s1 == s2,
            (FospError::InvalidUrl(s1), FospError::InvalidUrl(s2)) => s1 == s2,
            (FospError::BadRequest(s1), FospError::BadRequest(s2)) => s1 == s2,
            (FospError::Gateway(s1), FospError::Gateway(s2)) => s1 == s2,
            (FospError::Storage(s1), FospError::Storage(s2)) => s1 == s2,
            (FospError::Internal(s1), FospError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for FospError {
    fn from(e: std::io::Error) -> Self {
        FospError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for FospError {
    fn from(e: serde_json::Error) -> Self {
        FospError::BadRequest(format!("invalid JSON: {e}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FospError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => FospError::TransportClosed,
            WsError::Io(io) => FospError::Io(Arc::new(io)),
            other => FospError::Internal(format!("WebSocket error: {other}")),
        }
    }
}
