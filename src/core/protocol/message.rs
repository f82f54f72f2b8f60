// src/core/protocol/message.rs

use crate::core::FospError;
use crate::core::object::Event;
use crate::core::url::Url;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// FOSP status codes, grouped like their HTTP counterparts.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const MOVED: u16 = 301;
    pub const NOT_MODIFIED: u16 = 304;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const CONFLICT: u16 = 409;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const TOO_LARGE: u16 = 413;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const BAD_GATEWAY: u16 = 502;
    pub const UNAVAILABLE: u16 = 503;
    pub const GATEWAY_TIMEOUT: u16 = 504;
}

/// Canonical header names.
pub mod header {
    /// The user a forwarded request originates from.
    pub const FROM: &str = "From";
    /// The user a forwarded notification is addressed to.
    pub const TO: &str = "To";
}

/// The request methods of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Connect,
    Register,
    Auth,
    Get,
    List,
    Create,
    Patch,
    Delete,
    Read,
    Write,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Register => "REGISTER",
            Method::Auth => "AUTH",
            Method::Get => "GET",
            Method::List => "LIST",
            Method::Create => "CREATE",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Read => "READ",
            Method::Write => "WRITE",
        }
    }
}

impl FromStr for Method {
    type Err = FospError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPTIONS" => Ok(Method::Options),
            "CONNECT" => Ok(Method::Connect),
            "REGISTER" => Ok(Method::Register),
            "AUTH" => Ok(Method::Auth),
            "GET" => Ok(Method::Get),
            "LIST" => Ok(Method::List),
            "CREATE" => Ok(Method::Create),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "READ" => Ok(Method::Read),
            "WRITE" => Ok(Method::Write),
            other => Err(FospError::MalformedMessage(format!(
                "unknown method \"{other}\""
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a response reports success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Succeeded,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A header block with case-insensitive name lookup. Insertion order is
/// preserved for serialisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets a header, replacing an existing one of the same name.
    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            entry.1 = value.to_string();
        } else {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A request message. `url == None` stands for the wildcard target `*`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Option<Url>,
    pub seq: u64,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, url: Option<Url>) -> Self {
        Request {
            method,
            url,
            seq: 0,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// A SUCCEEDED response answering this request.
    pub fn succeeded(&self, code: u16) -> Response {
        Response {
            status: Status::Succeeded,
            code,
            seq: self.seq,
            headers: Headers::new(),
            body: Bytes::new(),
            binary: false,
        }
    }

    pub fn succeeded_with_body(&self, code: u16, body: impl Into<Bytes>) -> Response {
        let mut response = self.succeeded(code);
        response.body = body.into();
        response
    }

    /// A FAILED response answering this request, with the reason as body.
    pub fn failed(&self, code: u16, reason: &str) -> Response {
        Response {
            status: Status::Failed,
            code,
            seq: self.seq,
            headers: Headers::new(),
            body: Bytes::copy_from_slice(reason.as_bytes()),
            binary: false,
        }
    }
}

/// A response message, matched to its request by sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub code: u16,
    pub seq: u64,
    pub headers: Headers,
    pub body: Bytes,
    /// Marks responses whose body is raw attachment data, so the transport
    /// emits a binary frame.
    pub binary: bool,
}

/// A notification message. Notifications carry no sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event: Event,
    pub url: Url,
    pub headers: Headers,
    pub body: Bytes,
}

impl Notification {
    pub fn new(event: Event, url: Url) -> Self {
        Notification {
            event,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }
}

/// Any message of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Whether the transport should carry this message in a binary frame.
    pub fn is_binary(&self) -> bool {
        match self {
            Message::Request(request) => request.method == Method::Write,
            Message::Response(response) => response.binary,
            Message::Notification(_) => false,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => match &r.url {
                Some(url) => write!(f, "{} {} {}", r.method, url, r.seq),
                None => write!(f, "{} * {}", r.method, r.seq),
            },
            Message::Response(r) => write!(f, "{} {} {}", r.status, r.code, r.seq),
            Message::Notification(n) => write!(f, "{} {}", n.event, n.url),
        }
    }
}
