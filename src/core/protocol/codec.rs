// src/core/protocol/codec.rs

//! Parser and serializer for the FOSP wire format: a first line, a MIME
//! style header block, a blank line, and an opaque body. A message always
//! occupies exactly one transport frame, so the body length is implied.

use super::message::{Headers, Message, Method, Notification, Request, Response, Status};
use crate::core::FospError;
use crate::core::object::Event;
use crate::core::url::Url;
use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

// A defensive bound on the header block, to stop a malicious frame from
// turning into unbounded header parsing.
const MAX_HEADER_LINES: usize = 256;

/// Parses one complete frame into a message.
///
/// Frames with a malformed first line, an unknown keyword, a bad sequence
/// number, or a broken header line are rejected; the caller is expected to
/// terminate the connection on such an error.
pub fn parse_message(frame: Bytes) -> Result<Message, FospError> {
    let mut cursor = 0usize;
    let first_line = read_line(&frame, &mut cursor)?;
    let first_line = std::str::from_utf8(first_line)
        .map_err(|_| FospError::MalformedMessage("first line is not UTF-8".to_string()))?;

    let fragments: Vec<&str> = first_line.split(' ').collect();
    let keyword = fragments[0];

    if let Ok(method) = keyword.parse::<Method>() {
        if fragments.len() != 3 {
            return Err(FospError::MalformedMessage(format!(
                "request line has {} fields, expected 3",
                fragments.len()
            )));
        }
        let url = parse_target(fragments[1])?;
        let seq = parse_seq(fragments[2])?;
        let headers = read_headers(&frame, &mut cursor)?;
        let body = frame.slice(cursor..);
        return Ok(Message::Request(Request {
            method,
            url,
            seq,
            headers,
            body,
        }));
    }

    if keyword == "SUCCEEDED" || keyword == "FAILED" {
        if fragments.len() != 3 {
            return Err(FospError::MalformedMessage(format!(
                "response line has {} fields, expected 3",
                fragments.len()
            )));
        }
        let status = if keyword == "SUCCEEDED" {
            Status::Succeeded
        } else {
            Status::Failed
        };
        let code: u16 = fragments[1].parse().map_err(|_| {
            FospError::MalformedMessage(format!("invalid status code \"{}\"", fragments[1]))
        })?;
        let seq = parse_seq(fragments[2])?;
        let headers = read_headers(&frame, &mut cursor)?;
        let body = frame.slice(cursor..);
        return Ok(Message::Response(Response {
            status,
            code,
            seq,
            headers,
            body,
            binary: false,
        }));
    }

    if let Ok(event) = keyword.parse::<Event>() {
        // Only the upper-case wire keywords are valid here.
        if keyword != event.as_keyword() {
            return Err(FospError::MalformedMessage(format!(
                "unknown keyword \"{keyword}\""
            )));
        }
        if fragments.len() != 2 {
            return Err(FospError::MalformedMessage(format!(
                "notification line has {} fields, expected 2",
                fragments.len()
            )));
        }
        let url = Url::parse(fragments[1])?;
        let headers = read_headers(&frame, &mut cursor)?;
        let body = frame.slice(cursor..);
        return Ok(Message::Notification(Notification {
            event,
            url,
            headers,
            body,
        }));
    }

    Err(FospError::MalformedMessage(format!(
        "unknown keyword \"{keyword}\""
    )))
}

/// Serializes a message into the bytes of one transport frame.
pub fn serialize_message(message: &Message) -> Bytes {
    let (first_line, headers, body) = match message {
        Message::Request(request) => {
            let target = match &request.url {
                Some(url) => url.to_string(),
                None => "*".to_string(),
            };
            (
                format!("{} {} {}", request.method, target, request.seq),
                &request.headers,
                &request.body,
            )
        }
        Message::Response(response) => (
            format!("{} {} {}", response.status, response.code, response.seq),
            &response.headers,
            &response.body,
        ),
        Message::Notification(notification) => (
            format!("{} {}", notification.event, notification.url),
            &notification.headers,
            &notification.body,
        ),
    };

    let mut buf = BytesMut::with_capacity(first_line.len() + 64 + body.len());
    buf.put_slice(first_line.as_bytes());
    buf.put_slice(CRLF);
    for (name, value) in headers.iter() {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(CRLF);
    }
    buf.put_slice(CRLF);
    buf.put_slice(body);
    buf.freeze()
}

fn parse_target(raw: &str) -> Result<Option<Url>, FospError> {
    if raw == "*" {
        Ok(None)
    } else {
        Ok(Some(Url::parse(raw)?))
    }
}

fn parse_seq(raw: &str) -> Result<u64, FospError> {
    let seq: u64 = raw
        .parse()
        .map_err(|_| FospError::MalformedMessage(format!("invalid sequence number \"{raw}\"")))?;
    if seq == 0 {
        return Err(FospError::MalformedMessage(
            "sequence number 0 is reserved".to_string(),
        ));
    }
    Ok(seq)
}

/// Reads one CRLF-terminated line starting at `cursor`, advancing it past
/// the terminator.
fn read_line<'a>(frame: &'a Bytes, cursor: &mut usize) -> Result<&'a [u8], FospError> {
    let rest = &frame[*cursor..];
    let Some(end) = rest.windows(2).position(|window| window == CRLF) else {
        return Err(FospError::MalformedMessage(
            "missing CRLF line terminator".to_string(),
        ));
    };
    *cursor += end + 2;
    Ok(&rest[..end])
}

/// Reads header lines up to and including the blank separator line. A frame
/// that ends right after a line terminator carries no headers and no body.
fn read_headers(frame: &Bytes, cursor: &mut usize) -> Result<Headers, FospError> {
    let mut headers = Headers::new();
    for _ in 0..MAX_HEADER_LINES {
        if *cursor >= frame.len() {
            return Ok(headers);
        }
        let line = read_line(frame, cursor)?;
        if line.is_empty() {
            return Ok(headers);
        }
        let line = std::str::from_utf8(line)
            .map_err(|_| FospError::MalformedMessage("header line is not UTF-8".to_string()))?;
        let Some((name, value)) = line.split_once(':') else {
            return Err(FospError::MalformedMessage(format!(
                "header line \"{line}\" has no colon"
            )));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(FospError::MalformedMessage(
                "header line with empty name".to_string(),
            ));
        }
        headers.set(name, value.trim());
    }
    Err(FospError::MalformedMessage(
        "header block too large".to_string(),
    ))
}
