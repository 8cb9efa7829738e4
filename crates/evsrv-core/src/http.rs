//! Minimal HTTP request-head model.
//!
//! The reactor needs just enough of the request head to route it: the
//! request line, a case-insensitive header lookup, cookies, the body
//! length, and the WebSocket upgrade markers. Full grammar handling is
//! the dispatch layer's business, not this crate's.

use crate::error::{CoreError, Result};

/// Parsed request head: request line + raw header pairs.
///
/// Cloneable because the original upgrade request travels through the
/// send queue and is then retained by the WebSocket connection for
/// endpoint resolution.
#[derive(Clone, Debug)]
pub struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse the head section of a request buffer (everything up to and
    /// excluding the blank line). Lenient: unknown or malformed header
    /// lines are skipped rather than rejected.
    pub fn parse(head: &[u8]) -> Result<RequestHead> {
        let text = std::str::from_utf8(head).map_err(|_| CoreError::BadRequest("not utf-8"))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or("");
        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(CoreError::BadRequest("empty request line"))?;
        let target = parts.next().ok_or(CoreError::BadRequest("no request target"))?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        Ok(RequestHead {
            method: method.to_string(),
            target: target.to_string(),
            headers,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target (path + query).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The path portion of the target (query stripped).
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    /// First path segment, or "" for the root path.
    pub fn first_path_segment(&self) -> &str {
        self.path().split('/').find(|s| !s.is_empty()).unwrap_or("")
    }

    /// Second path segment (the action name for controller dispatch).
    pub fn second_path_segment(&self) -> &str {
        self.path().split('/').filter(|s| !s.is_empty()).nth(1).unwrap_or("")
    }

    /// Case-insensitive header lookup. First match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of a named cookie from the Cookie header, if present.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let cookies = self.header("Cookie")?;
        cookies.split(';').find_map(|pair| {
            let (n, v) = pair.split_once('=')?;
            if n.trim() == name {
                Some(v.trim())
            } else {
                None
            }
        })
    }

    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// HTTP/1.1 connections are persistent unless the client opts out.
    pub fn keep_alive(&self) -> bool {
        match self.header("Connection") {
            Some(v) => !v.eq_ignore_ascii_case("close"),
            None => true,
        }
    }

    /// True when the request asks for the WebSocket protocol switch:
    /// an Upgrade header naming websocket plus the handshake key.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("Upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        upgrade && self.websocket_key().is_some()
    }

    pub fn websocket_key(&self) -> Option<&str> {
        self.header("Sec-WebSocket-Key")
    }
}

/// Byte length of the head section including the terminating blank line,
/// or None if the head is not complete yet.
pub fn head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Total byte length of one complete request (head + declared body), or
/// None until that many bytes have been assembled.
pub fn request_len(buf: &[u8]) -> Option<usize> {
    let head = head_len(buf)?;
    let content_length = RequestHead::parse(&buf[..head]).ok()?.content_length();
    let total = head + content_length;
    if buf.len() >= total {
        Some(total)
    } else {
        None
    }
}
