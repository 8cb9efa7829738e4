//! WebSocket opening handshake (server side).
//!
//! Computes the Sec-WebSocket-Accept value and builds the 101 response.
//! The reactor stages these bytes in the new connection's outbound queue
//! *before* registering it for events, so the client can never observe
//! readiness ahead of the handshake.

use data_encoding::BASE64;
use sha1::{Digest, Sha1};

use evsrv_core::http::RequestHead;

/// Fixed GUID appended to the client key (RFC 6455 §4.2.2).
const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// BASE64(SHA1(key + GUID)).
pub fn accept_value(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WS_GUID);
    BASE64.encode(&hasher.finalize())
}

/// The complete 101 response for an upgrade request, or None when the
/// request carries no handshake key.
pub fn response_bytes(request: &RequestHead) -> Option<Vec<u8>> {
    let key = request.websocket_key()?;
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_value(key)
    );
    Some(response.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc6455_sample_key() {
        // The worked example from RFC 6455 §1.3.
        assert_eq!(
            accept_value("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_response_bytes() {
        let head = RequestHead::parse(
            b"GET /chat HTTP/1.1\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              \r\n",
        )
        .unwrap();
        let bytes = response_bytes(&head).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let head = RequestHead::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(response_bytes(&head).is_none());
    }
}
