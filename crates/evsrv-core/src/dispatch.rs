//! Dispatch seams: controllers, WebSocket endpoints, and the name →
//! factory registration tables.
//!
//! Handler selection is late-bound by string name. Tables are built at
//! startup and read-only afterwards; resolving a name that was never
//! registered is an explicit `None`, not a sentinel object. Lookup keys
//! are derived from the request path: first segment, lowercased, suffixed
//! with "controller" or "endpoint".

use std::collections::HashMap;
use std::fmt;
use std::io;

use crate::action::{Body, SendBuffer};
use crate::http::RequestHead;
use crate::session::Session;

// ── HTTP side ────────────────────────────────────────────────────────

/// Outcome of invoking a controller action by name.
pub enum DispatchOutcome {
    /// The action ran and produced a response.
    Response(HttpResponse),
    /// The controller has no such action. Non-fatal; logged by the caller.
    NoSuchAction,
}

/// Application controller: invoked exactly once per request, always on a
/// worker thread, never on the reactor thread.
pub trait ActionController: Send {
    fn invoke(&mut self, action: &str, request: &RequestHead, body: &[u8]) -> DispatchOutcome;
}

/// Application response: header side plus a body that is either an
/// in-memory buffer or an open file staged for streamed transmission.
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Body,
    close: bool,
}

impl HttpResponse {
    pub fn new(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: Body::empty(),
            close: false,
        }
    }

    pub fn text(status: u16, text: impl Into<String>) -> HttpResponse {
        HttpResponse::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(Body::Bytes(text.into().into_bytes()))
    }

    pub fn html(status: u16, html: impl Into<String>) -> HttpResponse {
        HttpResponse::new(status)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(Body::Bytes(html.into().into_bytes()))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> HttpResponse {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Body) -> HttpResponse {
        self.body = body;
        self
    }

    /// Ask for the connection to be torn down once this response drains.
    pub fn set_close(&mut self, close: bool) {
        self.close = close;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Serialized status line + headers, with Content-Length and
    /// Connection filled in.
    pub fn header_bytes(&self, body_len: u64) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str(&format!("Content-Length: {}\r\n", body_len));
        out.push_str(if self.close {
            "Connection: close\r\n"
        } else {
            "Connection: keep-alive\r\n"
        });
        out.push_str("\r\n");
        out.into_bytes()
    }

    /// Stage the whole response for transmission. Fails only if a file
    /// body's length cannot be read.
    pub fn into_send_buffer(self) -> io::Result<SendBuffer> {
        let body_len = match &self.body {
            Body::Bytes(b) => b.len() as u64,
            Body::File(f) => f.metadata()?.len(),
        };
        let header = self.header_bytes(body_len);
        let close = self.close;
        Ok(SendBuffer::with_body(header, self.body).close_after(close))
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

// ── WebSocket side ───────────────────────────────────────────────────

/// One inbound frame or lifecycle event, as handed to a frame worker.
#[derive(Debug)]
pub enum FrameEvent {
    Open { session: Session },
    Text(String),
    Binary(Vec<u8>),
    Close,
    Ping,
    Pong,
}

/// Control directive an endpoint may emit alongside payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlDirective {
    Close,
    Ping,
    Pong,
}

/// One item emitted by an endpoint during a callback, relayed to the
/// connection in emission order.
#[derive(Debug)]
pub enum OutgoingItem {
    Text(String),
    Binary(Vec<u8>),
    Control(ControlDirective),
}

/// Ordered list of outgoing items collected during one callback.
#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<OutgoingItem>,
}

impl Outbox {
    pub fn new() -> Outbox {
        Outbox::default()
    }

    pub fn send_text(&mut self, text: impl Into<String>) {
        self.items.push(OutgoingItem::Text(text.into()));
    }

    pub fn send_binary(&mut self, data: Vec<u8>) {
        self.items.push(OutgoingItem::Binary(data));
    }

    pub fn close(&mut self) {
        self.items.push(OutgoingItem::Control(ControlDirective::Close));
    }

    pub fn ping(&mut self) {
        self.items.push(OutgoingItem::Control(ControlDirective::Ping));
    }

    pub fn pong(&mut self) {
        self.items.push(OutgoingItem::Control(ControlDirective::Pong));
    }

    pub fn drain(&mut self) -> Vec<OutgoingItem> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Application WebSocket endpoint. A fresh instance is resolved per
/// frame; per-connection state belongs in the session. Emissions go
/// through the endpoint's outbox and are relayed after the callback.
pub trait WsEndpoint: Send {
    fn outbox(&mut self) -> &mut Outbox;

    fn on_open(&mut self, _session: Session) {}
    fn on_text_received(&mut self, _text: &str) {}
    fn on_binary_received(&mut self, _data: &[u8]) {}
    fn on_close(&mut self) {}
    fn on_ping(&mut self) {}
    fn on_pong(&mut self) {}
}

// ── Registration tables ──────────────────────────────────────────────

type ControllerFactory = Box<dyn Fn() -> Box<dyn ActionController> + Send + Sync>;
type EndpointFactory = Box<dyn Fn() -> Box<dyn WsEndpoint> + Send + Sync>;

/// Lookup key for a controller serving `segment` (first path segment).
pub fn controller_key(segment: &str) -> String {
    let mut key = segment.to_ascii_lowercase();
    key.push_str("controller");
    key
}

/// Lookup key for an endpoint serving `segment`.
pub fn endpoint_key(segment: &str) -> String {
    let mut key = segment.to_ascii_lowercase();
    key.push_str("endpoint");
    key
}

/// Name → factory table for controllers, built at startup.
#[derive(Default)]
pub struct ControllerRegistry {
    table: HashMap<String, ControllerFactory>,
}

impl ControllerRegistry {
    pub fn new() -> ControllerRegistry {
        ControllerRegistry::default()
    }

    /// Register under a class-style name, e.g. "DemoController".
    pub fn register<F, C>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: ActionController + 'static,
    {
        self.table.insert(
            name.to_ascii_lowercase(),
            Box::new(move || Box::new(factory())),
        );
    }

    /// Resolve the controller serving the given first path segment.
    pub fn resolve_segment(&self, segment: &str) -> Option<Box<dyn ActionController>> {
        self.table.get(&controller_key(segment)).map(|f| f())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControllerRegistry({} entries)", self.table.len())
    }
}

/// Name → factory table for WebSocket endpoints, built at startup.
#[derive(Default)]
pub struct EndpointRegistry {
    table: HashMap<String, EndpointFactory>,
}

impl EndpointRegistry {
    pub fn new() -> EndpointRegistry {
        EndpointRegistry::default()
    }

    /// Register under a class-style name, e.g. "ChatEndpoint".
    pub fn register<F, E>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: WsEndpoint + 'static,
    {
        self.table.insert(
            name.to_ascii_lowercase(),
            Box::new(move || Box::new(factory())),
        );
    }

    pub fn resolve_segment(&self, segment: &str) -> Option<Box<dyn WsEndpoint>> {
        self.table.get(&endpoint_key(segment)).map(|f| f())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointRegistry({} entries)", self.table.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop {
        outbox: Outbox,
    }

    impl WsEndpoint for Nop {
        fn outbox(&mut self) -> &mut Outbox {
            &mut self.outbox
        }
    }

    struct Hello;

    impl ActionController for Hello {
        fn invoke(&mut self, action: &str, _request: &RequestHead, _body: &[u8]) -> DispatchOutcome {
            match action {
                "index" => DispatchOutcome::Response(HttpResponse::text(200, "hi")),
                _ => DispatchOutcome::NoSuchAction,
            }
        }
    }

    #[test]
    fn test_controller_resolution_by_segment() {
        let mut reg = ControllerRegistry::new();
        reg.register("HelloController", || Hello);

        assert!(reg.resolve_segment("hello").is_some());
        assert!(reg.resolve_segment("Hello").is_some());
        assert!(reg.resolve_segment("other").is_none());
    }

    #[test]
    fn test_endpoint_resolution_by_segment() {
        let mut reg = EndpointRegistry::new();
        reg.register("ChatEndpoint", || Nop { outbox: Outbox::new() });

        assert!(reg.resolve_segment("chat").is_some());
        assert!(reg.resolve_segment("CHAT").is_some());
        assert!(reg.resolve_segment("chatter").is_none());
    }

    #[test]
    fn test_outbox_preserves_order() {
        let mut outbox = Outbox::new();
        outbox.send_text("a");
        outbox.send_binary(vec![1, 2]);
        outbox.close();

        let items = outbox.drain();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], OutgoingItem::Text(_)));
        assert!(matches!(items[1], OutgoingItem::Binary(_)));
        assert!(matches!(
            items[2],
            OutgoingItem::Control(ControlDirective::Close)
        ));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_response_header_bytes() {
        let mut resp = HttpResponse::text(200, "hello");
        resp.set_close(true);
        let buf = resp.into_send_buffer().unwrap();
        assert!(buf.wants_close());

        let resp = HttpResponse::text(404, "nope");
        let header = resp.header_bytes(4);
        let text = String::from_utf8(header).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
