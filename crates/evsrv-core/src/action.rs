//! Pending output actions and the send buffer.
//!
//! Workers never touch a connection directly. They describe what should
//! happen to it as an `Action` and push that through the send queue; the
//! reactor applies the batch on its own thread, in enqueue order per
//! connection.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};

use crate::http::RequestHead;
use crate::id::ConnectionId;

/// Response body: an in-memory buffer, or an open file streamed in chunks.
pub enum Body {
    Bytes(Vec<u8>),
    File(File),
}

impl Body {
    pub fn empty() -> Body {
        Body::Bytes(Vec::new())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::File(_) => write!(f, "Body::File"),
        }
    }
}

/// Bytes staged for transmission on one connection.
///
/// Header bytes and an in-memory body are concatenated up front; a file
/// body stays on disk and is pulled through a fixed-size chunk buffer as
/// the socket drains it. `close_after` marks the connection for teardown
/// once this buffer has fully left the socket — never before, so an
/// earlier Send is never cut off by a later disconnect.
pub struct SendBuffer {
    head: Vec<u8>,
    pos: usize,
    file: Option<File>,
    chunk: Vec<u8>,
    chunk_pos: usize,
    close_after: bool,
}

/// File bodies are staged through chunks of this size.
const FILE_CHUNK: usize = 64 * 1024;

impl SendBuffer {
    /// Buffer over raw, ready-to-send bytes (WebSocket frames, handshake
    /// responses).
    pub fn from_bytes(bytes: Vec<u8>) -> SendBuffer {
        SendBuffer {
            head: bytes,
            pos: 0,
            file: None,
            chunk: Vec::new(),
            chunk_pos: 0,
            close_after: false,
        }
    }

    /// Buffer over response header bytes plus a body.
    pub fn with_body(header: Vec<u8>, body: Body) -> SendBuffer {
        let mut head = header;
        let file = match body {
            Body::Bytes(b) => {
                head.extend_from_slice(&b);
                None
            }
            Body::File(f) => Some(f),
        };
        SendBuffer {
            head,
            pos: 0,
            file,
            chunk: Vec::new(),
            chunk_pos: 0,
            close_after: false,
        }
    }

    pub fn close_after(mut self, close: bool) -> SendBuffer {
        self.close_after = close;
        self
    }

    pub fn wants_close(&self) -> bool {
        self.close_after
    }

    /// Next span of bytes to write, refilling the file chunk when the
    /// in-memory part is spent. Empty slice means the buffer is done.
    pub fn next_chunk(&mut self) -> io::Result<&[u8]> {
        if self.pos < self.head.len() {
            return Ok(&self.head[self.pos..]);
        }
        if self.chunk_pos < self.chunk.len() {
            return Ok(&self.chunk[self.chunk_pos..]);
        }
        if let Some(file) = self.file.as_mut() {
            self.chunk.resize(FILE_CHUNK, 0);
            let n = file.read(&mut self.chunk)?;
            self.chunk.truncate(n);
            self.chunk_pos = 0;
            if n == 0 {
                self.file = None;
            }
            return Ok(&self.chunk[..]);
        }
        Ok(&[])
    }

    /// Record that `n` bytes from the last `next_chunk` span were written.
    pub fn advance(&mut self, n: usize) {
        if self.pos < self.head.len() {
            self.pos = (self.pos + n).min(self.head.len());
        } else {
            self.chunk_pos = (self.chunk_pos + n).min(self.chunk.len());
        }
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.head.len() && self.chunk_pos >= self.chunk.len() && self.file.is_none()
    }
}

impl fmt::Debug for SendBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SendBuffer({} head bytes{}{})",
            self.head.len(),
            if self.file.is_some() { " + file" } else { "" },
            if self.close_after { ", close" } else { "" },
        )
    }
}

/// One pending output action, applied by the reactor in enqueue order
/// per connection.
#[derive(Debug)]
pub enum Action {
    /// Append the buffer to the connection's outbound queue.
    Send { id: ConnectionId, buf: SendBuffer },
    /// Unregister, close and release the connection.
    Disconnect { id: ConnectionId },
    /// Replace the HTTP connection object with a WebSocket one sharing
    /// the same id and descriptor.
    UpgradeToWebSocket { id: ConnectionId, request: RequestHead },
}

impl Action {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Action::Send { id, .. } => *id,
            Action::Disconnect { id } => *id,
            Action::UpgradeToWebSocket { id, .. } => *id,
        }
    }
}
