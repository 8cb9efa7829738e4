//! Connection objects.
//!
//! One `Connection` per accepted socket, owned by the reactor's registry
//! and addressed everywhere else by id. The object holds the descriptor
//! (`OwnedFd` — dropping it closes the socket), the inbound assembly
//! buffer, and the outbound queue of send buffers.
//!
//! A protocol upgrade builds a new WebSocket-kind object from the HTTP
//! one via `into_parts()`: the descriptor and peer address move across,
//! the id is reused by the caller, and nothing is closed.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use evsrv_core::action::SendBuffer;
use evsrv_core::http::{self, RequestHead};
use evsrv_core::id::ConnectionId;
use evsrv_core::ws::{self, FrameParse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    WebSocket,
}

/// Read chunk size per recv call.
const RECV_CHUNK: usize = 4096;

/// Cap on the inbound assembly buffer while no complete unit is present.
const MAX_INBOUND: usize = 1 << 20;

pub enum ReadOutcome {
    /// Read until the socket drained (possibly zero bytes).
    Data,
    /// Peer closed the connection.
    Closed,
    /// Fatal socket error (errno).
    Error(i32),
}

pub enum FlushOutcome {
    /// Outbound queue is empty.
    AllSent,
    /// Socket would block; more to send on the next writable edge.
    Blocked,
    /// Fatal socket or file error (errno).
    Error(i32),
}

pub struct Connection {
    id: ConnectionId,
    fd: OwnedFd,
    peer: SocketAddr,
    protocol: Protocol,
    inbound: Vec<u8>,
    outbound: VecDeque<SendBuffer>,
    close_after_send: bool,
    /// The original upgrade request; present on WebSocket connections,
    /// used for endpoint resolution.
    upgrade_request: Option<RequestHead>,
    /// Set by the first Open dispatched for this connection.
    opened: Arc<AtomicBool>,
}

impl Connection {
    pub fn http(id: ConnectionId, fd: OwnedFd, peer: SocketAddr) -> Connection {
        Connection {
            id,
            fd,
            peer,
            protocol: Protocol::Http,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            close_after_send: false,
            upgrade_request: None,
            opened: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn websocket(
        id: ConnectionId,
        fd: OwnedFd,
        peer: SocketAddr,
        request: RequestHead,
    ) -> Connection {
        Connection {
            id,
            fd,
            peer,
            protocol: Protocol::WebSocket,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            close_after_send: false,
            upgrade_request: Some(request),
            opened: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn opened_flag(&self) -> Arc<AtomicBool> {
        self.opened.clone()
    }

    /// Path of the original upgrade request ("" on HTTP connections).
    pub fn ws_path(&self) -> &str {
        self.upgrade_request.as_ref().map(|r| r.path()).unwrap_or("")
    }

    /// Surrender the descriptor and peer address without closing.
    pub fn into_parts(self) -> (OwnedFd, SocketAddr) {
        (self.fd, self.peer)
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Pull everything currently available off the socket into the
    /// assembly buffer. Edge-triggered polling requires reading to
    /// EAGAIN.
    pub fn read_available(&mut self) -> ReadOutcome {
        let mut chunk = [0u8; RECV_CHUNK];
        loop {
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    chunk.as_mut_ptr() as *mut libc::c_void,
                    chunk.len(),
                    0,
                )
            };
            if n > 0 {
                self.inbound.extend_from_slice(&chunk[..n as usize]);
                continue;
            }
            if n == 0 {
                return ReadOutcome::Closed;
            }
            let errno = unsafe { *libc::__errno_location() };
            match errno {
                libc::EAGAIN => return ReadOutcome::Data,
                libc::EINTR => continue,
                _ => return ReadOutcome::Error(errno),
            }
        }
    }

    /// Detach one complete HTTP request (head + declared body) from the
    /// front of the assembly buffer. Pipelined bytes stay behind.
    pub fn take_http_request(&mut self) -> Option<Vec<u8>> {
        let total = http::request_len(&self.inbound)?;
        let rest = self.inbound.split_off(total);
        Some(std::mem::replace(&mut self.inbound, rest))
    }

    /// Detach one complete WebSocket frame from the front of the
    /// assembly buffer.
    pub fn next_frame(&mut self) -> FrameParse {
        match ws::parse_frame(&self.inbound) {
            FrameParse::Complete {
                opcode,
                payload,
                consumed,
            } => {
                self.inbound.drain(..consumed);
                FrameParse::Complete {
                    opcode,
                    payload,
                    consumed,
                }
            }
            other => other,
        }
    }

    /// True when the assembly buffer hit its cap without containing a
    /// complete unit — the peer is stalling or flooding.
    pub fn inbound_overflow(&self) -> bool {
        self.inbound.len() >= MAX_INBOUND
    }

    // ── Outbound ─────────────────────────────────────────────────────

    pub fn push_outbound(&mut self, buf: SendBuffer) {
        self.outbound.push_back(buf);
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Write queued buffers until the socket blocks or the queue is
    /// empty. A buffer flagged close-after marks the connection for
    /// teardown once it has fully left the socket.
    pub fn flush_outbound(&mut self) -> FlushOutcome {
        loop {
            let front = match self.outbound.front_mut() {
                Some(b) => b,
                None => return FlushOutcome::AllSent,
            };

            let chunk = match front.next_chunk() {
                Ok(c) => c,
                Err(e) => {
                    log::error!("file body read failed on {}: {}", self.id, e);
                    return FlushOutcome::Error(e.raw_os_error().unwrap_or(libc::EIO));
                }
            };

            if chunk.is_empty() {
                if front.wants_close() {
                    self.close_after_send = true;
                }
                self.outbound.pop_front();
                continue;
            }

            let n = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    chunk.as_ptr() as *const libc::c_void,
                    chunk.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if n > 0 {
                front.advance(n as usize);
                continue;
            }
            let errno = unsafe { *libc::__errno_location() };
            match errno {
                libc::EAGAIN => return FlushOutcome::Blocked,
                libc::EINTR => continue,
                _ => return FlushOutcome::Error(errno),
            }
        }
    }

    /// Defer teardown until the outbound queue drains.
    pub fn mark_close_after_send(&mut self) {
        self.close_after_send = true;
    }

    pub fn should_close(&self) -> bool {
        self.close_after_send && self.outbound.is_empty()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Connection({}, fd {}, {:?}, {})",
            self.id,
            self.fd.as_raw_fd(),
            self.protocol,
            self.peer,
        )
    }
}
