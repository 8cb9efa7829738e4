//! # Reactor — the readiness loop and action applier
//!
//! One dedicated thread owns this object: it is the only caller of
//! kernel poll-set operations and the only writer of the connection
//! registry. Workers hand their output back as `Action`s through the
//! send queue; the reactor drains the queue each cycle and applies the
//! batch.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Reactor cycle                                               │
//! │   1. clear graveyard (descriptors from last cycle close)    │
//! │   2. poll(timeout) → ready events                           │
//! │   3. per readable connection: read, assemble, spawn worker  │
//! │      per writable connection: flush outbound queue          │
//! │   4. drain_send_queue(wait) → apply Send / Disconnect /     │
//! │      UpgradeToWebSocket in enqueue order                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The upgrade is the delicate part: the HTTP connection leaves the poll
//! set *without closing its descriptor*, a WebSocket connection object
//! takes over the same descriptor and id, the handshake response is
//! staged in its outbound queue, and only then is it re-registered —
//! followed by the opening worker carrying the resolved session.

use std::net::{SocketAddr, TcpStream};
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::epoll::EpollFlags;

use evsrv_core::action::{Action, SendBuffer};
use evsrv_core::dispatch::FrameEvent;
use evsrv_core::gate::WorkerGate;
use evsrv_core::http::RequestHead;
use evsrv_core::id::ConnectionId;
use evsrv_core::queue::{QueueHandle, SendQueue};
use evsrv_core::session::SESSION_COOKIE;
use evsrv_core::ws::{self, FrameParse};
use evsrv_core::AppContext;

use evsrv_worker::{HttpActionWorker, WsFrameWorker};

use crate::connection::{Connection, FlushOutcome, Protocol, ReadOutcome};
use crate::error::Result;
use crate::handshake;
use crate::poller::{self, Poller};
use crate::registry::ConnectionRegistry;

pub struct Reactor {
    poller: Poller,
    registry: ConnectionRegistry,
    queue: SendQueue,
    /// Connections removed this cycle. Their descriptors stay open until
    /// the next poll so stale ready events cannot alias a reused
    /// descriptor number.
    graveyard: Vec<Connection>,
    ctx: Arc<AppContext>,
    gate: Arc<WorkerGate>,
    cursor: usize,
    ready: usize,
}

impl Reactor {
    /// Create the reactor. Poll-set creation failure is fatal — there is
    /// nothing to run without it.
    pub fn new(ctx: Arc<AppContext>, gate: Arc<WorkerGate>, max_events: usize) -> Result<Reactor> {
        let poller = Poller::new(max_events)?;
        Ok(Reactor {
            poller,
            registry: ConnectionRegistry::new(),
            queue: SendQueue::new(),
            graveyard: Vec::new(),
            ctx,
            gate,
            cursor: 0,
            ready: 0,
        })
    }

    /// Producer handle for worker threads and application code.
    pub fn queue_handle(&self) -> QueueHandle {
        self.queue.handle()
    }

    pub fn worker_gate(&self) -> &Arc<WorkerGate> {
        &self.gate
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Inspect a live connection (tests, stats).
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.registry.get(id)
    }

    // ── Poll-set / registry membership ───────────────────────────────

    /// Add a connection to the poll set and the registry. On kernel
    /// failure the connection is dropped (descriptor closed) and false
    /// returned; the error is logged in the poller.
    pub fn register_for_events(&mut self, conn: Connection, interest: EpollFlags) -> bool {
        if self.poller.add(conn.fd(), conn.id().as_u64(), interest) {
            self.registry.insert(conn);
            true
        } else {
            log::error!("dropping unregistrable connection {}", conn.id());
            false
        }
    }

    /// Change a connection's interest mask. Kernel failure is logged and
    /// non-fatal; the connection stays tracked.
    pub fn update_interest(&self, id: ConnectionId, interest: EpollFlags) -> bool {
        match self.registry.get(id) {
            Some(conn) => self.poller.modify(conn.fd(), id.as_u64(), interest),
            None => false,
        }
    }

    /// Remove a connection from the poll set and the registry without
    /// closing it. "Already absent" yields None and is not an error.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.registry.remove(id)?;
        self.poller.delete(conn.fd());
        Some(conn)
    }

    /// Register the listening socket under the listener sentinel.
    pub fn register_listener(&self, fd: BorrowedFd<'_>) -> bool {
        self.poller
            .add(fd, ConnectionId::LISTENER.as_u64(), poller::read_edge())
    }

    pub fn remove_listener(&self, fd: BorrowedFd<'_>) -> bool {
        self.poller.delete(fd)
    }

    /// Wrap a freshly accepted stream in an HTTP connection and start
    /// polling it.
    pub fn adopt(&mut self, stream: TcpStream, peer: SocketAddr) -> Option<ConnectionId> {
        if let Err(e) = stream.set_nonblocking(true) {
            log::error!("set_nonblocking failed for {}: {}", peer, e);
            return None;
        }
        let id = self.registry.allocate_id();
        let conn = Connection::http(id, OwnedFd::from(stream), peer);
        log::debug!("accepted {} from {}", id, peer);
        if self.register_for_events(conn, poller::rw_edge()) {
            Some(id)
        } else {
            None
        }
    }

    // ── Readiness cycle ──────────────────────────────────────────────

    /// Block until sockets are ready or the timeout elapses. Resets the
    /// ready cursor; a kernel failure has already been logged and shows
    /// up here as zero events.
    pub fn poll(&mut self, timeout_ms: u16) -> usize {
        // Last cycle's removals are safe to free now.
        self.graveyard.clear();
        self.cursor = 0;
        self.ready = self.poller.wait(timeout_ms);
        self.ready
    }

    /// Advance the cursor over the ready set.
    pub fn next_ready(&mut self) -> Option<ConnectionId> {
        if self.cursor < self.ready {
            let (data, _) = self.poller.event(self.cursor);
            self.cursor += 1;
            Some(ConnectionId::new(data))
        } else {
            None
        }
    }

    /// Read-readiness of the most recently returned event. Errors and
    /// hangups surface through the read path, so they count as readable.
    pub fn can_read(&self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let (_, flags) = self.poller.event(self.cursor - 1);
        flags.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP)
    }

    /// Write-readiness of the most recently returned event.
    pub fn can_write(&self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let (_, flags) = self.poller.event(self.cursor - 1);
        flags.contains(EpollFlags::EPOLLOUT)
    }

    // ── Event servicing ──────────────────────────────────────────────

    /// Pull bytes off a readable connection and spawn a worker for every
    /// complete unit assembled.
    pub fn handle_readable(&mut self, id: ConnectionId) {
        let (outcome, protocol) = match self.registry.get_mut(id) {
            Some(conn) => (conn.read_available(), conn.protocol()),
            None => {
                // Stale event for a connection removed earlier this cycle.
                log::trace!("ready event for unknown connection {}", id);
                return;
            }
        };

        match outcome {
            ReadOutcome::Data => {}
            ReadOutcome::Closed => {
                log::debug!("peer closed {}", id);
                self.disconnect_now(id);
                return;
            }
            ReadOutcome::Error(errno) => {
                log::debug!("recv failed on {}: errno {}", id, errno);
                self.disconnect_now(id);
                return;
            }
        }

        match protocol {
            Protocol::Http => self.service_http_readable(id),
            Protocol::WebSocket => self.service_ws_readable(id),
        }
    }

    fn service_http_readable(&mut self, id: ConnectionId) {
        let (requests, peer, overflow) = {
            let conn = match self.registry.get_mut(id) {
                Some(c) => c,
                None => return,
            };
            let peer = conn.peer();
            let mut requests = Vec::new();
            while let Some(raw) = conn.take_http_request() {
                requests.push(raw);
            }
            (requests, peer, conn.inbound_overflow())
        };

        for raw in requests {
            HttpActionWorker::new(id, raw, peer, self.queue.handle(), self.ctx.clone())
                .spawn(&self.gate);
        }

        if overflow {
            log::warn!("oversized request head on {}; dropping connection", id);
            self.disconnect_now(id);
        }
    }

    fn service_ws_readable(&mut self, id: ConnectionId) {
        let (events, path, opened, violation) = {
            let conn = match self.registry.get_mut(id) {
                Some(c) => c,
                None => return,
            };
            let path = conn.ws_path().to_string();
            let opened = conn.opened_flag();
            let mut events = Vec::new();
            let mut violation = None;
            loop {
                match conn.next_frame() {
                    FrameParse::Complete {
                        opcode, payload, ..
                    } => match frame_event(opcode, payload) {
                        Some(ev) => events.push(ev),
                        None => {
                            log::error!(
                                "logic error: unhandled opcode 0x{:x} on {}; frame skipped",
                                opcode,
                                id
                            );
                        }
                    },
                    FrameParse::Partial => break,
                    FrameParse::Invalid(why) => {
                        violation = Some(why);
                        break;
                    }
                }
            }
            (events, path, opened, violation)
        };

        for event in events {
            WsFrameWorker::new(
                id,
                path.clone(),
                event,
                opened.clone(),
                self.queue.handle(),
                self.ctx.clone(),
            )
            .spawn(&self.gate);
        }

        if let Some(why) = violation {
            log::warn!("websocket protocol violation on {}: {}", id, why);
            self.disconnect_now(id);
        }
    }

    /// Flush a writable connection's outbound queue; tear it down once a
    /// close-flagged buffer has fully drained.
    pub fn handle_writable(&mut self, id: ConnectionId) {
        let verdict = match self.registry.get_mut(id) {
            Some(conn) => match conn.flush_outbound() {
                FlushOutcome::AllSent => {
                    if conn.should_close() {
                        Some("drained")
                    } else {
                        None
                    }
                }
                FlushOutcome::Blocked => None,
                FlushOutcome::Error(errno) => {
                    log::debug!("send failed on {}: errno {}", id, errno);
                    Some("send error")
                }
            },
            None => {
                log::trace!("writable event for unknown connection {}", id);
                return;
            }
        };

        if let Some(why) = verdict {
            log::debug!("closing {} ({})", id, why);
            self.disconnect_now(id);
        }
    }

    // ── Send-queue drain ─────────────────────────────────────────────

    /// Blocking dequeue-with-timeout, then apply the whole batch. Actions
    /// for the same connection apply in enqueue order.
    pub fn drain_send_queue(&mut self, wait: Duration) {
        for action in self.queue.wait_and_drain(wait) {
            self.apply(action);
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Send { id, buf } => self.apply_send(id, buf),
            Action::Disconnect { id } => self.apply_disconnect(id),
            Action::UpgradeToWebSocket { id, request } => self.apply_upgrade(id, request),
        }
    }

    fn apply_send(&mut self, id: ConnectionId, buf: SendBuffer) {
        match self.registry.get_mut(id) {
            Some(conn) => conn.push_outbound(buf),
            None => {
                log::debug!("send for unknown connection {}", id);
                return;
            }
        }
        // Edge-triggered semantics: explicit re-arm after any send so the
        // next writable edge is delivered.
        self.update_interest(id, poller::rw_edge());
    }

    fn apply_disconnect(&mut self, id: ConnectionId) {
        let defer = match self.registry.get_mut(id) {
            Some(conn) if conn.has_outbound() => {
                // An earlier Send is still pending; close once it drains.
                conn.mark_close_after_send();
                true
            }
            Some(_) => false,
            None => {
                log::debug!("disconnect for unknown connection {}", id);
                return;
            }
        };
        if !defer {
            self.disconnect_now(id);
        }
    }

    /// Swap the HTTP connection object for a WebSocket one sharing the
    /// same id and descriptor, stage the handshake response, and start
    /// the opening sequence.
    fn apply_upgrade(&mut self, id: ConnectionId, request: RequestHead) {
        // Out of the poll set and registry — descriptor stays open.
        let old = match self.unregister(id) {
            Some(c) => c,
            None => {
                log::debug!("upgrade for unknown connection {}", id);
                return;
            }
        };

        let response = match handshake::response_bytes(&request) {
            Some(r) => r,
            None => {
                log::error!("logic error: upgrade without websocket key on {}", id);
                self.graveyard.push(old);
                return;
            }
        };

        // Resolve the session cookie before the request moves into the
        // new connection.
        let session = request
            .cookie(SESSION_COOKIE)
            .and_then(|sid| self.ctx.sessions.find(sid))
            .unwrap_or_default();

        let (fd, peer) = old.into_parts();
        let mut conn = Connection::websocket(id, fd, peer, request);

        // Handshake bytes must be queued before the connection becomes
        // pollable: the client never sees readiness ahead of them.
        conn.push_outbound(SendBuffer::from_bytes(response));

        let path = conn.ws_path().to_string();
        let opened = conn.opened_flag();

        if !self.register_for_events(conn, poller::rw_edge()) {
            return;
        }
        log::debug!("switched {} to websocket", id);

        WsFrameWorker::new(
            id,
            path,
            FrameEvent::Open { session },
            opened,
            self.queue.handle(),
            self.ctx.clone(),
        )
        .spawn(&self.gate);
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Unregister and schedule the connection for destruction at the top
    /// of the next cycle.
    pub fn disconnect_now(&mut self, id: ConnectionId) {
        if let Some(conn) = self.unregister(id) {
            log::debug!("released {}", id);
            self.graveyard.push(conn);
        }
    }

    /// Close every remaining connection unconditionally (shutdown).
    pub fn release_all(&mut self) {
        for conn in self.registry.drain() {
            self.poller.delete(conn.fd());
        }
        self.graveyard.clear();
    }
}

/// Map a wire opcode to the worker-facing event. Open is synthesized at
/// upgrade time, never decoded from the wire.
fn frame_event(opcode: u8, payload: Vec<u8>) -> Option<FrameEvent> {
    match opcode {
        ws::OP_TEXT => Some(FrameEvent::Text(
            String::from_utf8_lossy(&payload).into_owned(),
        )),
        ws::OP_BINARY => Some(FrameEvent::Binary(payload)),
        ws::OP_CLOSE => Some(FrameEvent::Close),
        ws::OP_PING => Some(FrameEvent::Ping),
        ws::OP_PONG => Some(FrameEvent::Pong),
        _ => None,
    }
}
