//! # WebSocket frame worker
//!
//! One thread per inbound frame or lifecycle event. The endpoint is
//! resolved fresh per frame from the first path segment of the original
//! upgrade request; if none is registered the worker is a no-op and
//! emits nothing.
//!
//! Callback map:
//!
//! | event  | callback              | then                          |
//! |--------|-----------------------|-------------------------------|
//! | Open   | `on_open(session)`    | guarded against duplicates    |
//! | Text   | `on_text_received`    |                               |
//! | Binary | `on_binary_received`  |                               |
//! | Close  | `on_close`            | teardown directive            |
//! | Ping   | `on_ping`             | automatic Pong                |
//! | Pong   | `on_pong`             |                               |
//!
//! Afterwards the endpoint's outbox is drained in emission order; every
//! item becomes a Send (framed payload) or a control action addressed to
//! the same connection id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use evsrv_core::dispatch::{ControlDirective, FrameEvent, OutgoingItem, WsEndpoint};
use evsrv_core::gate::WorkerGate;
use evsrv_core::queue::QueueHandle;
use evsrv_core::{ws, AppContext, ConnectionId};

pub struct WsFrameWorker {
    id: ConnectionId,
    /// Path of the original upgrade request; first segment names the endpoint.
    path: String,
    event: FrameEvent,
    /// Shared with the connection object; set exactly once, by the first
    /// Open dispatched for this connection.
    opened: Arc<AtomicBool>,
    queue: QueueHandle,
    ctx: Arc<AppContext>,
}

impl WsFrameWorker {
    pub fn new(
        id: ConnectionId,
        path: String,
        event: FrameEvent,
        opened: Arc<AtomicBool>,
        queue: QueueHandle,
        ctx: Arc<AppContext>,
    ) -> WsFrameWorker {
        WsFrameWorker {
            id,
            path,
            event,
            opened,
            queue,
            ctx,
        }
    }

    /// Detach onto a fresh named thread, accounted by the gate.
    pub fn spawn(self, gate: &Arc<WorkerGate>) {
        let ticket = gate.enter();
        let id = self.id;
        let result = thread::Builder::new()
            .name("evsrv-ws-worker".into())
            .spawn(move || {
                let _ticket = ticket;
                self.run();
            });
        if let Err(e) = result {
            log::error!("failed to spawn ws worker for {}: {}", id, e);
        }
    }

    pub fn run(self) {
        let segment = self
            .path
            .split('?')
            .next()
            .unwrap_or("")
            .split('/')
            .find(|s| !s.is_empty())
            .unwrap_or("");

        let mut endpoint = match self.ctx.endpoints.resolve_segment(segment) {
            Some(e) => e,
            None => {
                log::debug!("no endpoint for segment {:?} ({})", segment, self.id);
                return;
            }
        };

        match &self.event {
            FrameEvent::Open { session } => {
                // Only the first Open for a connection may reach the
                // endpoint. Losing the race means someone already
                // dispatched it.
                if self
                    .opened
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    log::error!("logic error: duplicate open dispatched ({})", self.id);
                    return;
                }
                endpoint.on_open(session.clone());
            }
            FrameEvent::Text(text) => endpoint.on_text_received(text),
            FrameEvent::Binary(data) => endpoint.on_binary_received(data),
            FrameEvent::Close => {
                endpoint.on_close();
                // The endpoint now initiates teardown.
                endpoint.outbox().close();
            }
            FrameEvent::Ping => {
                endpoint.on_ping();
                endpoint.outbox().pong();
            }
            FrameEvent::Pong => endpoint.on_pong(),
        }

        self.relay(endpoint.outbox().drain());
    }

    /// Translate outbox items into queue actions, preserving order.
    fn relay(&self, items: Vec<OutgoingItem>) {
        for item in items {
            let result = match item {
                OutgoingItem::Text(text) => self
                    .queue
                    .enqueue_send_raw(self.id, ws::text_frame(text.as_bytes())),
                OutgoingItem::Binary(data) => {
                    self.queue.enqueue_send_raw(self.id, ws::binary_frame(&data))
                }
                OutgoingItem::Control(ControlDirective::Close) => {
                    self.queue.enqueue_disconnect(self.id)
                }
                OutgoingItem::Control(ControlDirective::Ping) => {
                    self.queue.enqueue_send_raw(self.id, ws::ping_frame())
                }
                OutgoingItem::Control(ControlDirective::Pong) => {
                    self.queue.enqueue_send_raw(self.id, ws::pong_frame())
                }
            };
            if result.is_err() {
                log::debug!("send queue closed, dropping outgoing item ({})", self.id);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evsrv_core::dispatch::Outbox;
    use evsrv_core::queue::SendQueue;
    use evsrv_core::{Action, Session};
    use std::sync::Mutex;

    /// Records which callbacks ran, via a shared log.
    struct Probe {
        outbox: Outbox,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl WsEndpoint for Probe {
        fn outbox(&mut self) -> &mut Outbox {
            &mut self.outbox
        }

        fn on_open(&mut self, session: Session) {
            self.calls.lock().unwrap().push(format!("open:{}", session.id()));
            self.outbox.send_text("welcome");
        }

        fn on_text_received(&mut self, text: &str) {
            self.calls.lock().unwrap().push(format!("text:{}", text));
            self.outbox.send_text(text.to_uppercase());
            self.outbox.send_binary(vec![1, 2, 3]);
        }

        fn on_close(&mut self) {
            self.calls.lock().unwrap().push("close".into());
        }

        fn on_ping(&mut self) {
            self.calls.lock().unwrap().push("ping".into());
        }
    }

    struct Rig {
        queue: SendQueue,
        calls: Arc<Mutex<Vec<String>>>,
        opened: Arc<AtomicBool>,
        ctx: Arc<AppContext>,
    }

    fn rig() -> Rig {
        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = AppContext::new();
        let calls_for_factory = calls.clone();
        ctx.endpoints.register("ChatEndpoint", move || Probe {
            outbox: Outbox::new(),
            calls: calls_for_factory.clone(),
        });
        Rig {
            queue: SendQueue::new(),
            calls,
            opened: Arc::new(AtomicBool::new(false)),
            ctx: Arc::new(ctx),
        }
    }

    fn worker(rig: &Rig, event: FrameEvent) -> WsFrameWorker {
        WsFrameWorker::new(
            ConnectionId::new(2),
            "/chat/room1".into(),
            event,
            rig.opened.clone(),
            rig.queue.handle(),
            rig.ctx.clone(),
        )
    }

    #[test]
    fn test_open_dispatches_once() {
        let rig = rig();
        worker(&rig, FrameEvent::Open { session: Session::new("s1") }).run();

        assert_eq!(rig.calls.lock().unwrap().as_slice(), ["open:s1"]);
        // Welcome text was framed and enqueued.
        let actions = rig.queue.try_drain();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Send { .. }));
    }

    #[test]
    fn test_duplicate_open_is_logic_error() {
        let rig = rig();
        worker(&rig, FrameEvent::Open { session: Session::new("s1") }).run();
        rig.queue.try_drain();

        worker(&rig, FrameEvent::Open { session: Session::new("s2") }).run();
        // No second callback, no action enqueued.
        assert_eq!(rig.calls.lock().unwrap().len(), 1);
        assert!(rig.queue.try_drain().is_empty());
    }

    #[test]
    fn test_text_emissions_preserve_order() {
        let rig = rig();
        worker(&rig, FrameEvent::Text("hi".into())).run();

        assert_eq!(rig.calls.lock().unwrap().as_slice(), ["text:hi"]);
        let actions = rig.queue.try_drain();
        assert_eq!(actions.len(), 2);

        // First the uppercased text frame, then the binary frame.
        match &actions[0] {
            Action::Send { .. } => {}
            other => panic!("expected Send, got {:?}", other),
        }
        let frames: Vec<Vec<u8>> = actions
            .into_iter()
            .map(|a| match a {
                Action::Send { mut buf, .. } => {
                    let chunk = buf.next_chunk().unwrap().to_vec();
                    chunk
                }
                other => panic!("expected Send, got {:?}", other),
            })
            .collect();
        assert_eq!(frames[0], ws::text_frame(b"HI"));
        assert_eq!(frames[1], ws::binary_frame(&[1, 2, 3]));
    }

    #[test]
    fn test_close_triggers_teardown() {
        let rig = rig();
        worker(&rig, FrameEvent::Close).run();

        assert_eq!(rig.calls.lock().unwrap().as_slice(), ["close"]);
        let actions = rig.queue.try_drain();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Disconnect { .. }));
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let rig = rig();
        worker(&rig, FrameEvent::Ping).run();

        assert_eq!(rig.calls.lock().unwrap().as_slice(), ["ping"]);
        let actions = rig.queue.try_drain();
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::Send { id, .. } => assert_eq!(*id, ConnectionId::new(2)),
            other => panic!("expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_endpoint_is_noop() {
        let rig = rig();
        let w = WsFrameWorker::new(
            ConnectionId::new(2),
            "/nowhere".into(),
            FrameEvent::Text("hi".into()),
            rig.opened.clone(),
            rig.queue.handle(),
            rig.ctx.clone(),
        );
        w.run();
        assert!(rig.calls.lock().unwrap().is_empty());
        assert!(rig.queue.try_drain().is_empty());
    }
}
