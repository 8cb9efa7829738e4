//! # HTTP action worker
//!
//! One thread per accepted request. The worker owns nothing but its raw
//! input and the connection id; it drives application dispatch once and
//! always terminates by enqueueing exactly one terminal action:
//!
//! - `Send` — the serialized response (keep-alive respected), or
//! - `UpgradeToWebSocket` — the request was a WebSocket handshake, or
//! - `Disconnect` — the connection cannot be kept alive.
//!
//! The reactor never waits on a worker; the gate ticket is only for the
//! graceful-drain barrier at shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use evsrv_core::dispatch::DispatchOutcome;
use evsrv_core::gate::WorkerGate;
use evsrv_core::http::{self, RequestHead};
use evsrv_core::queue::QueueHandle;
use evsrv_core::{AppContext, ConnectionId, HttpResponse};

pub struct HttpActionWorker {
    id: ConnectionId,
    request: Vec<u8>,
    peer: SocketAddr,
    queue: QueueHandle,
    ctx: Arc<AppContext>,
}

impl HttpActionWorker {
    pub fn new(
        id: ConnectionId,
        request: Vec<u8>,
        peer: SocketAddr,
        queue: QueueHandle,
        ctx: Arc<AppContext>,
    ) -> HttpActionWorker {
        HttpActionWorker {
            id,
            request,
            peer,
            queue,
            ctx,
        }
    }

    /// Detach onto a fresh named thread, accounted by the gate.
    pub fn spawn(self, gate: &Arc<WorkerGate>) {
        let ticket = gate.enter();
        let id = self.id;
        let result = thread::Builder::new()
            .name("evsrv-http-worker".into())
            .spawn(move || {
                let _ticket = ticket;
                self.run();
            });
        if let Err(e) = result {
            log::error!("failed to spawn http worker for {}: {}", id, e);
        }
    }

    /// Created → Running → Completed. Dispatch runs exactly once, on
    /// this thread.
    pub fn run(self) {
        let head_len = match http::head_len(&self.request) {
            Some(n) => n,
            None => {
                // The reactor only hands over complete requests; an
                // incomplete one here is a logic error.
                log::error!("logic error: incomplete request handed to worker ({})", self.id);
                let _ = self.queue.enqueue_disconnect(self.id);
                return;
            }
        };

        let head = match RequestHead::parse(&self.request[..head_len]) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("unparseable request from {}: {}", self.peer, e);
                let _ = self.queue.enqueue_disconnect(self.id);
                return;
            }
        };

        if head.is_websocket_upgrade() {
            log::debug!("{} {} → websocket upgrade ({})", head.method(), head.path(), self.id);
            let _ = self.queue.enqueue_upgrade(self.id, head);
            return;
        }

        let body = &self.request[head_len..];
        let response = self.dispatch(&head, body);
        self.finish(&head, response);
    }

    fn dispatch(&self, head: &RequestHead, body: &[u8]) -> HttpResponse {
        let segment = head.first_path_segment();
        let mut controller = match self.ctx.controllers.resolve_segment(segment) {
            Some(c) => c,
            None => {
                log::debug!("no controller for segment {:?} ({})", segment, self.id);
                return HttpResponse::text(404, "Not Found\n");
            }
        };

        let action = match head.second_path_segment() {
            "" => "index",
            a => a,
        };

        match controller.invoke(action, head, body) {
            DispatchOutcome::Response(resp) => resp,
            DispatchOutcome::NoSuchAction => {
                log::warn!("no such action {:?} for segment {:?}", action, segment);
                HttpResponse::text(404, "Not Found\n")
            }
        }
    }

    fn finish(self, head: &RequestHead, mut response: HttpResponse) {
        if !head.keep_alive() {
            response.set_close(true);
        }

        match response.into_send_buffer() {
            Ok(buf) => {
                let _ = self.queue.enqueue_send_buffer(self.id, buf);
            }
            Err(e) => {
                // File body went away between dispatch and serialization.
                log::error!("response body unreadable for {}: {}", self.id, e);
                let fallback = HttpResponse::text(500, "Internal Server Error\n");
                match fallback.into_send_buffer() {
                    Ok(buf) => {
                        let _ = self.queue.enqueue_send_buffer(self.id, buf);
                    }
                    Err(_) => {
                        let _ = self.queue.enqueue_disconnect(self.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evsrv_core::queue::SendQueue;
    use evsrv_core::{Action, Body};
    use std::time::Duration;

    struct EchoController;

    impl evsrv_core::ActionController for EchoController {
        fn invoke(&mut self, action: &str, _request: &RequestHead, body: &[u8]) -> DispatchOutcome {
            match action {
                "index" => DispatchOutcome::Response(HttpResponse::text(200, "index page")),
                "echo" => DispatchOutcome::Response(
                    HttpResponse::new(200).with_body(Body::Bytes(body.to_vec())),
                ),
                _ => DispatchOutcome::NoSuchAction,
            }
        }
    }

    fn test_ctx() -> Arc<AppContext> {
        let mut ctx = AppContext::new();
        ctx.controllers.register("EchoController", || EchoController);
        Arc::new(ctx)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    fn run_worker(request: &[u8]) -> Vec<Action> {
        let queue = SendQueue::new();
        let worker = HttpActionWorker::new(
            ConnectionId::new(1),
            request.to_vec(),
            peer(),
            queue.handle(),
            test_ctx(),
        );
        worker.run();
        queue.try_drain()
    }

    fn buffer_bytes(action: Action) -> Vec<u8> {
        match action {
            Action::Send { mut buf, .. } => {
                let mut out = Vec::new();
                loop {
                    let chunk = buf.next_chunk().unwrap();
                    if chunk.is_empty() {
                        break;
                    }
                    out.extend_from_slice(chunk);
                    let n = chunk.len();
                    buf.advance(n);
                }
                out
            }
            other => panic!("expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_keep_alive_response() {
        let mut actions = run_worker(b"GET /echo HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(actions.len(), 1);
        let bytes = buffer_bytes(actions.remove(0));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("index page"));
    }

    #[test]
    fn test_connection_close_marks_buffer() {
        let queue = SendQueue::new();
        let worker = HttpActionWorker::new(
            ConnectionId::new(1),
            b"GET /echo HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec(),
            peer(),
            queue.handle(),
            test_ctx(),
        );
        worker.run();
        let mut actions = queue.try_drain();
        assert_eq!(actions.len(), 1);
        match actions.remove(0) {
            Action::Send { buf, .. } => assert!(buf.wants_close()),
            other => panic!("expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_post_body_reaches_controller() {
        let mut actions =
            run_worker(b"POST /echo/echo HTTP/1.1\r\nContent-Length: 7\r\n\r\npayload");
        let bytes = buffer_bytes(actions.remove(0));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with("payload"));
    }

    #[test]
    fn test_dispatch_miss_yields_404() {
        let mut actions = run_worker(b"GET /nowhere HTTP/1.1\r\n\r\n");
        assert_eq!(actions.len(), 1);
        let bytes = buffer_bytes(actions.remove(0));
        assert!(String::from_utf8(bytes).unwrap().starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn test_missing_action_yields_404() {
        let mut actions = run_worker(b"GET /echo/unknownaction HTTP/1.1\r\n\r\n");
        let bytes = buffer_bytes(actions.remove(0));
        assert!(String::from_utf8(bytes).unwrap().starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn test_upgrade_request_emits_upgrade_action() {
        let actions = run_worker(
            b"GET /chat HTTP/1.1\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              \r\n",
        );
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::UpgradeToWebSocket { id, request } => {
                assert_eq!(*id, ConnectionId::new(1));
                assert_eq!(request.websocket_key(), Some("dGhlIHNhbXBsZSBub25jZQ=="));
            }
            other => panic!("expected upgrade, got {:?}", other),
        }
    }

    #[test]
    fn test_spawned_worker_is_accounted() {
        let queue = SendQueue::new();
        let gate = Arc::new(WorkerGate::new());
        let worker = HttpActionWorker::new(
            ConnectionId::new(1),
            b"GET /echo HTTP/1.1\r\n\r\n".to_vec(),
            peer(),
            queue.handle(),
            test_ctx(),
        );
        worker.spawn(&gate);
        assert!(gate.await_all_done(Duration::from_secs(2)));
        assert_eq!(queue.try_drain().len(), 1);
    }
}
