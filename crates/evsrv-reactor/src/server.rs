//! Accept loop, run loop, graceful shutdown.
//!
//! The server owns the listening socket and drives the reactor from the
//! calling thread: poll for readiness, service ready connections, drain
//! the send queue, repeat. The reactor suspends only inside the kernel
//! wait and the queue's timed wait — never on a worker.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evsrv_core::gate::WorkerGate;
use evsrv_core::queue::QueueHandle;
use evsrv_core::AppContext;

use crate::error::{ReactorError, Result};
use crate::reactor::Reactor;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    /// Ready-event buffer size per poll.
    pub max_events: usize,
    /// Kernel wait bound per cycle (milliseconds).
    pub poll_timeout_ms: u16,
    /// Send-queue wait bound per cycle.
    pub queue_wait: Duration,
    /// Bound on the worker drain at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: "0.0.0.0:8080".into(),
            max_events: 128,
            poll_timeout_ms: 100,
            queue_wait: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Server {
    listener: TcpListener,
    reactor: Reactor,
    config: ServerConfig,
    gate: Arc<WorkerGate>,
}

impl Server {
    /// Bind the listening socket and set up the reactor. Fatal failures
    /// (bind, poll-set creation, listener registration) surface here;
    /// nothing after startup is allowed to kill the process.
    pub fn bind(config: ServerConfig, ctx: Arc<AppContext>) -> Result<Server> {
        let listener = TcpListener::bind(&config.addr)?;
        listener.set_nonblocking(true)?;

        let gate = Arc::new(WorkerGate::new());
        let reactor = Reactor::new(ctx, gate.clone(), config.max_events)?;

        if !reactor.register_listener(listener.as_fd()) {
            return Err(ReactorError::ListenerRegister);
        }

        if let Ok(addr) = listener.local_addr() {
            log::info!("listening on {}", addr);
        }

        Ok(Server {
            listener,
            reactor,
            config,
            gate,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn queue_handle(&self) -> QueueHandle {
        self.reactor.queue_handle()
    }

    pub fn worker_gate(&self) -> Arc<WorkerGate> {
        self.gate.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.reactor.connection_count()
    }

    /// Drive the reactor until `running` goes false, then shut down
    /// gracefully.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            let ready = self.reactor.poll(self.config.poll_timeout_ms);
            if ready > 0 {
                while let Some(id) = self.reactor.next_ready() {
                    if id.is_listener() {
                        self.accept_ready();
                        continue;
                    }
                    if self.reactor.can_read() {
                        self.reactor.handle_readable(id);
                    }
                    if self.reactor.can_write() {
                        self.reactor.handle_writable(id);
                    }
                }
            }
            self.reactor.drain_send_queue(self.config.queue_wait);
        }
        self.shutdown();
    }

    /// Accept until the listener would block (edge-triggered).
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.reactor.adopt(stream, peer);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop accepting, wait (bounded) for live workers to drain, apply
    /// what they managed to enqueue, then close everything.
    fn shutdown(&mut self) {
        log::info!(
            "shutting down: {} connections, {} live workers",
            self.reactor.connection_count(),
            self.gate.live_count(),
        );

        self.reactor.remove_listener(self.listener.as_fd());

        if !self.gate.await_all_done(self.config.shutdown_timeout) {
            log::warn!(
                "worker drain timed out; {} still live",
                self.gate.live_count()
            );
        }

        // Final application pass for actions the drained workers emitted.
        self.reactor.drain_send_queue(Duration::ZERO);
        self.reactor.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evsrv_core::dispatch::{DispatchOutcome, Outbox, WsEndpoint};
    use evsrv_core::http::RequestHead;
    use evsrv_core::{ActionController, HttpResponse};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    struct PingController;

    impl ActionController for PingController {
        fn invoke(&mut self, action: &str, _request: &RequestHead, _body: &[u8]) -> DispatchOutcome {
            match action {
                "index" => DispatchOutcome::Response(HttpResponse::text(200, "pong")),
                _ => DispatchOutcome::NoSuchAction,
            }
        }
    }

    struct EchoEndpoint {
        outbox: Outbox,
    }

    impl WsEndpoint for EchoEndpoint {
        fn outbox(&mut self) -> &mut Outbox {
            &mut self.outbox
        }

        fn on_text_received(&mut self, text: &str) {
            self.outbox.send_text(text);
        }
    }

    fn demo_ctx() -> Arc<AppContext> {
        let mut ctx = AppContext::new();
        ctx.controllers.register("PingController", || PingController);
        ctx.endpoints
            .register("EchoEndpoint", || EchoEndpoint { outbox: Outbox::new() });
        Arc::new(ctx)
    }

    fn start_server() -> (SocketAddr, Arc<AtomicBool>, thread::JoinHandle<()>) {
        let config = ServerConfig {
            addr: "127.0.0.1:0".into(),
            poll_timeout_ms: 10,
            queue_wait: Duration::from_millis(2),
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let mut server = Server::bind(config, demo_ctx()).unwrap();
        let addr = server.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let join = thread::spawn(move || server.run(&flag));
        (addr, running, join)
    }

    fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut got = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            if got.windows(needle.len()).any(|w| w == needle) {
                return got;
            }
            match stream.read(&mut chunk) {
                Ok(0) => return got,
                Ok(n) => got.extend_from_slice(&chunk[..n]),
                Err(e) => panic!("read failed: {}", e),
            }
        }
    }

    #[test]
    fn test_http_request_keep_alive_roundtrip() {
        let (addr, running, join) = start_server();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET /ping HTTP/1.1\r\nHost: t\r\n\r\n")
            .unwrap();
        let first = read_until(&mut client, b"pong");
        let text = String::from_utf8_lossy(&first).into_owned();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));

        // Connection stayed registered: a second request on the same
        // socket still answers.
        client
            .write_all(b"GET /ping HTTP/1.1\r\nHost: t\r\n\r\n")
            .unwrap();
        let second = read_until(&mut client, b"pong");
        assert!(!second.is_empty());

        running.store(false, Ordering::Relaxed);
        join.join().unwrap();
    }

    #[test]
    fn test_websocket_upgrade_and_echo() {
        let (addr, running, join) = start_server();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(
                b"GET /echo HTTP/1.1\r\n\
                  Host: t\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  \r\n",
            )
            .unwrap();
        let handshake = read_until(&mut client, b"\r\n\r\n");
        let text = String::from_utf8_lossy(&handshake).into_owned();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        // Masked client text frame "hi".
        let mask = [9u8, 8, 7, 6];
        let mut frame = vec![0x81, 0x82];
        frame.extend_from_slice(&mask);
        frame.extend(b"hi".iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        client.write_all(&frame).unwrap();

        // Server echoes an unmasked text frame back.
        let reply = read_until(&mut client, b"hi");
        assert_eq!(&reply[..2], &[0x81, 0x02]);
        assert_eq!(&reply[2..4], b"hi");

        running.store(false, Ordering::Relaxed);
        join.join().unwrap();
    }

    #[test]
    fn test_unknown_path_gets_404() {
        let (addr, running, join) = start_server();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET /nothing/here HTTP/1.1\r\nHost: t\r\n\r\n")
            .unwrap();
        let reply = read_until(&mut client, b"\r\n\r\n");
        assert!(String::from_utf8_lossy(&reply).starts_with("HTTP/1.1 404 Not Found\r\n"));

        running.store(false, Ordering::Relaxed);
        join.join().unwrap();
    }
}
