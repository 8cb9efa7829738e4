//! # evsrv demo HTTP/WebSocket server
//!
//! One reactor thread multiplexing all sockets, one worker thread per
//! request or frame. Serves a demo controller on `/demo` and a
//! WebSocket echo endpoint on `/echo`.
//!
//! ## Usage
//!
//!     cargo run -p evsrv-httpd --release -- [--port 8080]
//!
//! Environment variables (`evsrv_port`, `evsrv_poll_timeout_ms`,
//! `evsrv_queue_wait_ms`) are read first; CLI flags override them.
//!
//! ## Try it
//!
//!     curl http://127.0.0.1:8080/demo
//!     curl http://127.0.0.1:8080/demo/time
//!     websocat ws://127.0.0.1:8080/echo

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evsrv_core::dispatch::{DispatchOutcome, Outbox, WsEndpoint};
use evsrv_core::http::RequestHead;
use evsrv_core::{ActionController, AppContext, HttpResponse, Session};
use evsrv_reactor::{Server, ServerConfig};

static RUNNING: AtomicBool = AtomicBool::new(true);
static TOTAL_REQUESTS: AtomicU64 = AtomicU64::new(0);

// ── Demo controller ──

struct DemoController;

impl ActionController for DemoController {
    fn invoke(&mut self, action: &str, _request: &RequestHead, _body: &[u8]) -> DispatchOutcome {
        TOTAL_REQUESTS.fetch_add(1, Ordering::Relaxed);
        match action {
            "index" => DispatchOutcome::Response(HttpResponse::html(
                200,
                "<h1>evsrv</h1><p>reactor up, workers spawning.</p>",
            )),
            "time" => {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                DispatchOutcome::Response(HttpResponse::text(200, format!("{}\n", now)))
            }
            _ => DispatchOutcome::NoSuchAction,
        }
    }
}

// ── Demo WebSocket endpoint ──

struct EchoEndpoint {
    outbox: Outbox,
}

impl WsEndpoint for EchoEndpoint {
    fn outbox(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    fn on_open(&mut self, session: Session) {
        if session.is_empty() {
            self.outbox.send_text("hello, anonymous");
        } else {
            self.outbox.send_text(format!("hello, session {}", session.id()));
        }
    }

    fn on_text_received(&mut self, text: &str) {
        self.outbox.send_text(text);
    }

    fn on_binary_received(&mut self, data: &[u8]) {
        self.outbox.send_binary(data.to_vec());
    }
}

// ── Main ──

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    // Defaults
    let mut port: u16 = 8080;
    let mut poll_timeout_ms: u16 = 100;
    let mut queue_wait_ms: u64 = 10;

    // Phase 1: evsrv_* env vars
    if let Ok(v) = std::env::var("evsrv_port") {
        if let Ok(p) = v.parse::<u16>() { port = p; }
    }
    if let Ok(v) = std::env::var("evsrv_poll_timeout_ms") {
        if let Ok(t) = v.parse::<u16>() { poll_timeout_ms = t; }
    }
    if let Ok(v) = std::env::var("evsrv_queue_wait_ms") {
        if let Ok(t) = v.parse::<u64>() { queue_wait_ms = t; }
    }

    // Phase 2: CLI flags override env vars
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if let Some(p) = args.get(i).and_then(|s| s.parse().ok()) { port = p; }
            }
            "--poll-timeout" => {
                i += 1;
                if let Some(t) = args.get(i).and_then(|s| s.parse().ok()) { poll_timeout_ms = t; }
            }
            s if s.parse::<u16>().is_ok() => {
                port = s.parse().unwrap();
            }
            _ => {}
        }
        i += 1;
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
        libc::signal(libc::SIGTERM, handle_sigint as usize);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    // ── 1. Application context: registries built at startup ──
    let mut ctx = AppContext::new();
    ctx.controllers.register("DemoController", || DemoController);
    ctx.endpoints
        .register("EchoEndpoint", || EchoEndpoint { outbox: Outbox::new() });

    // ── 2. Bind + reactor setup (fatal on failure) ──
    let config = ServerConfig {
        addr: format!("0.0.0.0:{}", port),
        poll_timeout_ms,
        queue_wait: Duration::from_millis(queue_wait_ms),
        ..Default::default()
    };
    let mut server = match Server::bind(config, Arc::new(ctx)) {
        Ok(s) => s,
        Err(e) => {
            log::error!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    eprintln!("evsrv-httpd: port={} poll={}ms queue_wait={}ms", port, poll_timeout_ms, queue_wait_ms);
    eprintln!("evsrv-httpd: model = one reactor thread + one worker thread per request/frame");

    // ── 3. Stats thread ──
    let gate = server.worker_gate();
    let _stats = std::thread::Builder::new()
        .name("stats".into())
        .spawn(move || {
            let start = std::time::Instant::now();
            loop {
                std::thread::sleep(Duration::from_secs(5));
                if !RUNNING.load(Ordering::Relaxed) {
                    break;
                }
                eprintln!(
                    "[{:.1}s] reqs={} live_workers={}",
                    start.elapsed().as_secs_f64(),
                    TOTAL_REQUESTS.load(Ordering::Relaxed),
                    gate.live_count(),
                );
            }
        })
        .unwrap();

    // ── 4. Reactor loop on the main thread ──
    server.run(&RUNNING);

    eprintln!(
        "\nevsrv-httpd: shutdown — {} requests served",
        TOTAL_REQUESTS.load(Ordering::Relaxed)
    );
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}
