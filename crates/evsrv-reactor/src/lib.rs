//! # evsrv-reactor — one thread, all the sockets
//!
//! The reactor multiplexes every client socket on a single thread using
//! the kernel readiness facility (epoll), hands each complete request or
//! frame to a short-lived worker thread, and merges worker output back
//! through the send queue. Application logic never runs here; the
//! reactor never blocks on a worker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Application code (controllers / endpoints)          │
//! │   runs on worker threads, one per request or frame           │
//! └──────────────────┬──────────────────────────────────────────┘
//!                    │ Action::{Send, Disconnect, Upgrade}
//!                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Send Queue (evsrv-core, MPSC)                       │
//! └──────────────────┬──────────────────────────────────────────┘
//!                    │ wait_and_drain() once per cycle
//! ┌──────────────────▼──────────────────────────────────────────┐
//! │          Reactor thread                                      │
//! │   epoll wait → read/assemble → spawn workers                 │
//! │   apply actions → outbound queues → kernel                   │
//! │   registry: id → Connection (single writer, no locks)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design decisions
//!
//! - **Id addressing**: workers hold a `ConnectionId`, never an object
//!   reference — the id survives the HTTP→WebSocket object swap.
//! - **Single-writer registry**: only the reactor thread touches the
//!   registry or the poll set, so neither needs a lock.
//! - **Deferred destruction**: removed connections park in a graveyard
//!   until the next cycle; stale ready events can never alias a reused
//!   descriptor number.
//! - **Handshake-before-readiness**: upgrade stages the 101 response in
//!   the new connection's outbound queue before re-registering it.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod connection;
        pub mod error;
        pub mod handshake;
        pub mod poller;
        pub mod reactor;
        pub mod registry;
        pub mod server;

        pub use connection::{Connection, Protocol};
        pub use error::{ReactorError, Result};
        pub use poller::Poller;
        pub use reactor::Reactor;
        pub use registry::ConnectionRegistry;
        pub use server::{Server, ServerConfig};
    } else {
        compile_error!("evsrv-reactor requires Linux (epoll readiness facility)");
    }
}
