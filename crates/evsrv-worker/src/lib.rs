//! # evsrv-worker — ephemeral application execution
//!
//! A worker is a short-lived, connection-scoped unit of application
//! execution: one thread per HTTP request or WebSocket frame, never
//! reused, never cancelled. Workers isolate application code from the
//! reactor — dispatch can block, allocate, or take its time without
//! ever stalling the I/O loop.
//!
//! Workers hold a `ConnectionId` and a `QueueHandle`, nothing else; all
//! of their output flows through the send queue. The `WorkerGate`
//! (evsrv-core) accounts every spawn so shutdown can drain gracefully.

pub mod http_worker;
pub mod ws_worker;

pub use http_worker::HttpActionWorker;
pub use ws_worker::WsFrameWorker;
