//! # evsrv-core — leaf types for the evsrv reactor stack
//!
//! Everything the reactor thread and the worker threads agree on lives
//! here: connection identifiers, pending actions, the send queue that
//! carries them, live-worker accounting, and the dispatch seams
//! (controllers, WebSocket endpoints, sessions).
//!
//! ## The hand-off contract
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │   Worker threads (one per request / frame, short-lived) │
//! │   hold: ConnectionId + QueueHandle — never a reference  │
//! │   emit: Action::{Send, Disconnect, UpgradeToWebSocket}  │
//! └──────────────────┬──────────────────────────────────────┘
//!                    │ SendQueue (MPSC, FIFO)
//!                    ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │   Reactor thread (sole consumer)                        │
//! │   wait_and_drain() → apply batch in enqueue order       │
//! │   registry: the only place an id becomes an object      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-connection FIFO falls out of the single channel; nothing else is
//! shared between the two sides.

pub mod action;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod http;
pub mod id;
pub mod queue;
pub mod session;
pub mod ws;

// Re-export the main types
pub use action::{Action, Body, SendBuffer};
pub use context::AppContext;
pub use dispatch::{
    ActionController, ControlDirective, ControllerRegistry, DispatchOutcome, EndpointRegistry,
    FrameEvent, HttpResponse, Outbox, OutgoingItem, WsEndpoint,
};
pub use error::{CoreError, Result};
pub use gate::{WorkerGate, WorkerTicket};
pub use http::RequestHead;
pub use id::ConnectionId;
pub use queue::{QueueHandle, SendQueue};
pub use session::{MemorySessionStore, Session, SessionStore, SESSION_COOKIE};
