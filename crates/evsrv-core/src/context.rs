//! Process-wide application context.
//!
//! One explicit object built at startup and passed by handle to the
//! components that need it — the reactor (session resolution during
//! upgrade) and the workers (controller/endpoint resolution). There is
//! no implicit global lookup; teardown is the drop of the last handle.

use std::sync::Arc;

use crate::dispatch::{ControllerRegistry, EndpointRegistry};
use crate::session::{MemorySessionStore, SessionStore};

pub struct AppContext {
    pub controllers: ControllerRegistry,
    pub endpoints: EndpointRegistry,
    pub sessions: Arc<dyn SessionStore>,
}

impl AppContext {
    /// Empty registries and an in-memory session store.
    pub fn new() -> AppContext {
        AppContext {
            controllers: ControllerRegistry::new(),
            endpoints: EndpointRegistry::new(),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> AppContext {
        self.sessions = sessions;
        self
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}
