//! Session values and the session-store seam.
//!
//! The reactor resolves the session cookie during a WebSocket upgrade and
//! hands the result to the endpoint's opening callback. Persistence is a
//! collaborator concern; this crate carries only the lookup contract and
//! an in-memory store.

use std::collections::HashMap;

use dashmap::DashMap;

/// Name of the session cookie consulted during upgrade.
pub const SESSION_COOKIE: &str = "evsrv_session";

/// A resolved session: id plus string key/value data. An empty id means
/// "no session" — the default handed to `on_open` when the upgrade
/// request carried no cookie or the store had no match.
#[derive(Clone, Debug, Default)]
pub struct Session {
    id: String,
    values: HashMap<String, String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Session {
        Session {
            id: id.into(),
            values: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

pub trait SessionStore: Send + Sync {
    /// Look up a session by id. `None` when unknown or expired.
    fn find(&self, id: &str) -> Option<Session>;
}

/// In-memory store: concurrent map, sessions cloned out on lookup.
#[derive(Default)]
pub struct MemorySessionStore {
    map: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> MemorySessionStore {
        MemorySessionStore::default()
    }

    pub fn insert(&self, session: Session) {
        self.map.insert(session.id().to_string(), session);
    }

    pub fn remove(&self, id: &str) {
        self.map.remove(id);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn find(&self, id: &str) -> Option<Session> {
        self.map.get(id).map(|s| s.value().clone())
    }
}
