//! Process-wide connection registry.
//!
//! Maps controller-visible connection ids to live sessions. Ids start at 1,
//! only grow, and are never recycled; on wrap-around the assignment loop
//! probes past still-registered ids. The lock guards the map only — no
//! network I/O happens while it is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::session::Session;

#[derive(Default)]
struct Inner {
    next_id: i32,
    connections: HashMap<i32, Arc<Session>>,
}

/// Registry of open MQTT sessions, shared by every control handler.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return its assigned connection id. The id is
    /// also recorded on the session so pushed events carry it.
    pub fn register(&self, session: Arc<Session>) -> i32 {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        loop {
            inner.next_id = inner.next_id.wrapping_add(1);
            if inner.next_id <= 0 {
                // i32 wrapped; restart above zero.
                inner.next_id = 1;
            }
            let connection_id = inner.next_id;
            if inner.connections.contains_key(&connection_id) {
                continue;
            }
            session.set_connection_id(connection_id);
            inner.connections.insert(connection_id, session);
            debug!(connection_id, "connection registered");
            return connection_id;
        }
    }

    /// Look up a session; the returned handle keeps it alive independently
    /// of a concurrent unregister.
    pub fn get(&self, connection_id: i32) -> Option<Arc<Session>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.connections.get(&connection_id).cloned()
    }

    /// Remove and return a session.
    pub fn unregister(&self, connection_id: i32) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let session = inner.connections.remove(&connection_id);
        if session.is_some() {
            debug!(connection_id, "connection unregistered");
        }
        session
    }

    /// Remove and return every session, oldest first. Used on agent
    /// shutdown to close whatever the controller left open.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let mut ids: Vec<i32> = inner.connections.keys().copied().collect();
        ids.sort_unstable();
        ids.iter()
            .filter_map(|id| inner.connections.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .connections
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
