//! Open sessions of an engine.

use super::Session;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub(crate) fn insert(&self, session: Arc<Session>) {
        self.sessions.write().insert(session.id(), session);
    }

    pub(crate) fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Expires sessions idle for `timeout` and forgets closed ones.
    /// Returns the number of expired sessions.
    pub(crate) fn sweep(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        let expired = candidates
            .iter()
            .filter(|s| s.expire_if_idle(timeout, now))
            .count();
        self.sessions.write().retain(|_, s| !s.is_closed());
        expired
    }

    /// Closes every session, committing what they have pending.
    pub(crate) fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Err(err) = session.close() {
                warn!(session = %session.id(), error = %err, "pending changes lost on close");
            }
        }
    }
}
