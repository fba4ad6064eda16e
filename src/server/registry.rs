// Live client sessions
//
// Admission checks the session count and inserts the new session under one lock,
// so concurrent accepts can never push the registry past its limit. The returned
// `SessionSlot` releases the entry when dropped, whichever way the worker exits.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, SessionInfo>,
    next_id: SessionId,
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    limit: Option<usize>,
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    /// `limit` of `None` admits every connection.
    pub fn new(limit: Option<usize>) -> Arc<Self> {
        Arc::new(ConnectionRegistry {
            limit,
            inner: Mutex::new(RegistryInner::default()),
        })
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Entries stay consistent even if a holder panicked mid-way.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a slot for `peer`, or `None` when the registry is full.
    pub fn try_register(self: &Arc<Self>, peer: SocketAddr) -> Option<SessionSlot> {
        let mut inner = self.lock();
        if let Some(limit) = self.limit {
            if inner.sessions.len() >= limit {
                return None;
            }
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.sessions.insert(
            id,
            SessionInfo { id, peer },
        );

        Some(SessionSlot {
            id,
            registry: Arc::clone(self),
        })
    }

    fn release(&self, id: SessionId) {
        self.lock().sessions.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.lock().sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }
}

/// Registration held by one connection worker.
#[derive(Debug)]
pub struct SessionSlot {
    id: SessionId,
    registry: Arc<ConnectionRegistry>,
}

impl SessionSlot {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
