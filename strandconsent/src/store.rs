//! Session storage.
//!
//! The protocol persists every mutation with an upsert (`put`) or an in-place
//! `update`, so a durable backend only has to implement [`SessionStore`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ConsentError, Result};
use crate::session::HandshakeSession;

/// Keyed table of handshake sessions.
pub trait SessionStore: Send + Sync {
    /// Insert or overwrite the session with `session.id`.
    fn put(&self, session: HandshakeSession) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<HandshakeSession>>;

    /// Snapshot of every session, in insertion order.
    fn sessions(&self) -> Result<Vec<HandshakeSession>>;

    /// Run a read-check-write on one session atomically with respect to other
    /// store operations. Changes `f` makes are kept even when it returns an
    /// error, so `f` must check before it mutates unless the mutation is
    /// itself the outcome (lazy expiry).
    ///
    /// Fails with [`ConsentError::SessionNotFound`] for an unknown id.
    fn update<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut HandshakeSession) -> Result<R>;

    /// Visit every session mutably; returns how many visits reported a change.
    fn update_all(&self, f: &mut dyn FnMut(&mut HandshakeSession) -> bool) -> Result<usize>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[derive(Debug, Default)]
struct Table {
    sessions: HashMap<String, HandshakeSession>,
    /// Ids in first-insertion order.
    order: Vec<String>,
}

/// Process-local session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    table: RwLock<Table>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, session: HandshakeSession) -> Result<()> {
        let mut table = self.table.write();
        if !table.sessions.contains_key(&session.id) {
            table.order.push(session.id.clone());
        }
        table.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<HandshakeSession>> {
        Ok(self.table.read().sessions.get(id).cloned())
    }

    fn sessions(&self) -> Result<Vec<HandshakeSession>> {
        let table = self.table.read();
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.sessions.get(id).cloned())
            .collect())
    }

    fn update<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut HandshakeSession) -> Result<R>,
    {
        let mut table = self.table.write();
        let session = table
            .sessions
            .get_mut(id)
            .ok_or_else(|| ConsentError::SessionNotFound(id.to_string()))?;
        f(session)
    }

    fn update_all(&self, f: &mut dyn FnMut(&mut HandshakeSession) -> bool) -> Result<usize> {
        let mut table = self.table.write();
        let mut changed = 0;
        for session in table.sessions.values_mut() {
            if f(session) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.table.read().sessions.len())
    }
}

/// A shared store, so the protocol and other components can hold the same
/// table.
impl<T: SessionStore> SessionStore for Arc<T> {
    fn put(&self, session: HandshakeSession) -> Result<()> {
        (**self).put(session)
    }

    fn get(&self, id: &str) -> Result<Option<HandshakeSession>> {
        (**self).get(id)
    }

    fn sessions(&self) -> Result<Vec<HandshakeSession>> {
        (**self).sessions()
    }

    fn update<R, F>(&self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut HandshakeSession) -> Result<R>,
    {
        (**self).update(id, f)
    }

    fn update_all(&self, f: &mut dyn FnMut(&mut HandshakeSession) -> bool) -> Result<usize> {
        (**self).update_all(f)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::{Participant, ParticipantRole};
    use crate::session::{field_set, HandshakeRequest, HandshakeStatus, Metadata};

    fn session(id: &str) -> HandshakeSession {
        let request = HandshakeRequest {
            id: id.into(),
            requester_identifier: "req".into(),
            requester_name: "Requester".into(),
            requested_fields: field_set(["name"]),
            purpose: "test".into(),
            expires_at: 100,
            status: HandshakeStatus::Pending,
            created_at: 0,
            updated_at: 0,
            metadata: Metadata::new(),
        };
        HandshakeSession::new(
            Participant::new("req", "Requester", ParticipantRole::Verifier),
            Participant::new("resp", "Responder", ParticipantRole::Individual),
            request,
        )
    }

    #[test]
    fn put_then_get() {
        let store = MemorySessionStore::new();
        store.put(session("a")).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().id, "a");
        assert!(store.get("b").unwrap().is_none());
    }

    #[test]
    fn put_overwrites_without_reordering() {
        let store = MemorySessionStore::new();
        store.put(session("a")).unwrap();
        store.put(session("b")).unwrap();
        let mut a = session("a");
        a.transition(HandshakeStatus::Rejected, 5).unwrap();
        store.put(a).unwrap();

        let all = store.sessions().unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].status, HandshakeStatus::Rejected);
        assert_eq!(all[1].id, "b");
    }

    #[test]
    fn update_unknown_is_not_found() {
        let store = MemorySessionStore::new();
        let err = store.update("nope", |_| Ok(())).unwrap_err();
        assert!(matches!(err, ConsentError::SessionNotFound(id) if id == "nope"));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn update_keeps_mutation_on_error() {
        let store = MemorySessionStore::new();
        store.put(session("a")).unwrap();
        let result: Result<()> = store.update("a", |s| {
            s.transition(HandshakeStatus::Expired, 200)?;
            Err(ConsentError::Validation("after mutation".into()))
        });
        assert!(result.is_err());
        assert_eq!(
            store.get("a").unwrap().unwrap().status,
            HandshakeStatus::Expired
        );
    }

    #[test]
    fn update_all_counts_changes() {
        let store = MemorySessionStore::new();
        for id in ["a", "b", "c"] {
            store.put(session(id)).unwrap();
        }
        let changed = store
            .update_all(&mut |s: &mut HandshakeSession| {
                s.id != "b" && s.transition(HandshakeStatus::Expired, 1).is_ok()
            })
            .unwrap();
        assert_eq!(changed, 2);
    }

    #[test]
    fn shared_handle_sees_same_table() {
        let store = Arc::new(MemorySessionStore::new());
        let handle = store.clone();
        handle.put(session("a")).unwrap();
        assert_eq!(SessionStore::len(&store).unwrap(), 1);
        handle
            .update("a", |s| s.transition(HandshakeStatus::Rejected, 3))
            .unwrap();
        assert_eq!(
            store.get("a").unwrap().unwrap().status,
            HandshakeStatus::Rejected
        );
    }
}
