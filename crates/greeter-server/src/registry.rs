use std::collections::HashMap;
use std::sync::Arc;

use greeter_core::{ServerError, SessionId, SessionIdAllocator};
use parking_lot::Mutex;

use crate::session::{Session, SharedSession};

struct Inner {
    ids: SessionIdAllocator,
    sessions: HashMap<SessionId, SharedSession>,
}

/// Process-wide map of live sessions.
///
/// The registry lock only guards membership. Code that also needs a
/// session's lock takes the registry lock first; nothing takes them in the
/// other order.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_allocator(SessionIdAllocator::new())
    }

    /// Registry whose identifiers run out after `limit`.
    pub fn with_id_limit(limit: u64) -> Self {
        Self::with_allocator(SessionIdAllocator::with_limit(limit))
    }

    fn with_allocator(ids: SessionIdAllocator) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ids,
                sessions: HashMap::new(),
            }),
        }
    }

    /// Allocate the next identifier, build the session for it and insert it.
    pub fn add(
        &self,
        make: impl FnOnce(SessionId) -> Session,
    ) -> Result<(SessionId, SharedSession), ServerError> {
        let mut inner = self.inner.lock();
        let id = inner.ids.allocate()?;
        let session = Arc::new(Mutex::new(make(id)));
        inner.sessions.insert(id, Arc::clone(&session));
        Ok((id, session))
    }

    /// Remove `id`. Absent identifiers are a no-op.
    pub fn remove(&self, id: SessionId) -> Option<SharedSession> {
        self.inner.lock().sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.lock().sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on every session, holding the registry lock for the whole
    /// sweep and each session's lock nested inside it.
    pub fn for_each(&self, mut f: impl FnMut(&mut Session)) -> usize {
        let inner = self.inner.lock();
        for session in inner.sessions.values() {
            f(&mut session.lock());
        }
        inner.sessions.len()
    }

    /// Empty the registry, handing back whatever was left.
    pub fn drain(&self) -> Vec<SharedSession> {
        self.inner.lock().sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn ids_exhausted(&self) -> bool {
        self.inner.lock().ids.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::transport::{MemoryTransport, Transport};

    fn transport() -> Arc<dyn Transport> {
        Arc::new(MemoryTransport::new())
    }

    #[test]
    fn add_assigns_increasing_ids() {
        let registry = SessionRegistry::new();
        let t = transport();
        let (a, _) = registry.add(|id| Session::new(id, t.clone())).unwrap();
        let (b, _) = registry.add(|id| Session::new(id, t.clone())).unwrap();
        assert_eq!(a, SessionId::new(1));
        assert_eq!(b, SessionId::new(2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn ids_are_never_reused() {
        let registry = SessionRegistry::new();
        let t = transport();
        let (a, _) = registry.add(|id| Session::new(id, t.clone())).unwrap();
        registry.remove(a);
        let (b, _) = registry.add(|id| Session::new(id, t.clone())).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let t = transport();
        let (id, _) = registry.add(|id| Session::new(id, t.clone())).unwrap();
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.remove(SessionId::new(99)).is_none());
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn removed_handle_stays_usable() {
        let registry = SessionRegistry::new();
        let t = transport();
        let (id, handle) = registry.add(|id| Session::new(id, t.clone())).unwrap();
        registry.remove(id);
        assert_eq!(handle.lock().status(), SessionStatus::WaitConnect);
    }

    #[test]
    fn exhaustion_is_reported_and_latched() {
        let registry = SessionRegistry::with_id_limit(1);
        let t = transport();
        registry.add(|id| Session::new(id, t.clone())).unwrap();
        let err = registry.add(|id| Session::new(id, t.clone())).unwrap_err();
        assert!(matches!(err, ServerError::IdSpaceExhausted { .. }));
        assert!(registry.ids_exhausted());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn for_each_visits_every_session_once() {
        let registry = SessionRegistry::new();
        let t = transport();
        for _ in 0..3 {
            registry.add(|id| Session::new(id, t.clone())).unwrap();
        }
        let mut seen = Vec::new();
        let visited = registry.for_each(|s| seen.push(s.id()));
        seen.sort();
        assert_eq!(visited, 3);
        assert_eq!(seen, vec![SessionId::new(1), SessionId::new(2), SessionId::new(3)]);
    }

    #[test]
    fn drain_empties() {
        let registry = SessionRegistry::new();
        let t = transport();
        registry.add(|id| Session::new(id, t.clone())).unwrap();
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
