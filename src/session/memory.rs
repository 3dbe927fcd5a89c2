//! In-process session store backed by a `HashMap`.
//!
//! Suitable for a single instance.  Locks are held only for the duration
//! of a map operation and never across an `.await`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::store::{ActiveAdjustment, SessionFuture, SessionStore};
use super::Session;

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn put(&self, session: Session) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().expect("rwlock poisoned");
            sessions.insert(session.id.clone(), session);
            Ok(())
        })
    }

    fn get(&self, id: &str) -> SessionFuture<'_, Option<Session>> {
        let id = id.to_string();
        Box::pin(async move {
            let sessions = self.sessions.read().expect("rwlock poisoned");
            Ok(sessions.get(&id).cloned())
        })
    }

    fn delete(&self, id: &str) -> SessionFuture<'_, Option<Session>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut sessions = self.sessions.write().expect("rwlock poisoned");
            Ok(sessions.remove(&id))
        })
    }

    fn touch(&self, id: &str, at: DateTime<Utc>) -> SessionFuture<'_, bool> {
        let id = id.to_string();
        Box::pin(async move {
            let mut sessions = self.sessions.write().expect("rwlock poisoned");
            match sessions.get_mut(&id) {
                Some(session) => {
                    session.last_activity_at = at;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn adjust_active(&self, id: &str, delta: i64) -> SessionFuture<'_, Option<ActiveAdjustment>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut sessions = self.sessions.write().expect("rwlock poisoned");
            let Some(session) = sessions.get_mut(&id) else {
                return Ok(None);
            };
            let previous = session.active_operations;
            let current = if delta >= 0 {
                previous.saturating_add(delta as u64)
            } else {
                previous.saturating_sub(delta.unsigned_abs())
            };
            session.active_operations = current;
            Ok(Some(ActiveAdjustment { previous, current }))
        })
    }

    fn sweep_idle(&self, cutoff: DateTime<Utc>) -> SessionFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut sessions = self.sessions.write().expect("rwlock poisoned");
            let expired: Vec<String> = sessions
                .values()
                .filter(|s| s.is_idle_since(cutoff))
                .map(|s| s.id.clone())
                .collect();
            for id in &expired {
                sessions.remove(id);
            }
            Ok(expired)
        })
    }

    fn len(&self) -> SessionFuture<'_, usize> {
        Box::pin(async move { Ok(self.sessions.read().expect("rwlock poisoned").len()) })
    }
}
