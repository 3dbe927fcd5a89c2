//! Abstract session store trait.
//!
//! Any session backend must implement [`SessionStore`].  The trait uses
//! manually desugared async methods (pinned futures) so an external shared
//! store can replace the in-process map without touching callers.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

use super::Session;

/// Boxed future returned by [`SessionStore`] methods.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Result of adjusting a session's active-operation count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveAdjustment {
    pub previous: u64,
    pub current: u64,
}

impl ActiveAdjustment {
    /// True when the count actually went down.
    pub fn decreased(&self) -> bool {
        self.current < self.previous
    }
}

/// Storage for session records.
pub trait SessionStore: Send + Sync + 'static {
    /// Insert or replace a session.
    fn put(&self, session: Session) -> SessionFuture<'_, ()>;

    /// Fetch a session by id.
    fn get(&self, id: &str) -> SessionFuture<'_, Option<Session>>;

    /// Remove a session, returning the record as it was at removal.
    fn delete(&self, id: &str) -> SessionFuture<'_, Option<Session>>;

    /// Record activity at `at`.  Returns whether the session exists.
    fn touch(&self, id: &str, at: DateTime<Utc>) -> SessionFuture<'_, bool>;

    /// Add `delta` to the active-operation count, flooring at zero.
    /// `None` when the session does not exist.
    fn adjust_active(&self, id: &str, delta: i64) -> SessionFuture<'_, Option<ActiveAdjustment>>;

    /// Remove every session idle since before `cutoff` with no operations
    /// in flight, returning the removed ids.
    fn sweep_idle(&self, cutoff: DateTime<Utc>) -> SessionFuture<'_, Vec<String>>;

    /// Number of live sessions.
    fn len(&self) -> SessionFuture<'_, usize>;
}
