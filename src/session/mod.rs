//! Credential sessions.
//!
//! A session is the server-side record of one authenticated operator: the
//! access key, the secret (encrypted at rest), the region, activity
//! timestamps and the count of client-acknowledged operations in flight.
//! Records are owned by a [`store::SessionStore`]; [`manager::SessionManager`]
//! implements login, token handling and idle expiry on top.

pub mod manager;
pub mod memory;
pub mod store;

use chrono::{DateTime, Utc};

use crate::crypto::EncryptedSecret;

/// One authenticated operator session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub access_key: String,
    pub encrypted_secret: EncryptedSecret,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Operations the client reported as started and not yet ended.
    pub active_operations: u64,
}

impl Session {
    /// True when the session has been idle since before `cutoff` and has no
    /// operations in flight.
    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.active_operations == 0 && self.last_activity_at < cutoff
    }
}

pub use manager::{SessionError, SessionManager};
pub use memory::InMemorySessionStore;
pub use store::{ActiveAdjustment, SessionStore};
