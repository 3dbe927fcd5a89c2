//! Session lifecycle: login, token verification, refresh, logout, the
//! per-session operation counter, and idle expiry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{ActiveAdjustment, SessionStore};
use super::Session;
use crate::auth::{mask_access_key, TokenError, TokenIssuer, TokenKind, TokenPair};
use crate::config::AuthConfig;
use crate::crypto::{CryptoError, SecretCipher, SecretKey};
use crate::metrics;
use crate::regions::RegionRegistry;
use crate::storage::cache::ClientCache;
use crate::storage::errors::StorageError;
use crate::storage::service::Credentials;

/// Failures of session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session record no longer exists.
    #[error("Session expired. Please log in again")]
    Expired,

    #[error("Unknown region: {0}")]
    InvalidRegion(String),

    #[error("{0}")]
    MissingField(&'static str),

    /// Credential verification failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A successful login.
#[derive(Debug)]
pub struct LoginOutcome {
    pub session: Session,
    pub tokens: TokenPair,
}

/// Owns session records and everything derived from them.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cipher: SecretCipher,
    tokens: TokenIssuer,
    clients: Arc<ClientCache>,
    regions: Arc<RegionRegistry>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cipher: SecretCipher,
        tokens: TokenIssuer,
        clients: Arc<ClientCache>,
        regions: Arc<RegionRegistry>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cipher,
            tokens,
            clients,
            regions,
            idle_timeout,
        }
    }

    /// Build from configuration.  An empty `encryption_key` gets a random
    /// per-process key.
    pub fn from_config(
        config: &AuthConfig,
        store: Arc<dyn SessionStore>,
        clients: Arc<ClientCache>,
        regions: Arc<RegionRegistry>,
    ) -> anyhow::Result<Self> {
        let key = if config.encryption_key.is_empty() {
            warn!("auth.encryption_key is not set; using a random per-process key");
            SecretKey::random()
        } else {
            SecretKey::from_base64(&config.encryption_key)?
        };
        Ok(Self::new(
            store,
            SecretCipher::new(&key),
            TokenIssuer::from_config(config),
            clients,
            regions,
            config.session_idle_timeout(),
        ))
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Verify credentials against the storage service and, only on success,
    /// store a new session.  Returns the session.
    pub async fn create_session(
        &self,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> Result<Session, SessionError> {
        if access_key.is_empty() {
            return Err(SessionError::MissingField("Access key is required"));
        }
        if secret_key.is_empty() {
            return Err(SessionError::MissingField("Secret key is required"));
        }
        if !self.regions.is_valid_region(region) {
            return Err(SessionError::InvalidRegion(region.to_string()));
        }

        let masked = mask_access_key(access_key);
        if let Err(e) = self
            .clients
            .test_connection(access_key, secret_key, region)
            .await
        {
            warn!("Login rejected for {} in {}: {}", masked, region, e);
            return Err(e.into());
        }

        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            access_key: access_key.to_string(),
            encrypted_secret: self.cipher.encrypt(secret_key)?,
            region: region.to_string(),
            created_at: now,
            last_activity_at: now,
            active_operations: 0,
        };
        self.store.put(session.clone()).await?;
        self.report_session_count().await;

        info!("Session created for {} in {}", masked, region);
        Ok(session)
    }

    /// Create a session and issue its token pair.
    pub async fn login(
        &self,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> Result<LoginOutcome, SessionError> {
        let session = self.create_session(access_key, secret_key, region).await?;
        let tokens = self.tokens.issue_pair(&session.id)?;
        Ok(LoginOutcome { session, tokens })
    }

    pub async fn get_session(&self, id: &str) -> Result<Session, SessionError> {
        self.store.get(id).await?.ok_or(SessionError::Expired)
    }

    pub async fn touch(&self, id: &str) -> Result<(), SessionError> {
        if self.store.touch(id, Utc::now()).await? {
            Ok(())
        } else {
            Err(SessionError::Expired)
        }
    }

    /// Resolve a session token to a live session and record the activity.
    pub async fn authenticate(&self, token: &str) -> Result<Session, SessionError> {
        let claims = self.tokens.verify_kind(token, TokenKind::Session)?;
        self.touch(&claims.sub).await?;
        self.get_session(&claims.sub).await
    }

    /// Exchange a valid session or refresh token for a new pair.  Fails
    /// with [`SessionError::Expired`] when the session record is gone.
    pub async fn refresh(&self, token: &str) -> Result<TokenPair, SessionError> {
        let claims = self.tokens.verify(token)?;
        self.touch(&claims.sub).await?;
        debug!("Refreshing tokens for session {}", claims.sub);
        Ok(self.tokens.issue_pair(&claims.sub)?)
    }

    pub async fn increment_active(&self, id: &str) -> Result<ActiveAdjustment, SessionError> {
        self.store
            .adjust_active(id, 1)
            .await?
            .ok_or(SessionError::Expired)
    }

    /// Decrement the session's counter, floored at zero.
    pub async fn decrement_active(&self, id: &str) -> Result<ActiveAdjustment, SessionError> {
        self.store
            .adjust_active(id, -1)
            .await?
            .ok_or(SessionError::Expired)
    }

    /// Remove a session, returning the removed record.  Its
    /// `active_operations` is the count at removal, not at authentication.
    pub async fn destroy(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let removed = self.store.delete(id).await?;
        if removed.is_some() {
            info!("Session {} destroyed", id);
        }
        self.report_session_count().await;
        Ok(removed)
    }

    /// The session's storage identity with the secret decrypted.
    pub fn credentials(&self, session: &Session) -> Result<Credentials, SessionError> {
        let secret = self.cipher.decrypt(&session.encrypted_secret)?;
        Ok(Credentials {
            access_key: session.access_key.clone(),
            secret_key: secret,
            region: session.region.clone(),
        })
    }

    /// Remove sessions idle past the timeout that have nothing in flight.
    pub async fn sweep_idle(&self) -> Result<usize, SessionError> {
        let idle = chrono::Duration::from_std(self.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(8));
        let removed = self.store.sweep_idle(Utc::now() - idle).await?;
        if !removed.is_empty() {
            info!("Expired {} idle sessions", removed.len());
            self.report_session_count().await;
        }
        Ok(removed.len())
    }

    pub async fn session_count(&self) -> Result<usize, SessionError> {
        Ok(self.store.len().await?)
    }

    async fn report_session_count(&self) {
        if let Ok(count) = self.store.len().await {
            metrics::set_active_sessions(count);
        }
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `every` until aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_idle().await {
                    warn!("Idle session sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionsConfig;
    use crate::session::memory::InMemorySessionStore;
    use crate::storage::errors::StorageErrorKind;
    use crate::storage::memory::MemoryStorage;

    fn manager_with(store: Arc<InMemorySessionStore>, idle_timeout: Duration) -> SessionManager {
        let storage = Arc::new(MemoryStorage::with_credentials([("AKIAEXAMPLE0001", "secret")]));
        let regions = Arc::new(RegionRegistry::from_config(&RegionsConfig::default()).unwrap());
        SessionManager::new(
            store,
            SecretCipher::new(&SecretKey::random()),
            TokenIssuer::new(b"k", Duration::from_secs(60), Duration::from_secs(600)),
            Arc::new(ClientCache::new(Arc::new(storage))),
            regions,
            idle_timeout,
        )
    }

    fn manager() -> SessionManager {
        manager_with(Arc::new(InMemorySessionStore::new()), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_login_stores_encrypted_secret() {
        let m = manager();
        let outcome = m.login("AKIAEXAMPLE0001", "secret", "eu-west-2").await.unwrap();
        let session = m.get_session(&outcome.session.id).await.unwrap();
        assert_eq!(session.region, "eu-west-2");
        assert_eq!(session.active_operations, 0);

        let creds = m.credentials(&session).unwrap();
        assert_eq!(creds.secret_key.as_str(), "secret");
        assert_eq!(creds.access_key, "AKIAEXAMPLE0001");

        let authed = m.authenticate(&outcome.tokens.token).await.unwrap();
        assert_eq!(authed.id, session.id);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials_and_regions() {
        let m = manager();
        let err = m.login("AKIAEXAMPLE0001", "wrong", "us-east-1").await.unwrap_err();
        match err {
            SessionError::Storage(e) => assert_eq!(e.kind, StorageErrorKind::BadSignature),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            m.login("AKIAEXAMPLE0001", "secret", "mars-1").await,
            Err(SessionError::InvalidRegion(_))
        ));
        assert!(matches!(
            m.login("", "secret", "us-east-1").await,
            Err(SessionError::MissingField(_))
        ));
        assert_eq!(m.session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_logout_then_token_replay_is_expired() {
        let m = manager();
        let outcome = m.login("AKIAEXAMPLE0001", "secret", "us-east-1").await.unwrap();
        assert!(m.destroy(&outcome.session.id).await.unwrap().is_some());
        assert!(matches!(
            m.authenticate(&outcome.tokens.token).await,
            Err(SessionError::Expired)
        ));
        assert!(matches!(
            m.refresh(&outcome.tokens.refresh_token).await,
            Err(SessionError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_cannot_authenticate_but_can_refresh() {
        let m = manager();
        let outcome = m.login("AKIAEXAMPLE0001", "secret", "us-east-1").await.unwrap();
        assert!(matches!(
            m.authenticate(&outcome.tokens.refresh_token).await,
            Err(SessionError::Token(TokenError::WrongKind))
        ));
        let pair = m.refresh(&outcome.tokens.refresh_token).await.unwrap();
        assert!(m.authenticate(&pair.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_active_counter_floor() {
        let m = manager();
        let outcome = m.login("AKIAEXAMPLE0001", "secret", "us-east-1").await.unwrap();
        let id = &outcome.session.id;
        assert!(!m.decrement_active(id).await.unwrap().decreased());
        assert_eq!(m.increment_active(id).await.unwrap().current, 1);
        assert!(m.decrement_active(id).await.unwrap().decreased());
        assert!(matches!(m.increment_active("gone").await, Err(SessionError::Expired)));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_idle_sessions() {
        let store = Arc::new(InMemorySessionStore::new());
        let m = manager_with(store.clone(), Duration::from_secs(60));
        let idle = m.login("AKIAEXAMPLE0001", "secret", "us-east-1").await.unwrap();
        let busy = m.login("AKIAEXAMPLE0001", "secret", "us-east-1").await.unwrap();
        m.increment_active(&busy.session.id).await.unwrap();

        let past = Utc::now() - chrono::Duration::minutes(5);
        store.touch(&idle.session.id, past).await.unwrap();
        store.touch(&busy.session.id, past).await.unwrap();

        assert_eq!(m.sweep_idle().await.unwrap(), 1);
        assert!(m.get_session(&idle.session.id).await.is_err());
        assert!(m.get_session(&busy.session.id).await.is_ok());
    }
}
