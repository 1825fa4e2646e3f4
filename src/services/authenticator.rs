// ============================================================================
// Authenticator Service
// ============================================================================
//
// Owns two collections of one partition:
//   - userCredentials: username -> bcrypt hash
//   - sessionData:     username -> session id
//
// Operations touching both always lock credentials before sessions.
//
// ============================================================================

use super::contracts::Authenticator;
use crate::core::{Result, StoreError};
use crate::storage::{KeyValueStore, Partition};
use crate::transaction::{LockMode, Transaction};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

pub const CREDENTIALS_COLLECTION: &str = "userCredentials";
pub const SESSIONS_COLLECTION: &str = "sessionData";

/// Per-service authentication settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSettings {
    /// bcrypt cost for stored credentials
    pub password_hash_cost: u32,
    /// Expiry of issued sessions; `None` keeps them until logout
    pub session_ttl: Option<Duration>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            password_hash_cost: bcrypt::DEFAULT_COST,
            session_ttl: None,
        }
    }
}

/// Hashes a password using bcrypt off the async executor
async fn hash_password(password: &str, cost: u32) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|err| StoreError::ExecutionError(format!("password hashing task failed: {}", err)))?
        .map_err(|err| StoreError::ExecutionError(format!("password hashing failed: {}", err)))
}

/// Verifies a password against a bcrypt hash; a malformed hash never matches
async fn verify_password(password: &str, hash: String) -> Result<bool> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|err| StoreError::ExecutionError(format!("password check task failed: {}", err)))
}

/// Username followed by the current time in 100ns ticks.
///
/// Guessable by anyone who knows the username and roughly when they logged in.
fn issue_session_id(username: &str) -> String {
    let ticks = Utc::now().timestamp_nanos_opt().unwrap_or_default() / 100;
    format!("{}{}", username, ticks)
}

/// Authenticator for the users routed to one partition.
pub struct AuthenticatorService {
    partition: Partition,
    credentials: KeyValueStore<String, String>,
    sessions: KeyValueStore<String, String>,
    settings: AuthSettings,
}

impl AuthenticatorService {
    pub async fn new(partition: Partition, settings: AuthSettings) -> Result<Self> {
        let credentials = partition.get_or_add(CREDENTIALS_COLLECTION).await?;
        let sessions = partition.get_or_add(SESSIONS_COLLECTION).await?;
        Ok(Self {
            partition,
            credentials,
            sessions,
            settings,
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Register inside `tx`. The password is hashed before any key is locked.
    pub async fn register_user_in(
        &self,
        tx: &mut Transaction,
        username: &str,
        password: &str,
    ) -> Result<bool> {
        let password_hash = hash_password(password, self.settings.password_hash_cost).await?;
        self.register_hashed_in(tx, username, password_hash).await
    }

    async fn register_hashed_in(
        &self,
        tx: &mut Transaction,
        username: &str,
        password_hash: String,
    ) -> Result<bool> {
        let username = username.to_string();
        if self
            .credentials
            .contains_key(tx, &username, LockMode::Update)
            .await?
        {
            event!(Level::INFO, user = %username, "user already exists");
            return Ok(false);
        }

        // The update closure keeps the stored hash: registration never overwrites.
        self.credentials
            .add_or_update(tx, username.clone(), password_hash, |_, existing| existing)
            .await?;
        event!(Level::INFO, user = %username, "user created");
        Ok(true)
    }

    pub async fn login_user_in(
        &self,
        tx: &mut Transaction,
        username: &str,
        password: &str,
    ) -> Result<Option<String>> {
        let username = username.to_string();
        let stored = self
            .credentials
            .try_get(tx, &username, LockMode::Read)
            .await?;

        let matches = match stored {
            Some(hash) => verify_password(password, hash).await?,
            None => false,
        };
        if !matches {
            event!(Level::INFO, user = %username, "authentication failed");
            return Ok(None);
        }

        let session_id = issue_session_id(&username);
        let issued = session_id.clone();
        match self.settings.session_ttl {
            Some(ttl) => {
                self.sessions
                    .add_or_update_expiring(tx, username.clone(), session_id.clone(), move |_, _| issued, ttl)
                    .await?;
            }
            None => {
                self.sessions
                    .add_or_update(tx, username.clone(), session_id.clone(), move |_, _| issued)
                    .await?;
            }
        }

        event!(Level::INFO, user = %username, session = %session_id, "user authenticated");
        Ok(Some(session_id))
    }

    pub async fn logout_user_in(&self, tx: &mut Transaction, username: &str) -> Result<bool> {
        let username = username.to_string();
        let known = self
            .credentials
            .contains_key(tx, &username, LockMode::Read)
            .await?;
        // Lock the session before deciding so a concurrent login cannot slip in.
        self.sessions
            .contains_key(tx, &username, LockMode::Update)
            .await?;

        if !known {
            event!(Level::INFO, user = %username, "logout of unknown user");
            return Ok(false);
        }

        self.sessions.try_remove(tx, &username).await?;
        event!(Level::INFO, user = %username, "user logged out");
        Ok(true)
    }

    pub async fn is_session_valid_in(
        &self,
        tx: &mut Transaction,
        username: &str,
        session_id: &str,
    ) -> Result<bool> {
        let stored = self
            .sessions
            .try_get(tx, &username.to_string(), LockMode::Read)
            .await?;
        let valid = stored.as_deref() == Some(session_id);
        event!(Level::DEBUG, user = %username, valid, "session checked");
        Ok(valid)
    }
}

#[async_trait]
impl Authenticator for AuthenticatorService {
    async fn register_user(&self, username: &str, password: &str) -> Result<bool> {
        let span = info_span!("auth.register", partition = self.partition.id(), user = %username);
        async {
            let password_hash = hash_password(password, self.settings.password_hash_cost).await?;
            let mut tx = self.partition.begin();
            let created = self.register_hashed_in(&mut tx, username, password_hash).await?;
            tx.commit().await?;
            Ok(created)
        }
        .instrument(span)
        .await
    }

    async fn login_user(&self, username: &str, password: &str) -> Result<Option<String>> {
        let span = info_span!("auth.login", partition = self.partition.id(), user = %username);
        async {
            let mut tx = self.partition.begin();
            let session = self.login_user_in(&mut tx, username, password).await?;
            tx.commit().await?;
            Ok(session)
        }
        .instrument(span)
        .await
    }

    async fn logout_user(&self, username: &str) -> Result<bool> {
        let span = info_span!("auth.logout", partition = self.partition.id(), user = %username);
        async {
            let mut tx = self.partition.begin();
            let logged_out = self.logout_user_in(&mut tx, username).await?;
            tx.commit().await?;
            Ok(logged_out)
        }
        .instrument(span)
        .await
    }

    async fn is_session_valid(&self, username: &str, session_id: &str) -> Result<bool> {
        let span = info_span!("auth.session", partition = self.partition.id(), user = %username);
        async {
            let mut tx = self.partition.begin();
            let valid = self.is_session_valid_in(&mut tx, username, session_id).await?;
            tx.commit().await?;
            Ok(valid)
        }
        .instrument(span)
        .await
    }
}
