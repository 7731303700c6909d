use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::token::TokenPair;

/// Fixed persistence keys. These mirror the two browser localStorage keys
/// the web shells use, so a file written by one shell generation stays
/// readable by the next.
pub const ACCESS_TOKEN_KEY: &str = "atrium.access_token";
pub const REFRESH_TOKEN_KEY: &str = "atrium.refresh_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Anonymous,
    Authenticating,
    Authenticated,
    Expired,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserSnapshot>,
    pub status: SessionStatus,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            user: None,
            status: SessionStatus::Anonymous,
        }
    }
}

/// The persisted document: one JSON object holding the two fixed keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTokens {
    #[serde(rename = "atrium.access_token")]
    pub access: String,
    #[serde(rename = "atrium.refresh_token")]
    pub refresh: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenStoreError {
    #[error("token_store_io:{message}")]
    Io { message: String },
    #[error("token_store_encode:{message}")]
    Encode { message: String },
}

/// Persistence seam behind the session store. The store is the only caller;
/// no other component reads or writes tokens directly.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedTokens>, TokenStoreError>;
    fn persist(&self, tokens: &PersistedTokens) -> Result<(), TokenStoreError>;
    fn clear(&self) -> Result<(), TokenStoreError>;
}

/// In-memory backend for tests and shells without durable storage.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<PersistedTokens>>,
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<PersistedTokens>, TokenStoreError> {
        Ok(lock(&self.inner).clone())
    }

    fn persist(&self, tokens: &PersistedTokens) -> Result<(), TokenStoreError> {
        *lock(&self.inner) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        *lock(&self.inner) = None;
        Ok(())
    }
}

/// File-backed backend: one JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<PersistedTokens>, TokenStoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(TokenStoreError::Io {
                    message: error.to_string(),
                });
            }
        };
        match serde_json::from_slice::<PersistedTokens>(&bytes) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(error) => {
                // Unparsable persisted state is treated as absent, not fatal.
                tracing::warn!(%error, "persisted tokens unreadable, treating as absent");
                Ok(None)
            }
        }
    }

    fn persist(&self, tokens: &PersistedTokens) -> Result<(), TokenStoreError> {
        let bytes = serde_json::to_vec_pretty(tokens).map_err(|error| TokenStoreError::Encode {
            message: error.to_string(),
        })?;
        std::fs::write(&self.path, bytes).map_err(|error| TokenStoreError::Io {
            message: error.to_string(),
        })
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(TokenStoreError::Io {
                message: error.to_string(),
            }),
        }
    }
}

struct StoreState {
    session: SessionState,
    // Bumped on every token change; the user snapshot only counts toward
    // Authenticated when it was fetched for the current generation.
    token_generation: u64,
    user_generation: u64,
}

struct Inner {
    backend: Arc<dyn TokenStore>,
    state: Mutex<StoreState>,
    notify: watch::Sender<SessionState>,
}

/// Process-wide session handle. All token reads and writes funnel through
/// this store; the persistence backend is private to it.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    #[must_use]
    pub fn new(backend: Arc<dyn TokenStore>) -> Self {
        let (notify, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                state: Mutex::new(StoreState {
                    session: SessionState::default(),
                    token_generation: 0,
                    user_generation: 0,
                }),
                notify,
            }),
        }
    }

    /// Reads persisted tokens at startup. Absent or malformed tokens yield
    /// `Anonymous`; present tokens yield `Expired` until the first user
    /// snapshot fetch promotes the session.
    pub fn load(&self) -> SessionStatus {
        let loaded = match self.inner.backend.load() {
            Ok(loaded) => loaded,
            Err(error) => {
                tracing::warn!(%error, "token load failed, starting anonymous");
                None
            }
        };
        let snapshot = {
            let mut state = lock(&self.inner.state);
            match loaded {
                Some(tokens) => {
                    state.session.access_token = Some(tokens.access);
                    state.session.refresh_token = Some(tokens.refresh);
                    state.session.status = SessionStatus::Expired;
                    state.token_generation += 1;
                }
                None => {
                    state.session = SessionState::default();
                }
            }
            state.session.clone()
        };
        let status = snapshot.status;
        self.inner.notify.send_replace(snapshot);
        status
    }

    /// Persists and installs a new token pair. Bumps the token generation,
    /// so the user snapshot must be fetched again before the session counts
    /// as `Authenticated`. Subscribers are notified synchronously.
    pub fn set_tokens(&self, access: &str, refresh: &str) {
        let persisted = PersistedTokens {
            access: access.to_string(),
            refresh: refresh.to_string(),
        };
        if let Err(error) = self.inner.backend.persist(&persisted) {
            // In-memory state stays authoritative for this process.
            tracing::warn!(%error, "token persist failed");
        }
        let snapshot = {
            let mut state = lock(&self.inner.state);
            state.session.access_token = Some(persisted.access);
            state.session.refresh_token = Some(persisted.refresh);
            state.token_generation += 1;
            state.session.status = derive_status(&state);
            state.session.clone()
        };
        self.inner.notify.send_replace(snapshot);
    }

    /// Records the user snapshot for the current token generation and
    /// promotes the session to `Authenticated` when tokens are present.
    pub fn set_user(&self, user: UserSnapshot) {
        let snapshot = {
            let mut state = lock(&self.inner.state);
            state.session.user = Some(user);
            state.user_generation = state.token_generation;
            state.session.status = derive_status(&state);
            state.session.clone()
        };
        self.inner.notify.send_replace(snapshot);
    }

    /// Marks a login attempt in flight.
    pub fn mark_authenticating(&self) {
        let snapshot = {
            let mut state = lock(&self.inner.state);
            state.session.status = SessionStatus::Authenticating;
            state.session.clone()
        };
        self.inner.notify.send_replace(snapshot);
    }

    /// Leaves `Authenticating` by recomputing the status from the current
    /// tokens and user snapshot, e.g. after a failed login attempt. An
    /// existing valid session survives untouched.
    pub fn reset_authenticating(&self) {
        let snapshot = {
            let mut state = lock(&self.inner.state);
            state.session.status = derive_status(&state);
            state.session.clone()
        };
        self.inner.notify.send_replace(snapshot);
    }

    /// Removes persisted tokens and resets to `Anonymous`. Idempotent.
    pub fn clear(&self) {
        if let Err(error) = self.inner.backend.clear() {
            tracing::warn!(%error, "token clear failed");
        }
        let snapshot = {
            let mut state = lock(&self.inner.state);
            state.session = SessionState::default();
            state.user_generation = state.token_generation;
            state.session.clone()
        };
        self.inner.notify.send_replace(snapshot);
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        lock(&self.inner.state).session.access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        lock(&self.inner.state).session.refresh_token.clone()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.state).session.status
    }

    #[must_use]
    pub fn tokens(&self) -> Option<TokenPair> {
        let state = lock(&self.inner.state);
        match (&state.session.access_token, &state.session.refresh_token) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access, refresh)),
            _ => None,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        lock(&self.inner.state).session.clone()
    }

    /// Subscribes to session changes. Every mutation publishes the full
    /// state synchronously with the change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.notify.subscribe()
    }
}

fn derive_status(state: &StoreState) -> SessionStatus {
    let tokens_present =
        state.session.access_token.is_some() && state.session.refresh_token.is_some();
    if !tokens_present {
        return SessionStatus::Anonymous;
    }
    if state.session.user.is_some() && state.user_generation == state.token_generation {
        SessionStatus::Authenticated
    } else {
        SessionStatus::Expired
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
