use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::store::{SessionStore, UserSnapshot};
use crate::token::{self, TokenPair};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The refresh endpoint rejected the call (any 4xx). The sole trigger
    /// for forced logout.
    #[error("refresh_rejected:{status}")]
    Rejected { status: u16 },
    #[error("transport_unavailable:{message}")]
    Network { message: String },
}

/// Wire seam for the auth endpoints the coordinator depends on.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TransportError>;
    async fn fetch_user(&self, access_token: &str) -> Result<UserSnapshot, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// No refresh token to rotate with.
    #[error("refresh_session_gone")]
    SessionGone,
    /// The refresh itself failed. Terminal: the session has been cleared
    /// and no automatic retry will follow.
    #[error("refresh_fatal:{reason}")]
    Fatal { reason: String },
}

/// A caller parked while a refresh flight is already in progress. Queued
/// FIFO; resolved in queue order when the flight lands, rejected (and
/// thereby discarded) if it fails.
pub struct PendingRequest {
    pub id: Uuid,
    resolve: oneshot::Sender<Result<String, RefreshError>>,
}

struct Flight {
    queue: VecDeque<PendingRequest>,
}

struct Inner {
    session: SessionStore,
    transport: Arc<dyn AuthTransport>,
    inflight: Mutex<Option<Flight>>,
}

/// Single-flight token refresh. One instance system-wide; every proactive
/// or reactive refresh trigger funnels through [`Self::ensure_fresh`].
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(session: SessionStore, transport: Arc<dyn AuthTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                transport,
                inflight: Mutex::new(None),
            }),
        }
    }

    /// Returns a fresh access token, rotating at most once regardless of
    /// how many callers arrive concurrently. The first caller starts the
    /// flight; every caller (the starter included) is parked on it and
    /// shares its outcome. The refresh itself runs in its own task, so a
    /// caller dropped mid-flight (its owning view unmounted, a timeout
    /// elapsed) never strands the slot: the rotation completes, waiters
    /// resolve, and the dropped caller's result is simply discarded.
    pub async fn ensure_fresh(&self) -> Result<String, RefreshError> {
        let (started, rx) = {
            let mut slot = lock(&self.inner.inflight);
            let started = slot.is_none();
            let flight = slot.get_or_insert_with(|| Flight {
                queue: VecDeque::new(),
            });
            let (tx, rx) = oneshot::channel();
            let pending = PendingRequest {
                id: Uuid::new_v4(),
                resolve: tx,
            };
            if !started {
                tracing::debug!(id = %pending.id, "request parked on active refresh flight");
            }
            flight.queue.push_back(pending);
            (started, rx)
        };

        if started {
            let coordinator = self.clone();
            tokio::spawn(async move {
                let outcome = coordinator.run_refresh().await;
                let flight = lock(&coordinator.inner.inflight).take();
                if let Some(flight) = flight {
                    for pending in flight.queue {
                        let _ = pending.resolve.send(outcome.clone());
                    }
                }
            });
        }

        rx.await.unwrap_or_else(|_| {
            Err(RefreshError::Fatal {
                reason: "refresh flight dropped".to_string(),
            })
        })
    }

    /// Proactive variant: a no-op while the current access token is still
    /// comfortably valid, otherwise the same single-flight gate as a
    /// reactive 401. A proactive flight already in progress is therefore
    /// reused by any reactive trigger and vice versa.
    pub async fn ensure_fresh_if_expiring(
        &self,
        leeway: chrono::Duration,
    ) -> Result<String, RefreshError> {
        if let Some(access) = self.inner.session.access_token() {
            if !token::expires_within(&access, leeway) {
                return Ok(access);
            }
        }
        self.ensure_fresh().await
    }

    async fn run_refresh(&self) -> Result<String, RefreshError> {
        let Some(refresh_token) = self.inner.session.refresh_token() else {
            self.inner.session.clear();
            return Err(RefreshError::SessionGone);
        };

        tracing::debug!("token refresh started");
        match self.inner.transport.refresh(&refresh_token).await {
            Ok(pair) => {
                self.inner.session.set_tokens(&pair.access, &pair.refresh);
                // One user snapshot fetch per rotation. A failure here
                // degrades the session to Expired but the rotation itself
                // still succeeds.
                match self.inner.transport.fetch_user(&pair.access).await {
                    Ok(user) => self.inner.session.set_user(user),
                    Err(error) => {
                        tracing::warn!(%error, "user snapshot fetch failed after rotation");
                    }
                }
                tracing::debug!("token refresh succeeded");
                Ok(pair.access)
            }
            Err(error) => {
                tracing::warn!(%error, "token refresh failed, clearing session");
                self.inner.session.clear();
                Err(RefreshError::Fatal {
                    reason: error.to_string(),
                })
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
