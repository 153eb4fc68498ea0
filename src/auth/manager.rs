use super::{Authenticator, Session};
use crate::errors::{AppError, AppResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Default)]
struct SessionState {
    current: Option<Arc<Session>>,
    last_generation: u64,
    /// Generation whose forced refresh failed, with the error message
    failed_refresh: Option<(u64, String)>,
}

impl SessionState {
    fn install(&mut self, mut session: Session) -> Arc<Session> {
        self.last_generation += 1;
        session.generation = self.last_generation;
        let session = Arc::new(session);
        self.current = Some(session.clone());
        self.failed_refresh = None;
        session
    }
}

/// Owns the cached [`Session`] and serializes every call into the [`Authenticator`].
///
/// All access goes through one async mutex, so at most one login or refresh is in
/// flight. A job that saw an expired session passes that session back to
/// [`SessionManager::refresh`]; if another job already replaced it, the newer session
/// is returned without calling the authenticator again.
pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    state: Mutex<SessionState>,
    refreshes: AtomicU64,
}

impl SessionManager {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            state: Mutex::new(SessionState::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Returns the cached session if it is not known to be expired, otherwise asks the
    /// authenticator for one (which may reuse its own stored credentials).
    pub async fn current(&self) -> AppResult<Arc<Session>> {
        let mut state = self.state.lock().await;
        if let Some(session) = &state.current {
            if !session.is_expired() {
                return Ok(session.clone());
            }
            debug!(
                generation = session.generation,
                "Cached session passed its expiry, re-authenticating"
            );
        }

        let session = self.authenticator.ensure_session(false).await?;
        let session = state.install(session);
        info!(generation = session.generation, "Session established");
        Ok(session)
    }

    /// Replaces `stale` with a freshly authenticated session.
    ///
    /// Concurrent callers holding the same stale session share a single forced
    /// authentication; a failed refresh is reported to all of them without retrying.
    /// The failed session is dropped, so the next [`SessionManager::current`] call
    /// authenticates again instead of handing it out.
    pub async fn refresh(&self, stale: &Session) -> AppResult<Arc<Session>> {
        let mut state = self.state.lock().await;

        if let Some(current) = &state.current {
            if current.generation != stale.generation {
                debug!(
                    stale_generation = stale.generation,
                    generation = current.generation,
                    "Session already refreshed by another job"
                );
                return Ok(current.clone());
            }
        }
        if let Some((generation, message)) = &state.failed_refresh {
            if *generation == stale.generation {
                return Err(AppError::AuthenticationError(message.clone()));
            }
        }

        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!(
            stale_generation = stale.generation,
            "Refreshing expired session"
        );
        match self.authenticator.ensure_session(true).await {
            Ok(session) => {
                let session = state.install(session);
                info!(generation = session.generation, "Session refreshed");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                state.failed_refresh = Some((stale.generation, e.to_string()));
                state.current = None;
                Err(e)
            }
        }
    }

    /// Number of forced refreshes issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }
}
