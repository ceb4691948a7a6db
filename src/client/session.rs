//! Authenticated session cache
//!
//! One slot per (host, port, user). Each slot has its own async mutex, so
//! concurrent callers for the same key wait on a single login while callers
//! for other keys proceed untouched. There is no lock over the whole cache
//! beyond the brief map lookup that hands out the slot.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::Result;

/// Identifies one authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl SessionKey {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

type Slot<S> = Arc<AsyncMutex<Option<S>>>;

/// Process-wide cache of logged-in sessions.
///
/// Constructed once and shared by reference (usually inside an `Arc`) with
/// every adapter that needs to log in.
pub struct SessionCache<S> {
    slots: Mutex<HashMap<SessionKey, Slot<S>>>,
}

impl<S: Clone> SessionCache<S> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &SessionKey) -> Slot<S> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().clone()
    }

    /// Return the cached session for `key`, logging in with `factory` on a miss.
    ///
    /// Returns `None` when the login fails; nothing is cached in that case and
    /// the next caller will try again.
    pub async fn get_or_create<F, Fut>(&self, key: &SessionKey, factory: F) -> Option<S>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        if let Some(session) = guard.as_ref() {
            debug!(session = %key, "Reusing cached session");
            return Some(session.clone());
        }

        match factory().await {
            Ok(session) => {
                info!(session = %key, "Logged in");
                *guard = Some(session.clone());
                Some(session)
            }
            Err(e) => {
                warn!(session = %key, error = %e, "Login failed, client unavailable");
                None
            }
        }
    }

    /// Drop the cached session so the next call logs in again
    pub async fn invalidate(&self, key: &SessionKey) {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if guard.take().is_some() {
            info!(session = %key, "Session invalidated");
        }
    }
}

impl<S: Clone> Default for SessionCache<S> {
    fn default() -> Self {
        Self::new()
    }
}
