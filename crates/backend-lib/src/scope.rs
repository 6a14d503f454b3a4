// ============================
// authgate/src/scope.rs
// ============================
//! Per-request identity scope.
//!
//! A [`RequestScope`] is never mutated once handed out: every enrichment
//! (`with_pid`, `with_user`, `with_deadline`) returns a new value that shares
//! the untouched parts with its parent. Callers adopt the returned scope to
//! observe the new identity, and two in-flight requests can never see each
//! other's identity through a shared scope.

use crate::error::AuthError;
use crate::user::User;
use parking_lot::RwLock;
use std::{collections::HashMap, fmt, future::Future, sync::Arc};
use tokio::time::Instant;

/// Session key under which the primary identifier is stored
pub const SESSION_KEY: &str = "uid";
/// Session key holding the unix timestamp of the last request
pub const SESSION_LAST_ACTION: &str = "last_action";

/// Session (or cookie) storage for one client, provided by the host.
pub trait ClientStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<String>;
    /// Write a value
    fn put(&self, key: &str, value: &str);
    /// Remove a value
    fn del(&self, key: &str);
}

/// Process-local client store, handy for tests and single-node hosts
#[derive(Debug, Default)]
pub struct MemoryClientStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given pairs
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
    /// Whether nothing has been written, or everything was removed again
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl ClientStore for MemoryClientStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    fn del(&self, key: &str) {
        self.values.write().remove(key);
    }
}

/// Immutable-by-replacement context for one request
#[derive(Clone)]
pub struct RequestScope {
    session: Arc<dyn ClientStore>,
    pid: Option<Arc<str>>,
    user: Option<Arc<dyn User>>,
    deadline: Option<Instant>,
}

impl RequestScope {
    /// Create an empty scope bound to the client's session
    pub fn new(session: Arc<dyn ClientStore>) -> Self {
        Self {
            session,
            pid: None,
            user: None,
            deadline: None,
        }
    }

    /// Scope backed by a fresh, empty in-memory session
    pub fn detached() -> Self {
        Self::new(Arc::new(MemoryClientStore::new()))
    }

    pub fn session(&self) -> &dyn ClientStore {
        self.session.as_ref()
    }

    /// Primary identifier attached by a previous enrichment
    pub fn pid(&self) -> Option<&str> {
        self.pid.as_deref()
    }

    /// User record attached by a previous enrichment
    pub fn user(&self) -> Option<&Arc<dyn User>> {
        self.user.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// New scope carrying `pid`
    pub fn with_pid(&self, pid: impl Into<Arc<str>>) -> Self {
        Self {
            pid: Some(pid.into()),
            ..self.clone()
        }
    }

    /// New scope carrying `user` (and its pid)
    pub fn with_user(&self, user: Arc<dyn User>) -> Self {
        Self {
            pid: Some(Arc::from(user.pid())),
            user: Some(user),
            ..self.clone()
        }
    }

    /// New scope with identity removed, e.g. after logout or expiry
    pub fn without_identity(&self) -> Self {
        Self {
            pid: None,
            user: None,
            ..self.clone()
        }
    }

    /// New scope bounded by `deadline`; an earlier existing deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Run `fut` under this scope's deadline.
    pub async fn bounded<F>(&self, fut: F) -> Result<F::Output, AuthError>
    where
        F: Future,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| AuthError::DeadlineExceeded),
            None => Ok(fut.await),
        }
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("pid", &self.pid)
            .field("user", &self.user)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
