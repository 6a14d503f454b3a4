//! Cookie-keyed in-memory sessions.
use authgate::{ClientStore, MemoryClientStore, RequestScope};
use axum::{
    extract::{Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cookie carrying the session id
pub const SESSION_COOKIE: &str = "authgate_session";

/// Budget for hooks and storage calls made on behalf of one request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sessions unused for this long are dropped
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(60 * 60);

// Idle sessions are swept on every this-many checkouts.
const SWEEP_EVERY: usize = 256;

struct Session {
    store: Arc<MemoryClientStore>,
    last_seen: Instant,
}

/// Session id to session store mapping.
///
/// A session is only kept once something has been written to it, and is
/// dropped again when it is emptied or left idle.
#[derive(Clone)]
pub struct SessionTable {
    sessions: Arc<DashMap<String, Session>>,
    idle: Duration,
    checkouts: Arc<AtomicUsize>,
}

/// The store serving one request. `id` is `None` for a session that does
/// not exist in the table yet.
struct Checkout {
    id: Option<String>,
    store: Arc<MemoryClientStore>,
}

/// Cookie change to send back after a request
#[derive(Debug, PartialEq, Eq)]
enum CookieUpdate {
    Keep,
    Set(String),
    Clear,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDLE)
    }
}

impl SessionTable {
    pub fn new(idle: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            idle,
            checkouts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn checkout(&self, id: Option<&str>) -> Checkout {
        self.checkout_at(id, Instant::now())
    }

    /// Store for `id`, or an unsaved one when the id is absent, unknown or
    /// idle past its limit.
    fn checkout_at(&self, id: Option<&str>, now: Instant) -> Checkout {
        if self.checkouts.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_at(now);
        }

        if let Some(id) = id {
            let live = self.sessions.get_mut(id).and_then(|mut session| {
                if now.duration_since(session.last_seen) > self.idle {
                    return None;
                }
                session.last_seen = now;
                Some(Arc::clone(&session.store))
            });
            if let Some(store) = live {
                return Checkout {
                    id: Some(id.to_string()),
                    store,
                };
            }
            self.sessions
                .remove_if(id, |_, session| now.duration_since(session.last_seen) > self.idle);
            debug!("unknown or idle session cookie, starting a new session");
        }

        Checkout {
            id: None,
            store: Arc::new(MemoryClientStore::new()),
        }
    }

    /// Keep a session that gained data, drop one that lost all of it
    fn settle(&self, checkout: Checkout) -> CookieUpdate {
        match checkout.id {
            Some(id) if checkout.store.is_empty() => {
                self.sessions.remove(&id);
                CookieUpdate::Clear
            },
            Some(_) => CookieUpdate::Keep,
            None if checkout.store.is_empty() => CookieUpdate::Keep,
            None => {
                let id = Uuid::new_v4().to_string();
                self.sessions.insert(
                    id.clone(),
                    Session {
                        store: checkout.store,
                        last_seen: Instant::now(),
                    },
                );
                CookieUpdate::Set(id)
            },
        }
    }

    fn sweep_at(&self, now: Instant) {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.duration_since(session.last_seen) <= self.idle);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, "dropped idle sessions");
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}

fn session_cookie(request: &Request) -> Option<&str> {
    request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

/// Attach a [`RequestScope`] for the caller's session to the request
pub async fn session_scope(
    State(sessions): State<SessionTable>,
    mut request: Request,
    next: Next,
) -> Response {
    let checkout = sessions.checkout(session_cookie(&request));
    let scope = RequestScope::new(Arc::clone(&checkout.store) as Arc<dyn ClientStore>)
        .with_deadline(Instant::now() + REQUEST_TIMEOUT);
    request.extensions_mut().insert(scope);

    let mut response = next.run(request).await;
    let cookie = match sessions.settle(checkout) {
        CookieUpdate::Keep => return response,
        CookieUpdate::Set(id) => format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"),
        CookieUpdate::Clear => format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    };
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        },
        Err(e) => warn!(error = %e, "could not encode session cookie"),
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use authgate::SESSION_KEY;

    fn signed_in(table: &SessionTable) -> String {
        let checkout = table.checkout(None);
        checkout.store.put(SESSION_KEY, "george");
        match table.settle(checkout) {
            CookieUpdate::Set(id) => id,
            other => panic!("expected a new session, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_sessions_are_not_kept() {
        let table = SessionTable::default();
        for _ in 0..1000 {
            let checkout = table.checkout(None);
            assert_eq!(table.settle(checkout), CookieUpdate::Keep);
        }
        assert_eq!(table.len(), 0);

        let checkout = table.checkout(Some("made-up"));
        assert!(checkout.id.is_none());
        assert_eq!(table.settle(checkout), CookieUpdate::Keep);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_checkout_reuses_known_sessions() {
        let table = SessionTable::default();
        let id = signed_in(&table);

        let checkout = table.checkout(Some(&id));
        assert_eq!(checkout.id.as_deref(), Some(id.as_str()));
        assert_eq!(checkout.store.get(SESSION_KEY).as_deref(), Some("george"));
        assert_eq!(table.settle(checkout), CookieUpdate::Keep);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_emptied_session_is_dropped() {
        let table = SessionTable::default();
        let id = signed_in(&table);

        let checkout = table.checkout(Some(&id));
        checkout.store.del(SESSION_KEY);
        assert_eq!(table.settle(checkout), CookieUpdate::Clear);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let table = SessionTable::new(Duration::from_secs(60));
        let stale = signed_in(&table);
        let now = Instant::now();

        // an idle session is not handed out again
        let later = now + Duration::from_secs(61);
        assert!(table.checkout_at(Some(&stale), later).id.is_none());
        assert_eq!(table.len(), 0);

        // and the sweep drops the ones nobody asks for
        let stale = signed_in(&table);
        let fresh = signed_in(&table);
        let later = Instant::now() + Duration::from_secs(30);
        assert!(table.checkout_at(Some(&fresh), later).id.is_some());
        table.sweep_at(later + Duration::from_secs(45));
        assert_eq!(table.len(), 1);
        assert!(table.checkout_at(Some(&stale), later).id.is_none());
    }

    #[test]
    fn test_cookie_parsing() {
        let request = Request::builder()
            .header(COOKIE, "theme=dark; authgate_session=abc-123")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(session_cookie(&request), Some("abc-123"));

        let request = Request::builder()
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(session_cookie(&request), None);
    }
}
