// ============================
// authgate/src/auth/expire.rs
// ============================
//! Idle session expiry.
use crate::error::{AuthError, BoxError};
use crate::metrics;
use crate::module::Module;
use crate::scope::{ClientStore, RequestScope, SESSION_KEY, SESSION_LAST_ACTION};
use crate::{after_fn, before_fn, AuthgateBuilder};
use ::metrics::counter;
use authgate_common::{Event, Interrupt};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

/// Registry name of the expire module
pub const EXPIRE_MODULE: &str = "expire";

/// Logs sessions out after `expire_after` without a request
pub struct ExpireModule;

impl Module for ExpireModule {
    fn initialize(&self, boot: &mut AuthgateBuilder) -> Result<(), AuthError> {
        let expire_after = boot.settings().expire_after();

        boot.callbacks()
            .before(
                Event::GetUserSession,
                before_fn("expire.check", move |scope: RequestScope| {
                    let interrupt = check_session(scope.session(), expire_after, Utc::now());
                    async move { Ok::<_, BoxError>(interrupt) }
                }),
            )
            .after(
                Event::Auth,
                after_fn("expire.touch", |scope: RequestScope| {
                    touch(scope.session(), Utc::now());
                    async { Ok::<_, BoxError>(()) }
                }),
            );
        Ok(())
    }
}

fn touch(session: &dyn ClientStore, now: DateTime<Utc>) {
    session.put(SESSION_LAST_ACTION, &now.timestamp().to_string());
}

/// Expire the session if it has been idle too long, otherwise refresh it
fn check_session(session: &dyn ClientStore, expire_after: TimeDelta, now: DateTime<Utc>) -> Interrupt {
    let Some(pid) = session.get(SESSION_KEY).filter(|pid| !pid.is_empty()) else {
        return Interrupt::None;
    };

    let last_action = session
        .get(SESSION_LAST_ACTION)
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    match last_action {
        Some(last) if now - last > expire_after => {
            session.del(SESSION_KEY);
            session.del(SESSION_LAST_ACTION);
            info!(pid = %pid, "session expired");
            counter!(metrics::SESSION_EXPIRED).increment(1);
            Interrupt::SessionExpired
        },
        _ => {
            touch(session, now);
            Interrupt::None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::MemoryClientStore;

    #[test]
    fn test_anonymous_session_untouched() {
        let session = MemoryClientStore::new();
        assert_eq!(
            check_session(&session, TimeDelta::hours(1), Utc::now()),
            Interrupt::None
        );
        assert_eq!(session.get(SESSION_LAST_ACTION), None);
    }

    #[test]
    fn test_active_session_is_refreshed() {
        let now = Utc::now();
        let earlier = (now - TimeDelta::minutes(10)).timestamp().to_string();
        let session =
            MemoryClientStore::with_values([(SESSION_KEY, "george"), (SESSION_LAST_ACTION, earlier.as_str())]);

        assert_eq!(check_session(&session, TimeDelta::hours(1), now), Interrupt::None);
        assert_eq!(
            session.get(SESSION_LAST_ACTION),
            Some(now.timestamp().to_string())
        );
    }

    #[test]
    fn test_idle_session_expires() {
        let now = Utc::now();
        let earlier = (now - TimeDelta::hours(2)).timestamp().to_string();
        let session =
            MemoryClientStore::with_values([(SESSION_KEY, "george"), (SESSION_LAST_ACTION, earlier.as_str())]);

        assert_eq!(
            check_session(&session, TimeDelta::hours(1), now),
            Interrupt::SessionExpired
        );
        assert_eq!(session.get(SESSION_KEY), None);
        assert_eq!(session.get(SESSION_LAST_ACTION), None);
    }
}
