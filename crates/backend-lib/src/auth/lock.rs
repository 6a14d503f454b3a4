// ============================
// authgate/src/auth/lock.rs
// ============================
//! Account lockout after repeated failed logins.

use crate::config::MAX_LOCK_SECS;
use crate::error::{AuthError, BoxError};
use crate::metrics;
use crate::module::Module;
use crate::scope::RequestScope;
use crate::{after_fn, before_fn, AfterHook, AuthgateBuilder};
use ::metrics::counter;
use authgate_common::{Event, Interrupt};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tracing::warn;

/// Registry name of the lock module
pub const LOCK_MODULE: &str = "lock";

/// Stale records are swept once per this many recorded failures
const SWEEP_EVERY: usize = 128;
const MAX_LOCK: Duration = Duration::from_secs(MAX_LOCK_SECS);

/// Failure record for one account
#[derive(Debug, Clone)]
struct LockEntry {
    /// Failures inside the current window
    failed_attempts: u32,
    /// Time of the last failed attempt
    last_failure: Instant,
    /// When the lock lifts, if the account is locked
    locked_until: Option<Instant>,
}

/// Failed-login bookkeeping keyed by primary identifier
#[derive(Debug, Clone)]
pub struct Lockout {
    attempts: Arc<DashMap<String, LockEntry>>,
    /// Failures recorded since start, drives the sweep
    recorded: Arc<AtomicUsize>,
    /// Failures inside `window` that lock the account
    max_attempts: u32,
    window: Duration,
    lock_duration: Duration,
}

impl Lockout {
    /// Durations above ten years are clamped
    pub fn new(max_attempts: u32, window: Duration, lock_duration: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            recorded: Arc::new(AtomicUsize::new(0)),
            max_attempts,
            window: window.min(MAX_LOCK),
            lock_duration: lock_duration.min(MAX_LOCK),
        }
    }

    /// Accounts with a failure record
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }

    /// Record a failed login; returns whether the account is now locked
    pub fn record_failure(&self, pid: &str) -> bool {
        self.record_failure_at(pid, Instant::now())
    }

    fn record_failure_at(&self, pid: &str, now: Instant) -> bool {
        let locked = self.apply_failure(pid, now);
        if self.recorded.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.cleanup_at(now);
        }
        locked
    }

    fn apply_failure(&self, pid: &str, now: Instant) -> bool {
        let mut entry = self.attempts.entry(pid.to_string()).or_insert(LockEntry {
            failed_attempts: 0,
            last_failure: now,
            locked_until: None,
        });

        // an expired lock or a stale window starts over
        let lock_expired = entry.locked_until.is_some_and(|until| now >= until);
        if lock_expired || now.duration_since(entry.last_failure) > self.window {
            entry.failed_attempts = 0;
            entry.locked_until = None;
        }

        entry.failed_attempts += 1;
        entry.last_failure = now;

        if entry.locked_until.is_none() && entry.failed_attempts >= self.max_attempts {
            let Some(until) = now.checked_add(self.lock_duration) else {
                warn!(pid, "lock duration out of range, account not locked");
                return false;
            };
            entry.locked_until = Some(until);
            warn!(pid, attempts = entry.failed_attempts, "account locked");
            counter!(metrics::ACCOUNT_LOCKED).increment(1);
        }
        entry.locked_until.is_some()
    }

    /// Forget all failures, e.g. after a successful login
    pub fn record_success(&self, pid: &str) {
        self.attempts.remove(pid);
    }

    /// Whether `pid` is currently locked
    pub fn is_locked(&self, pid: &str) -> bool {
        self.is_locked_at(pid, Instant::now())
    }

    fn is_locked_at(&self, pid: &str, now: Instant) -> bool {
        self.attempts
            .get(pid)
            .and_then(|entry| entry.locked_until)
            .is_some_and(|until| now < until)
    }

    /// Drop expired locks and stale failure records
    fn cleanup_at(&self, now: Instant) {
        self.attempts.retain(|_, entry| match entry.locked_until {
            Some(until) => now < until,
            None => now.duration_since(entry.last_failure) <= self.window,
        });
    }
}

/// Locks accounts after `lock_after` failed logins within `lock_window`
pub struct LockModule;

impl Module for LockModule {
    fn initialize(&self, boot: &mut AuthgateBuilder) -> Result<(), AuthError> {
        let settings = boot.settings();
        let lockout = Lockout::new(
            settings.lock_after,
            settings.lock_window(),
            settings.lock_duration(),
        );

        let check = lockout.clone();
        let fail = lockout.clone();
        boot.callbacks()
            .before(
                Event::Auth,
                before_fn("lock.check", move |scope: RequestScope| {
                    let locked = scope.pid().is_some_and(|pid| check.is_locked(pid));
                    async move {
                        Ok::<_, BoxError>(if locked {
                            Interrupt::AccountLocked
                        } else {
                            Interrupt::None
                        })
                    }
                }),
            )
            .after(
                Event::AuthFail,
                after_fn("lock.record_failure", move |scope: RequestScope| {
                    if let Some(pid) = scope.pid() {
                        fail.record_failure(pid);
                    }
                    async { Ok::<_, BoxError>(()) }
                }),
            )
            .after(Event::Auth, reset_hook("lock.reset", lockout.clone()))
            .after(Event::PasswordReset, reset_hook("lock.reset_on_recover", lockout));
        Ok(())
    }
}

fn reset_hook(name: &'static str, lockout: Lockout) -> impl AfterHook {
    after_fn(name, move |scope: RequestScope| {
        if let Some(pid) = scope.pid() {
            lockout.record_success(pid);
        }
        async { Ok::<_, BoxError>(()) }
    })
}
