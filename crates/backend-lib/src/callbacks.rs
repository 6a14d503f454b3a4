// ============================
// authgate/src/callbacks.rs
// ============================
//! Before/after hook pipeline.
//!
//! Hooks are registered per [`Event`] during boot and fired in registration
//! order. A before hook can stop the protected action either by failing or
//! by returning an [`Interrupt`]; an after hook can only fail, and a failure
//! never undoes the action it follows.
//!
//! A hook returns `Result<Interrupt, BoxError>`, so one invocation yields
//! exactly one of continue (`Ok(Interrupt::None)`), interrupt, or error.
//! An error therefore always wins over an interrupt.

use crate::error::{AuthError, BoxError};
use crate::metrics;
use crate::scope::RequestScope;
use ::metrics::counter;
use async_trait::async_trait;
use authgate_common::{Event, Interrupt};
use std::{collections::HashMap, future::Future, sync::Arc};
use tracing::{debug, warn};

/// Hook fired before an event's action
#[async_trait]
pub trait BeforeHook: Send + Sync {
    /// Name used in logs and error reports
    fn name(&self) -> &str;

    async fn call(&self, scope: &RequestScope) -> Result<Interrupt, BoxError>;
}

/// Hook fired after an event's action
#[async_trait]
pub trait AfterHook: Send + Sync {
    /// Name used in logs and error reports
    fn name(&self) -> &str;

    async fn call(&self, scope: &RequestScope) -> Result<(), BoxError>;
}

/// Closure-backed [`BeforeHook`], see [`before_fn`]
pub struct BeforeFn<F> {
    name: String,
    f: F,
}

/// Closure-backed [`AfterHook`], see [`after_fn`]
pub struct AfterFn<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a named before hook
pub fn before_fn<F, Fut>(name: impl Into<String>, f: F) -> BeforeFn<F>
where
    F: Fn(RequestScope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Interrupt, BoxError>> + Send,
{
    BeforeFn {
        name: name.into(),
        f,
    }
}

/// Wrap an async closure as a named after hook
pub fn after_fn<F, Fut>(name: impl Into<String>, f: F) -> AfterFn<F>
where
    F: Fn(RequestScope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    AfterFn {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> BeforeHook for BeforeFn<F>
where
    F: Fn(RequestScope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Interrupt, BoxError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, scope: &RequestScope) -> Result<Interrupt, BoxError> {
        (self.f)(scope.clone()).await
    }
}

#[async_trait]
impl<F, Fut> AfterHook for AfterFn<F>
where
    F: Fn(RequestScope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, scope: &RequestScope) -> Result<(), BoxError> {
        (self.f)(scope.clone()).await
    }
}

/// Per-event ordered hook lists.
///
/// Registration needs `&mut self`, so once the owning `Authgate` is shared
/// the tables are read-only and firing needs no locking.
#[derive(Clone, Default)]
pub struct Callbacks {
    before: HashMap<Event, Vec<Arc<dyn BeforeHook>>>,
    after: HashMap<Event, Vec<Arc<dyn AfterHook>>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a before hook for `event`
    pub fn before(&mut self, event: Event, hook: impl BeforeHook + 'static) -> &mut Self {
        self.before.entry(event).or_default().push(Arc::new(hook));
        self
    }

    /// Append an after hook for `event`
    pub fn after(&mut self, event: Event, hook: impl AfterHook + 'static) -> &mut Self {
        self.after.entry(event).or_default().push(Arc::new(hook));
        self
    }

    /// Before hook names for `event`, in firing order
    pub fn before_names(&self, event: Event) -> Vec<&str> {
        self.before
            .get(&event)
            .map(|hooks| hooks.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    /// After hook names for `event`, in firing order
    pub fn after_names(&self, event: Event) -> Vec<&str> {
        self.after
            .get(&event)
            .map(|hooks| hooks.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    /// Fire before hooks until one fails or interrupts.
    pub async fn fire_before(
        &self,
        event: Event,
        scope: &RequestScope,
    ) -> Result<Interrupt, AuthError> {
        let Some(hooks) = self.before.get(&event) else {
            return Ok(Interrupt::None);
        };

        for hook in hooks {
            debug!(%event, hook = hook.name(), "firing before hook");
            match scope.bounded(hook.call(scope)).await? {
                Ok(Interrupt::None) => continue,
                Ok(interrupt) => {
                    warn!(%event, hook = hook.name(), %interrupt, "before hook interrupted");
                    counter!(metrics::HOOK_INTERRUPTED, "event" => event.name()).increment(1);
                    return Ok(interrupt);
                },
                Err(source) => {
                    warn!(%event, hook = hook.name(), error = %source, "before hook failed");
                    counter!(metrics::HOOK_FAILED, "event" => event.name()).increment(1);
                    return Err(AuthError::Hook {
                        event,
                        hook: hook.name().to_string(),
                        source,
                    });
                },
            }
        }

        Ok(Interrupt::None)
    }

    /// Fire after hooks until one fails. Completed hooks are not undone.
    pub async fn fire_after(&self, event: Event, scope: &RequestScope) -> Result<(), AuthError> {
        let Some(hooks) = self.after.get(&event) else {
            return Ok(());
        };

        for hook in hooks {
            debug!(%event, hook = hook.name(), "firing after hook");
            if let Err(source) = scope.bounded(hook.call(scope)).await? {
                warn!(%event, hook = hook.name(), error = %source, "after hook failed");
                counter!(metrics::HOOK_FAILED, "event" => event.name()).increment(1);
                return Err(AuthError::Hook {
                    event,
                    hook: hook.name().to_string(),
                    source,
                });
            }
        }

        Ok(())
    }
}
