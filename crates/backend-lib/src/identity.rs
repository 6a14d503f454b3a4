// ============================
// authgate/src/identity.rs
// ============================
//! Resolving the session's identity into a loaded user.
//!
//! "No current identity" is a normal state: the optional lookups return
//! `Ok(None)` for it. The `require_*` variants turn it into
//! [`AuthError::UserNotFound`], which the host maps to a response at its
//! request boundary.

use crate::error::AuthError;
use crate::scope::{RequestScope, SESSION_KEY};
use crate::user::User;
use crate::Authgate;
use authgate_common::{Event, Interrupt};
use std::sync::Arc;
use tracing::debug;

impl Authgate {
    /// Primary identifier stored in the session, if any.
    ///
    /// Fires `GetUserSession` before hooks first; an interrupt from them is
    /// returned as [`AuthError::Interrupted`].
    pub async fn current_user_id(&self, scope: &RequestScope) -> Result<Option<String>, AuthError> {
        match self.callbacks().fire_before(Event::GetUserSession, scope).await? {
            Interrupt::None => {},
            interrupt => return Err(AuthError::Interrupted(interrupt)),
        }

        Ok(scope
            .session()
            .get(SESSION_KEY)
            .filter(|pid| !pid.is_empty()))
    }

    /// Load the current user, if the session names one.
    pub async fn current_user(
        &self,
        scope: &RequestScope,
    ) -> Result<Option<Arc<dyn User>>, AuthError> {
        Ok(self
            .load_current_user(scope)
            .await?
            .map(|(user, _)| user))
    }

    /// Like [`current_user_id`](Self::current_user_id), also returning a
    /// scope that carries the identifier.
    pub async fn load_current_user_id(
        &self,
        scope: &RequestScope,
    ) -> Result<Option<(String, RequestScope)>, AuthError> {
        Ok(self.current_user_id(scope).await?.map(|pid| {
            let scope = scope.with_pid(pid.as_str());
            (pid, scope)
        }))
    }

    /// Like [`current_user`](Self::current_user), also returning a scope that
    /// carries the loaded user. `scope` itself is left as it was.
    pub async fn load_current_user(
        &self,
        scope: &RequestScope,
    ) -> Result<Option<(Arc<dyn User>, RequestScope)>, AuthError> {
        let Some((pid, scope)) = self.load_current_user_id(scope).await? else {
            return Ok(None);
        };

        match self.callbacks().fire_before(Event::GetUser, &scope).await? {
            Interrupt::None => {},
            interrupt => return Err(AuthError::Interrupted(interrupt)),
        }

        let user = scope.bounded(self.storer().load(&pid)).await??;
        debug!(pid = %pid, "loaded current user");

        let scope = scope.with_user(Arc::clone(&user));
        self.callbacks().fire_after(Event::GetUser, &scope).await?;
        Ok(Some((user, scope)))
    }

    /// Current identifier, or [`AuthError::UserNotFound`] when there is none
    pub async fn require_current_user_id(&self, scope: &RequestScope) -> Result<String, AuthError> {
        self.current_user_id(scope)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Current user, or [`AuthError::UserNotFound`] when there is none or
    /// the session names a user storage no longer has
    pub async fn require_current_user(
        &self,
        scope: &RequestScope,
    ) -> Result<Arc<dyn User>, AuthError> {
        self.require_loaded_user(scope).await.map(|(user, _)| user)
    }

    /// Scope-returning form of [`require_current_user_id`](Self::require_current_user_id)
    pub async fn require_loaded_user_id(
        &self,
        scope: &RequestScope,
    ) -> Result<(String, RequestScope), AuthError> {
        self.load_current_user_id(scope)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Scope-returning form of [`require_current_user`](Self::require_current_user)
    pub async fn require_loaded_user(
        &self,
        scope: &RequestScope,
    ) -> Result<(Arc<dyn User>, RequestScope), AuthError> {
        match self.load_current_user(scope).await {
            Ok(Some(loaded)) => Ok(loaded),
            Ok(None) => Err(AuthError::UserNotFound),
            Err(err) if err.is_not_found() => Err(AuthError::UserNotFound),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use crate::error::{BoxError, StorageError};
    use crate::scope::{MemoryClientStore, RequestScope, SESSION_KEY};
    use crate::user::{StoredUser, Storer, User};
    use crate::{after_fn, before_fn, Authgate, AuthError, AuthgateBuilder};
    use async_trait::async_trait;
    use authgate_common::{Attributes, Event, Interrupt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Storer serving a single user, or failing every load
    struct OneUser {
        user: Option<Arc<dyn User>>,
        loads: AtomicUsize,
    }

    impl OneUser {
        fn serving(email: &str) -> Arc<Self> {
            Arc::new(Self {
                user: Some(Arc::new(StoredUser::new(1, email))),
                loads: AtomicUsize::new(0),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                user: None,
                loads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Storer for OneUser {
        async fn load(&self, pid: &str) -> Result<Arc<dyn User>, StorageError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            match &self.user {
                Some(user) if user.pid() == pid => Ok(Arc::clone(user)),
                Some(_) => Err(StorageError::NotFound(pid.to_string())),
                None => Err(StorageError::Backend("disk on fire".to_string())),
            }
        }

        async fn create(&self, _attrs: &Attributes) -> Result<Arc<dyn User>, StorageError> {
            Err(StorageError::Backend("read only".to_string()))
        }

        async fn save(&self, _pid: &str, _attrs: &Attributes) -> Result<(), StorageError> {
            Err(StorageError::Backend("read only".to_string()))
        }
    }

    fn boot(storer: Arc<OneUser>) -> Authgate {
        AuthgateBuilder::new(Settings::default(), storer)
            .build(Vec::<String>::new())
            .unwrap()
    }

    fn scope_for(pid: Option<&str>) -> RequestScope {
        let store = match pid {
            Some(pid) => MemoryClientStore::with_values([(SESSION_KEY, pid)]),
            None => MemoryClientStore::new(),
        };
        RequestScope::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_current_user_id() {
        let authgate = boot(OneUser::serving("george@example.com"));

        let none = authgate.current_user_id(&scope_for(None)).await.unwrap();
        assert_eq!(none, None);

        let empty = authgate.current_user_id(&scope_for(Some(""))).await.unwrap();
        assert_eq!(empty, None);

        let pid = authgate
            .current_user_id(&scope_for(Some("george@example.com")))
            .await
            .unwrap();
        assert_eq!(pid.as_deref(), Some("george@example.com"));
    }

    #[tokio::test]
    async fn test_current_user_without_session_skips_storage() {
        let storer = OneUser::serving("george@example.com");
        let authgate = boot(storer.clone());

        let user = authgate.current_user(&scope_for(None)).await.unwrap();
        assert!(user.is_none());
        assert_eq!(storer.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_current_user_loads_and_leaves_scope_alone() {
        let authgate = boot(OneUser::serving("george@example.com"));
        let scope = scope_for(Some("george@example.com"));

        let (user, loaded) = authgate.load_current_user(&scope).await.unwrap().unwrap();
        assert_eq!(user.email(), Some("george@example.com"));
        assert_eq!(loaded.pid(), Some("george@example.com"));
        assert!(loaded.user().is_some());

        assert_eq!(scope.pid(), None);
        assert!(scope.user().is_none());
    }

    #[tokio::test]
    async fn test_storage_error_passes_through() {
        let authgate = boot(OneUser::broken());
        let err = authgate
            .current_user(&scope_for(Some("george@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Storage(StorageError::Backend(ref m)) if m == "disk on fire"));

        // also through the mandatory wrapper, since it is not a "not found"
        let err = authgate
            .require_current_user(&scope_for(Some("george@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Storage(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn test_require_wrappers() {
        let authgate = boot(OneUser::serving("george@example.com"));

        let err = authgate.require_current_user_id(&scope_for(None)).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));

        let err = authgate.require_current_user(&scope_for(None)).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));

        // session names a user the storer does not know
        let err = authgate
            .require_current_user(&scope_for(Some("ghost@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));

        let (pid, scope) = authgate
            .require_loaded_user_id(&scope_for(Some("george@example.com")))
            .await
            .unwrap();
        assert_eq!(pid, "george@example.com");
        assert_eq!(scope.pid(), Some("george@example.com"));

        let (user, scope) = authgate
            .require_loaded_user(&scope_for(Some("george@example.com")))
            .await
            .unwrap();
        assert_eq!(user.pid(), "george@example.com");
        assert!(scope.user().is_some());
    }

    #[tokio::test]
    async fn test_session_hook_interrupt_propagates() {
        let storer = OneUser::serving("george@example.com");
        let mut builder = AuthgateBuilder::new(Settings::default(), storer.clone());
        builder.callbacks().before(
            Event::GetUserSession,
            before_fn("expired", |_| async {
                Ok::<_, BoxError>(Interrupt::SessionExpired)
            }),
        );
        let authgate = builder.build(Vec::<String>::new()).unwrap();

        let err = authgate
            .current_user(&scope_for(Some("george@example.com")))
            .await
            .unwrap_err();
        assert_eq!(err.interrupt(), Some(Interrupt::SessionExpired));
        assert_eq!(storer.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_after_hook_sees_user_and_can_fail_the_call() {
        let mut builder =
            AuthgateBuilder::new(Settings::default(), OneUser::serving("george@example.com"));
        builder.callbacks().after(
            Event::GetUser,
            after_fn("audit", |scope: RequestScope| async move {
                match scope.user() {
                    Some(user) if user.pid() == "george@example.com" => {
                        Err::<(), BoxError>("audit backend unavailable".into())
                    },
                    _ => Ok(()),
                }
            }),
        );
        let authgate = builder.build(Vec::<String>::new()).unwrap();

        let err = authgate
            .current_user(&scope_for(Some("george@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Hook { event: Event::GetUser, ref hook, .. } if hook == "audit"));
    }
}
