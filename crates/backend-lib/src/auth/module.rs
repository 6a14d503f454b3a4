// ============================
// authgate/src/auth/module.rs
// ============================
//! Password login, logout and registration.
use super::password::{
    hash_password_secure, validate_password_strength, verify_password, PasswordRequirements,
};
use crate::confirm::CONFIRM_MODULE;
use crate::error::{AuthError, StorageError};
use crate::metrics;
use crate::module::{Module, RouteTable};
use crate::scope::{RequestScope, SESSION_KEY, SESSION_LAST_ACTION};
use crate::user::User;
use crate::validation::{validate_email, validate_username};
use crate::{Authgate, AuthgateBuilder, SharedAuthgate};
use ::metrics::counter;
use authgate_common::{
    Attributes, Event, Interrupt, STORE_CONFIRMED, STORE_EMAIL, STORE_PASSWORD, STORE_PRIMARY_ID,
    STORE_USERNAME,
};
use axum::{extract::State, http::StatusCode, routing::post, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Registry name of the auth module
pub const AUTH_MODULE: &str = "auth";

/// Password authentication routes
pub struct AuthModule;

impl Module for AuthModule {
    fn initialize(&self, _boot: &mut AuthgateBuilder) -> Result<(), AuthError> {
        Ok(())
    }

    fn routes(&self) -> RouteTable {
        RouteTable::from([
            ("/login", post(login)),
            ("/logout", post(logout)),
            ("/register", post(register)),
        ])
    }

    fn templates(&self) -> Vec<&'static str> {
        vec!["login.html.tpl", "register.html.tpl"]
    }
}

impl Authgate {
    /// Check `password` for the user `pid` and sign them in.
    ///
    /// `Auth` before hooks run first and may deflect the attempt. A wrong
    /// password or unknown user fires `AuthFail` and yields
    /// [`AuthError::InvalidCredentials`]; success stores the pid in the
    /// session, fires `Auth` after hooks and returns the enriched scope.
    pub async fn authenticate(
        &self,
        scope: &RequestScope,
        pid: &str,
        password: &str,
    ) -> Result<RequestScope, AuthError> {
        let user = match scope.bounded(self.storer().load(pid)).await? {
            Ok(user) => Some(user),
            Err(StorageError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };
        let scope = match &user {
            Some(user) => scope.with_user(Arc::clone(user)),
            None => scope.with_pid(pid),
        };

        match self.callbacks().fire_before(Event::Auth, &scope).await? {
            Interrupt::None => {},
            interrupt => return Err(AuthError::Interrupted(interrupt)),
        }

        let verified = user
            .as_ref()
            .and_then(|user| user.password_hash())
            .is_some_and(|hash| verify_password(hash, password));
        if !verified {
            warn!(pid, "failed login");
            counter!(metrics::LOGIN_FAILED).increment(1);
            self.callbacks().fire_after(Event::AuthFail, &scope).await?;
            return Err(AuthError::InvalidCredentials);
        }

        scope.session().put(SESSION_KEY, pid);
        self.callbacks().fire_after(Event::Auth, &scope).await?;

        info!(pid, "user logged in");
        counter!(metrics::LOGIN_SUCCEEDED).increment(1);
        Ok(scope)
    }

    /// Remove the identity from the session
    pub fn logout(&self, scope: &RequestScope) -> RequestScope {
        let session = scope.session();
        if let Some(pid) = session.get(SESSION_KEY) {
            info!(pid = %pid, "user logged out");
        }
        session.del(SESSION_KEY);
        session.del(SESSION_LAST_ACTION);
        scope.without_identity()
    }

    /// Create a user from `attrs`, which must carry `email` and a plaintext
    /// `password`.
    ///
    /// Unless `attrs` names a `pid` already, the attribute chosen by
    /// `settings.primary_id` becomes the primary identifier.
    ///
    /// The password is hashed before storage. Without the confirm module the
    /// account starts confirmed and signed in; with it, the `Register` after
    /// hooks send the confirmation mail and login waits for it.
    pub async fn register(
        &self,
        scope: &RequestScope,
        mut attrs: Attributes,
    ) -> Result<(Arc<dyn User>, RequestScope), AuthError> {
        match self.callbacks().fire_before(Event::Register, scope).await? {
            Interrupt::None => {},
            interrupt => return Err(AuthError::Interrupted(interrupt)),
        }

        validate_email(attrs.get(STORE_EMAIL).map(String::as_str).unwrap_or_default())?;
        if !attrs.contains_key(STORE_PRIMARY_ID) {
            let key = self.settings().primary_id.as_str();
            let pid = attrs.get(key).cloned().unwrap_or_default();
            if key == STORE_USERNAME {
                validate_username(&pid)?;
            }
            attrs.insert(STORE_PRIMARY_ID.to_string(), pid);
        }
        let mut password = attrs.remove(STORE_PASSWORD).unwrap_or_default();
        validate_password_strength(&password, &PasswordRequirements::default())?;
        attrs.insert(STORE_PASSWORD.to_string(), hash_password_secure(&mut password)?);

        let confirm = self.is_loaded(CONFIRM_MODULE);
        attrs.insert(STORE_CONFIRMED.to_string(), (!confirm).to_string());

        let user = scope.bounded(self.storer().create(&attrs)).await??;
        let scope = scope.with_user(Arc::clone(&user));
        if !confirm {
            scope.session().put(SESSION_KEY, user.pid());
        }
        info!(pid = user.pid(), "user registered");

        self.callbacks().fire_after(Event::Register, &scope).await?;
        Ok((user, scope))
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(alias = "email", alias = "username")]
    pid: String,
    password: String,
}

async fn login(
    State(authgate): State<SharedAuthgate>,
    Extension(scope): Extension<RequestScope>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>, AuthError> {
    let scope = authgate
        .authenticate(&scope, &request.pid, &request.password)
        .await?;
    Ok(Json(json!({ "pid": scope.pid() })))
}

async fn logout(
    State(authgate): State<SharedAuthgate>,
    Extension(scope): Extension<RequestScope>,
) -> StatusCode {
    authgate.logout(&scope);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    #[serde(default)]
    username: Option<String>,
}

async fn register(
    State(authgate): State<SharedAuthgate>,
    Extension(scope): Extension<RequestScope>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), AuthError> {
    let mut attrs = Attributes::from([
        (STORE_EMAIL.to_string(), request.email),
        (STORE_PASSWORD.to_string(), request.password),
    ]);
    if let Some(username) = request.username {
        attrs.insert(STORE_USERNAME.to_string(), username);
    }

    let (user, _) = authgate.register(&scope, attrs).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "pid": user.pid(), "confirmed": user.confirmed() })),
    ))
}
