// ============================
// authgate/src/recover.rs
// ============================
//! Password recovery.
//!
//! `POST /recover` mails a single-use reset token to the account's address.
//! `POST /recover/complete` redeems it with a new password and signs the
//! user in. Tokens come from their own [`ConfirmationIssuer`], keyed apart
//! from confirmation codes and bounded by `recover_token_ttl_secs`.
use crate::auth::password::{
    hash_password_secure, validate_password_strength, PasswordRequirements,
};
use crate::confirm::{restore_creds, ConfirmCreds};
use crate::error::{AuthError, StorageError};
use crate::mailer::Email;
use crate::metrics;
use crate::module::{Module, RouteTable};
use crate::scope::{RequestScope, SESSION_KEY};
use crate::user::User;
use crate::{Authgate, AuthgateBuilder, SharedAuthgate};
use ::metrics::counter;
use authgate_common::{Attributes, Event, Interrupt, STORE_PASSWORD};
use axum::{extract::State, http::StatusCode, routing::post, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry name of the recover module
pub const RECOVER_MODULE: &str = "recover";
/// Query parameter carrying the token in reset links
pub const RECOVER_QUERY_PARAM: &str = "token";

const RECOVER_SUBJECT: &str = "Password Reset";

/// Password reset by mailed token. Needs a confirmation store on the
/// builder ([`AuthgateBuilder::with_confirm_store`]).
pub struct RecoverModule;

impl Module for RecoverModule {
    fn initialize(&self, boot: &mut AuthgateBuilder) -> Result<(), AuthError> {
        boot.recovery()
            .ok_or(AuthError::MissingCapability("confirmation store"))?;
        Ok(())
    }

    fn routes(&self) -> RouteTable {
        RouteTable::from([
            ("/recover", post(start)),
            ("/recover/complete", post(complete)),
        ])
    }

    fn templates(&self) -> Vec<&'static str> {
        vec![
            "recover.html.tpl",
            "recover_complete.html.tpl",
            "recover_email.html.tpl",
            "recover_email.txt.tpl",
        ]
    }
}

impl Authgate {
    /// Mail a reset link to the user `pid`.
    ///
    /// Unknown users and users without an address succeed without sending
    /// anything, so the response does not reveal which accounts exist.
    /// `RecoverStart` before hooks see the loaded user and may deflect the
    /// request.
    pub async fn recover_start(&self, scope: &RequestScope, pid: &str) -> Result<(), AuthError> {
        let issuer = self.recovery()?;
        let user = match scope.bounded(self.storer().load(pid)).await? {
            Ok(user) => user,
            Err(StorageError::NotFound(_)) => {
                debug!(pid, "password reset requested for unknown user");
                return Ok(());
            },
            Err(err) => return Err(err.into()),
        };
        let Some(email) = user.email().map(str::to_string) else {
            warn!(pid, "password reset requested for user without email");
            return Ok(());
        };

        let scope = scope.with_user(Arc::clone(&user));
        match self.callbacks().fire_before(Event::RecoverStart, &scope).await? {
            Interrupt::None => {},
            interrupt => return Err(AuthError::Interrupted(interrupt)),
        }

        let user_id = user.id().unwrap_or_default();
        let creds = scope
            .bounded(issuer.issue_for(user.pid(), user_id, &email))
            .await??;
        let link = format!(
            "{}{}/recover/complete?{}={}",
            self.settings().root_url,
            self.settings().mount_path.trim_end_matches('/'),
            RECOVER_QUERY_PARAM,
            creds.code
        );
        let mail = Email {
            to: creds.email,
            from: self.settings().email_from.clone(),
            subject: self.settings().email_subject(RECOVER_SUBJECT),
            text_body: format!("You can choose a new password by visiting {link}"),
        };
        scope
            .bounded(self.mailer().send(mail))
            .await?
            .map_err(AuthError::Mail)?;

        self.callbacks().fire_after(Event::RecoverStart, &scope).await?;
        info!(pid = user.pid(), "password reset mailed");
        counter!(metrics::RECOVER_STARTED).increment(1);
        Ok(())
    }

    /// Redeem `token`, set `password` and sign the user in.
    ///
    /// The password is checked before the token is consumed, and the token
    /// is put back if the user cannot be updated. Fires `PasswordReset`
    /// then `RecoverEnd` after hooks with the user in scope.
    pub async fn recover_end(
        &self,
        scope: &RequestScope,
        token: &str,
        password: &str,
    ) -> Result<RequestScope, AuthError> {
        let issuer = self.recovery()?;
        match self.callbacks().fire_before(Event::RecoverEnd, scope).await? {
            Interrupt::None => {},
            interrupt => return Err(AuthError::Interrupted(interrupt)),
        }
        validate_password_strength(password, &PasswordRequirements::default())?;

        let creds = scope.bounded(issuer.redeem(token)).await??;
        let user = match self.reset_password(scope, &creds, password.to_string()).await {
            Ok(user) => user,
            Err(e) => {
                restore_creds(issuer, creds).await;
                return Err(e);
            },
        };

        let scope = scope.with_user(Arc::clone(&user));
        scope.session().put(SESSION_KEY, user.pid());
        self.callbacks().fire_after(Event::PasswordReset, &scope).await?;
        self.callbacks().fire_after(Event::RecoverEnd, &scope).await?;

        info!(pid = user.pid(), "password reset");
        counter!(metrics::PASSWORD_RESET).increment(1);
        Ok(scope)
    }

    async fn reset_password(
        &self,
        scope: &RequestScope,
        creds: &ConfirmCreds,
        mut password: String,
    ) -> Result<Arc<dyn User>, AuthError> {
        let user = self.credential_owner(scope, creds).await?;
        let attrs = Attributes::from([(
            STORE_PASSWORD.to_string(),
            hash_password_secure(&mut password)?,
        )]);
        scope
            .bounded(self.storer().save(user.pid(), &attrs))
            .await??;
        Ok(scope.bounded(self.storer().load(user.pid())).await??)
    }
}

#[derive(Deserialize)]
struct RecoverStartRequest {
    #[serde(alias = "email", alias = "username")]
    pid: String,
}

async fn start(
    State(authgate): State<SharedAuthgate>,
    Extension(scope): Extension<RequestScope>,
    Json(request): Json<RecoverStartRequest>,
) -> Result<StatusCode, AuthError> {
    authgate.recover_start(&scope, &request.pid).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct RecoverCompleteRequest {
    token: String,
    password: String,
}

async fn complete(
    State(authgate): State<SharedAuthgate>,
    Extension(scope): Extension<RequestScope>,
    Json(request): Json<RecoverCompleteRequest>,
) -> Result<Json<Value>, AuthError> {
    let scope = authgate
        .recover_end(&scope, &request.token, &request.password)
        .await?;
    Ok(Json(json!({ "pid": scope.pid() })))
}
