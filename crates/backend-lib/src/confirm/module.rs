// ============================
// authgate/src/confirm/module.rs
// ============================
use super::{ConfirmCreds, ConfirmationIssuer};
use crate::config::Settings;
use crate::error::{AuthError, BoxError};
use crate::mailer::{Email, Mailer};
use crate::module::{Module, RouteTable};
use crate::scope::{RequestScope, SESSION_KEY};
use crate::user::User;
use crate::{AfterHook, Authgate, AuthgateBuilder, BeforeHook, SharedAuthgate};
use async_trait::async_trait;
use authgate_common::{Attributes, Event, Interrupt, STORE_CONFIRMED};
use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry name of the confirm module
pub const CONFIRM_MODULE: &str = "confirm";
/// Query parameter carrying the code in confirmation links
pub const CONFIRM_QUERY_PARAM: &str = "cnf";

const CONFIRM_SUBJECT: &str = "Confirm New Account";

/// Email confirmation: mails a code after registration and refuses logins
/// until it has been redeemed.
///
/// Needs a confirmation store on the builder
/// ([`AuthgateBuilder::with_confirm_store`]).
pub struct ConfirmModule;

impl Module for ConfirmModule {
    fn initialize(&self, boot: &mut AuthgateBuilder) -> Result<(), AuthError> {
        let issuer = boot
            .confirmation()
            .ok_or(AuthError::MissingCapability("confirmation store"))?;
        let mailer = boot.mailer();
        let settings = Arc::clone(boot.settings());

        boot.callbacks()
            .after(
                Event::Register,
                SendConfirmEmail {
                    issuer,
                    mailer,
                    settings,
                },
            )
            .before(Event::Auth, RequireConfirmed);
        Ok(())
    }

    fn routes(&self) -> RouteTable {
        RouteTable::from([("/confirm", get(confirm))])
    }

    fn templates(&self) -> Vec<&'static str> {
        vec!["confirm_email.html.tpl", "confirm_email.txt.tpl"]
    }
}

struct SendConfirmEmail {
    issuer: Arc<ConfirmationIssuer>,
    mailer: Arc<dyn Mailer>,
    settings: Arc<Settings>,
}

#[async_trait]
impl AfterHook for SendConfirmEmail {
    fn name(&self) -> &str {
        "confirm.send_email"
    }

    async fn call(&self, scope: &RequestScope) -> Result<(), BoxError> {
        let user = scope
            .user()
            .ok_or("no registered user in scope")?;
        if user.confirmed() {
            return Ok(());
        }
        let user_id = user.id().ok_or("storage assigned no numeric user id")?;
        let email = user.email().ok_or("registered user has no email")?;

        let creds = self.issuer.issue_for(user.pid(), user_id, email).await?;
        let link = format!(
            "{}{}/confirm?{}={}",
            self.settings.root_url,
            self.settings.mount_path.trim_end_matches('/'),
            CONFIRM_QUERY_PARAM,
            creds.code
        );

        self.mailer
            .send(Email {
                to: creds.email,
                from: self.settings.email_from.clone(),
                subject: self.settings.email_subject(CONFIRM_SUBJECT),
                text_body: format!("Please confirm your account by visiting {link}"),
            })
            .await?;
        debug!(user_id, "confirmation email sent");
        Ok(())
    }
}

struct RequireConfirmed;

#[async_trait]
impl BeforeHook for RequireConfirmed {
    fn name(&self) -> &str {
        "confirm.require_confirmed"
    }

    async fn call(&self, scope: &RequestScope) -> Result<Interrupt, BoxError> {
        match scope.user() {
            Some(user) if !user.confirmed() => Ok(Interrupt::AccountNotConfirmed),
            _ => Ok(Interrupt::None),
        }
    }
}

#[derive(Deserialize)]
struct ConfirmQuery {
    cnf: String,
}

impl Authgate {
    /// Redeem `code`, mark its user confirmed and sign them in.
    ///
    /// If the user cannot be updated the code is put back, so the link
    /// keeps working once the store recovers.
    pub async fn confirm_account(
        &self,
        scope: &RequestScope,
        code: &str,
    ) -> Result<ConfirmCreds, AuthError> {
        let issuer = self.confirmation()?;
        let creds = scope.bounded(issuer.redeem(code)).await??;

        match self.mark_confirmed(scope, &creds).await {
            Ok(pid) => {
                scope.session().put(SESSION_KEY, &pid);
                info!(user_id = creds.user_id, "account confirmed");
                Ok(creds)
            },
            Err(e) => {
                restore_creds(issuer, creds).await;
                Err(e)
            },
        }
    }

    async fn mark_confirmed(
        &self,
        scope: &RequestScope,
        creds: &ConfirmCreds,
    ) -> Result<String, AuthError> {
        let user = self.credential_owner(scope, creds).await?;
        let attrs = Attributes::from([(STORE_CONFIRMED.to_string(), "true".to_string())]);
        scope
            .bounded(self.storer().save(user.pid(), &attrs))
            .await??;
        Ok(user.pid().to_string())
    }

    /// The user `creds` were issued to. A record under the same pid with a
    /// different numeric id means the account was replaced since.
    pub(crate) async fn credential_owner(
        &self,
        scope: &RequestScope,
        creds: &ConfirmCreds,
    ) -> Result<Arc<dyn User>, AuthError> {
        let user = scope.bounded(self.storer().load(creds.owner_pid())).await??;
        match user.id() {
            Some(id) if id != creds.user_id => {
                warn!(user_id = creds.user_id, stored_id = id, "code issued to a replaced account");
                Err(AuthError::InvalidConfirmCode)
            },
            _ => Ok(user),
        }
    }
}

/// Put back a redeemed code whose effect could not be applied
pub(crate) async fn restore_creds(issuer: &ConfirmationIssuer, creds: ConfirmCreds) {
    let user_id = creds.user_id;
    if let Err(e) = issuer.restore(creds).await {
        warn!(user_id, error = %e, "could not restore confirmation code");
    }
}

async fn confirm(
    State(authgate): State<SharedAuthgate>,
    Extension(scope): Extension<RequestScope>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<Value>, AuthError> {
    let creds = authgate.confirm_account(&scope, &query.cnf).await?;
    Ok(Json(json!({ "confirmed": true, "pid": creds.pid, "email": creds.email })))
}
