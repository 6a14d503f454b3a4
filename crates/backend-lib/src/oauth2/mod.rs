// ============================
// authgate/src/oauth2/mod.rs
// ============================
//! OAuth2 profile exchange.
//!
//! Every provider turns an access token into the same two attributes,
//! [`STORE_OAUTH2_UID`] and [`STORE_EMAIL`], so hosts can treat providers
//! alike. Linking the result to a stored user is done by
//! [`Authgate::oauth2_login`], not by the providers.
//!
//! OAuth2 users live under their own primary identifier built from the
//! provider name and the provider's user id (see [`oauth2_pid`]). A
//! password account that happens to share the email is never touched.

mod github;
mod google;

pub use github::GitHub;
pub use google::Google;
pub use ::oauth2::AccessToken;

use crate::config::Settings;
use crate::error::{AuthError, StorageError};
use crate::metrics;
use crate::scope::{RequestScope, SESSION_KEY};
use crate::user::User;
use crate::Authgate;
use ::metrics::counter;
use async_trait::async_trait;
use authgate_common::{
    Attributes, Event, Interrupt, STORE_CONFIRMED, STORE_EMAIL, STORE_OAUTH2_PROVIDER,
    STORE_OAUTH2_UID, STORE_PRIMARY_ID,
};
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tracing::{info, warn};

/// Client registration for one provider
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    /// Overrides the provider's profile endpoint
    pub profile_url: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("profile_url", &self.profile_url)
            .finish()
    }
}

/// Maps a provider's profile response onto canonical attributes
#[async_trait]
pub trait OAuth2Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch the profile for `token`. Transport and decode failures are
    /// returned as they are.
    async fn exchange(
        &self,
        config: &ProviderConfig,
        token: &AccessToken,
    ) -> Result<Attributes, AuthError>;
}

/// Configured providers by name
#[derive(Clone, Default)]
pub struct OAuth2Providers {
    providers: BTreeMap<String, (Arc<dyn OAuth2Provider>, ProviderConfig)>,
}

impl OAuth2Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of the built-in providers named in `settings.oauth2`
    pub fn from_settings(settings: &Settings) -> Self {
        let client = reqwest::Client::new();
        let mut providers = Self::new();
        for (name, config) in &settings.oauth2 {
            let provider: Arc<dyn OAuth2Provider> = match name.as_str() {
                "google" => Arc::new(Google::new(client.clone())),
                "github" => Arc::new(GitHub::new(client.clone())),
                other => {
                    warn!(provider = other, "ignoring unsupported oauth2 provider");
                    continue;
                },
            };
            providers.insert(provider, config.clone());
        }
        providers
    }

    /// Add or replace a provider under its own name
    pub fn insert(&mut self, provider: Arc<dyn OAuth2Provider>, config: ProviderConfig) {
        self.providers
            .insert(provider.name().to_string(), (provider, config));
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Exchange `token` with the provider registered as `name`
    pub async fn exchange(&self, name: &str, token: &AccessToken) -> Result<Attributes, AuthError> {
        let (provider, config) = self
            .providers
            .get(name)
            .ok_or_else(|| AuthError::UnknownProvider(name.to_string()))?;
        let attrs = provider.exchange(config, token).await?;
        counter!(metrics::OAUTH2_EXCHANGED, "provider" => provider.name()).increment(1);
        Ok(attrs)
    }
}

/// Primary identifier of the user `uid` at `provider`
pub fn oauth2_pid(provider: &str, uid: &str) -> String {
    format!("oauth2;;{provider};;{uid}")
}

impl Authgate {
    /// Sign in with a provider access token, creating the user on first use.
    ///
    /// Fires `OAuth` before hooks first. A failed exchange fires `OAuthFail`
    /// and returns the exchange error. Users are keyed by provider and
    /// provider uid, and created already confirmed since the provider
    /// vouches for the address.
    pub async fn oauth2_login(
        &self,
        scope: &RequestScope,
        provider: &str,
        token: &AccessToken,
    ) -> Result<(Arc<dyn User>, RequestScope), AuthError> {
        match self.callbacks().fire_before(Event::OAuth, scope).await? {
            Interrupt::None => {},
            interrupt => return Err(AuthError::Interrupted(interrupt)),
        }

        let mut attrs = match scope.bounded(self.oauth2().exchange(provider, token)).await? {
            Ok(attrs) => attrs,
            Err(err) => {
                warn!(provider, error = %err, "oauth2 exchange failed");
                self.callbacks().fire_after(Event::OAuthFail, scope).await?;
                return Err(err);
            },
        };
        if !attrs.get(STORE_EMAIL).is_some_and(|email| !email.is_empty()) {
            return Err(AuthError::MissingEmail(provider.to_string()));
        }
        let pid = match attrs.get(STORE_OAUTH2_UID) {
            Some(uid) if !uid.is_empty() => oauth2_pid(provider, uid),
            _ => return Err(AuthError::MissingUid(provider.to_string())),
        };
        attrs.insert(STORE_PRIMARY_ID.to_string(), pid.clone());
        attrs.insert(STORE_OAUTH2_PROVIDER.to_string(), provider.to_string());
        attrs.insert(STORE_CONFIRMED.to_string(), "true".to_string());

        let user = match scope.bounded(self.storer().load(&pid)).await? {
            Ok(_) => {
                scope.bounded(self.storer().save(&pid, &attrs)).await??;
                scope.bounded(self.storer().load(&pid)).await??
            },
            Err(StorageError::NotFound(_)) => scope.bounded(self.storer().create(&attrs)).await??,
            Err(err) => return Err(err.into()),
        };

        let scope = scope.with_user(Arc::clone(&user));
        scope.session().put(SESSION_KEY, user.pid());
        self.callbacks().fire_after(Event::OAuth, &scope).await?;

        info!(pid = user.pid(), provider, uid = ?attrs.get(STORE_OAUTH2_UID), "oauth2 login");
        Ok((user, scope))
    }
}
