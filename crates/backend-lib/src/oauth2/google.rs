use super::{AccessToken, OAuth2Provider, ProviderConfig};
use crate::error::AuthError;
use async_trait::async_trait;
use authgate_common::{Attributes, STORE_EMAIL, STORE_OAUTH2_UID};
use serde::Deserialize;

/// Google's profile endpoint
pub const GOOGLE_PROFILE_URL: &str = "https://www.googleapis.com/userinfo/v2/me";

#[derive(Deserialize)]
struct GoogleMeResponse {
    id: String,
    email: String,
    /// Absent when the `email` scope was not granted in full
    #[serde(default)]
    verified_email: Option<bool>,
}

/// Google profile exchange
#[derive(Clone, Default)]
pub struct Google {
    client: reqwest::Client,
}

impl Google {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OAuth2Provider for Google {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn exchange(
        &self,
        config: &ProviderConfig,
        token: &AccessToken,
    ) -> Result<Attributes, AuthError> {
        let url = config.profile_url.as_deref().unwrap_or(GOOGLE_PROFILE_URL);
        let me: GoogleMeResponse = self
            .client
            .get(url)
            .bearer_auth(token.secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if me.verified_email == Some(false) {
            return Err(AuthError::UnverifiedEmail(self.name().to_string()));
        }

        Ok(Attributes::from([
            (STORE_OAUTH2_UID.to_string(), me.id),
            (STORE_EMAIL.to_string(), me.email),
        ]))
    }
}
