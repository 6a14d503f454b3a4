use super::{AccessToken, OAuth2Provider, ProviderConfig};
use crate::error::AuthError;
use async_trait::async_trait;
use authgate_common::{Attributes, STORE_EMAIL, STORE_OAUTH2_UID};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

/// GitHub's profile endpoint; addresses live under `<profile>/emails`
pub const GITHUB_PROFILE_URL: &str = "https://api.github.com/user";

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const USER_AGENT_VALUE: &str = concat!("authgate/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct GitHubUser {
    id: i64,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct GitHubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

/// GitHub profile exchange. Users who keep their address private are
/// resolved through the emails endpoint.
#[derive(Clone, Default)]
pub struct GitHub {
    client: reqwest::Client,
}

impl GitHub {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get<T>(&self, url: &str, token: &AccessToken) -> Result<T, AuthError>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(self
            .client
            .get(url)
            .bearer_auth(token.secret())
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl OAuth2Provider for GitHub {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn exchange(
        &self,
        config: &ProviderConfig,
        token: &AccessToken,
    ) -> Result<Attributes, AuthError> {
        let url = config.profile_url.as_deref().unwrap_or(GITHUB_PROFILE_URL);
        let user: GitHubUser = self.get(url, token).await?;

        let email = match user.email.filter(|email| !email.is_empty()) {
            Some(email) => email,
            None => {
                debug!(uid = user.id, "github profile has no public email");
                let emails: Vec<GitHubEmail> =
                    self.get(&format!("{url}/emails"), token).await?;
                emails
                    .into_iter()
                    .find(|e| e.primary && e.verified)
                    .map(|e| e.email)
                    .ok_or_else(|| AuthError::MissingEmail(self.name().to_string()))?
            },
        };

        Ok(Attributes::from([
            (STORE_OAUTH2_UID.to_string(), user.id.to_string()),
            (STORE_EMAIL.to_string(), email),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ProviderConfig {
        ProviderConfig {
            profile_url: Some(format!("{}/user", server.uri())),
            ..ProviderConfig::default()
        }
    }

    fn token() -> AccessToken {
        AccessToken::new("token".to_string())
    }

    #[tokio::test]
    async fn test_github_public_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header_exists("user-agent"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 42, "email": "g@x.com"})),
            )
            .mount(&server)
            .await;

        let attrs = GitHub::default()
            .exchange(&config_for(&server), &token())
            .await
            .unwrap();
        assert_eq!(attrs[STORE_OAUTH2_UID], "42");
        assert_eq!(attrs[STORE_EMAIL], "g@x.com");
    }

    #[tokio::test]
    async fn test_github_private_email_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "email": null})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"email": "old@x.com", "primary": false, "verified": true},
                {"email": "unverified@x.com", "primary": true, "verified": false},
                {"email": "main@x.com", "primary": true, "verified": true},
            ])))
            .mount(&server)
            .await;

        let attrs = GitHub::default()
            .exchange(&config_for(&server), &token())
            .await
            .unwrap();
        assert_eq!(attrs[STORE_EMAIL], "main@x.com");
    }

    #[tokio::test]
    async fn test_github_without_usable_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = GitHub::default()
            .exchange(&config_for(&server), &token())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingEmail(name) if name == "github"));
    }
}
