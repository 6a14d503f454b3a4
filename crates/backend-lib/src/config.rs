// ============================
// authgate/src/config.rs
// ============================
//! Configuration management.
use crate::error::AuthError;
use crate::oauth2::ProviderConfig;
use authgate_common::{STORE_EMAIL, STORE_USERNAME};
use chrono::TimeDelta;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides (`AUTHGATE_LOCK_AFTER=5`)
pub const ENV_PREFIX: &str = "AUTHGATE_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const DEFAULT_CONFIRM_KEY: &str = "authgate-development-key";
const PRIMARY_IDS: [&str; 2] = [STORE_EMAIL, STORE_USERNAME];
/// Upper bound for lock windows and durations (ten years)
pub const MAX_LOCK_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory for the flat-file backend
    pub data_dir: PathBuf,
    /// Path the module routes are mounted at
    pub mount_path: String,
    /// Scheme, host and port of the application, no trailing slash
    pub root_url: String,
    /// Log level
    pub log_level: String,
    /// Attribute users are identified by, `email` or `username`
    pub primary_id: String,
    /// Lifetime of confirmation codes in seconds
    pub confirm_token_ttl_secs: u64,
    /// Key material handed to the confirmation store
    pub confirm_key: String,
    /// Lifetime of password reset tokens in seconds
    pub recover_token_ttl_secs: u64,
    /// Idle time after which a session expires, in seconds
    pub expire_after_secs: u64,
    /// Failed logins within the window before an account locks
    pub lock_after: u32,
    /// Window in which failed logins are counted, in seconds
    pub lock_window_secs: u64,
    /// How long a locked account stays locked, in seconds
    pub lock_duration_secs: u64,
    /// Sender address for outgoing mail
    pub email_from: String,
    /// Prefix prepended to every outgoing subject
    pub email_subject_prefix: String,
    /// OAuth2 providers by name (`google`, `github`)
    pub oauth2: BTreeMap<String, ProviderConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: PathBuf::from("data"),
            mount_path: "/auth".to_string(),
            root_url: "http://localhost:3000".to_string(),
            log_level: "info".to_string(),
            primary_id: STORE_EMAIL.to_string(),
            confirm_token_ttl_secs: 60 * 60 * 24, // 24 hours
            confirm_key: DEFAULT_CONFIRM_KEY.to_string(),
            recover_token_ttl_secs: 60 * 60 * 24,
            expire_after_secs: 60 * 60,
            lock_after: 3,
            lock_window_secs: 5 * 60,
            lock_duration_secs: 12 * 60 * 60,
            email_from: "authgate@localhost".to_string(),
            email_subject_prefix: String::new(),
            oauth2: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `authgate.toml`, `authgate.json` and the environment
    pub fn load() -> Result<Self, AuthError> {
        let settings: Settings = Figment::new()
            .merge(Toml::file("authgate.toml"))
            .merge(Json::file("authgate.json"))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Load settings from an explicit TOML file, still honoring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Check the settings for values that would break the runtime
    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.mount_path.starts_with('/') {
            return Err(AuthError::Config(
                "mount_path must start with '/'".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(AuthError::Config(format!(
                "log_level must be one of {LOG_LEVELS:?}"
            )));
        }
        if self.confirm_token_ttl_secs == 0 {
            return Err(AuthError::Config(
                "confirm_token_ttl_secs must be positive".to_string(),
            ));
        }
        if !PRIMARY_IDS.contains(&self.primary_id.as_str()) {
            return Err(AuthError::Config(format!(
                "primary_id must be one of {PRIMARY_IDS:?}"
            )));
        }
        if self.recover_token_ttl_secs == 0 {
            return Err(AuthError::Config(
                "recover_token_ttl_secs must be positive".to_string(),
            ));
        }
        if self.confirm_key.is_empty() {
            return Err(AuthError::Config("confirm_key must be set".to_string()));
        }
        if self.expire_after_secs == 0 {
            return Err(AuthError::Config(
                "expire_after_secs must be positive".to_string(),
            ));
        }
        if self.lock_after == 0 {
            return Err(AuthError::Config("lock_after must be positive".to_string()));
        }
        for (name, secs) in [
            ("lock_window_secs", self.lock_window_secs),
            ("lock_duration_secs", self.lock_duration_secs),
        ] {
            if secs == 0 || secs > MAX_LOCK_SECS {
                return Err(AuthError::Config(format!(
                    "{name} must be between 1 and {MAX_LOCK_SECS}"
                )));
            }
        }
        Ok(())
    }

    /// Whether the confirmation key is still the shipped development value
    pub fn uses_development_key(&self) -> bool {
        self.confirm_key == DEFAULT_CONFIRM_KEY
    }

    pub fn confirm_token_ttl(&self) -> TimeDelta {
        seconds(self.confirm_token_ttl_secs)
    }

    pub fn recover_token_ttl(&self) -> TimeDelta {
        seconds(self.recover_token_ttl_secs)
    }

    pub fn expire_after(&self) -> TimeDelta {
        seconds(self.expire_after_secs)
    }

    pub fn lock_window(&self) -> Duration {
        Duration::from_secs(self.lock_window_secs)
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_secs)
    }

    /// Prefix `subject` with the configured subject prefix
    pub fn email_subject(&self, subject: &str) -> String {
        format!("{}{}", self.email_subject_prefix, subject)
    }
}

// Out-of-range values saturate at a century.
fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or_else(|| TimeDelta::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_settings_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.uses_development_key());
        assert_eq!(settings.confirm_token_ttl(), TimeDelta::hours(24));
        assert_eq!(settings.lock_window(), Duration::from_secs(300));
    }

    #[test]
    fn test_settings_validation() {
        let mut invalid = Settings::default();
        invalid.log_level = "loud".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = Settings::default();
        invalid.confirm_token_ttl_secs = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = Settings::default();
        invalid.mount_path = "auth".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = Settings::default();
        invalid.lock_after = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = Settings::default();
        invalid.confirm_key.clear();
        assert!(invalid.validate().is_err());

        let mut invalid = Settings::default();
        invalid.primary_id = "phone".to_string();
        assert!(invalid.validate().is_err());

        let mut username = Settings::default();
        username.primary_id = "username".to_string();
        assert!(username.validate().is_ok());
    }

    #[test]
    fn test_lock_durations_are_bounded() {
        for secs in [0, MAX_LOCK_SECS + 1, u64::MAX] {
            let mut invalid = Settings::default();
            invalid.lock_window_secs = secs;
            assert!(invalid.validate().is_err(), "lock_window_secs = {secs}");

            let mut invalid = Settings::default();
            invalid.lock_duration_secs = secs;
            assert!(invalid.validate().is_err(), "lock_duration_secs = {secs}");
        }

        let mut longest = Settings::default();
        longest.lock_duration_secs = MAX_LOCK_SECS;
        assert!(longest.validate().is_ok());
    }

    #[test]
    fn test_load_settings() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "authgate.toml",
                r#"
                mount_path = "/login"
                lock_after = 5
                confirm_token_ttl_secs = 3600

                [oauth2.google]
                client_id = "google-client"
                client_secret = "shh"
                "#,
            )?;
            jail.set_env("AUTHGATE_LOG_LEVEL", "debug");

            let settings = Settings::load().expect("settings load");
            assert_eq!(settings.mount_path, "/login");
            assert_eq!(settings.lock_after, 5);
            assert_eq!(settings.log_level, "debug"); // Environment variable takes precedence
            assert_eq!(settings.confirm_token_ttl(), TimeDelta::hours(1));
            assert_eq!(settings.oauth2["google"].client_id, "google-client");
            // untouched fields keep their defaults
            assert_eq!(settings.expire_after_secs, 60 * 60);
            Ok(())
        });
    }
}
