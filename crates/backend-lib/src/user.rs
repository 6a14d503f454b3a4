// ============================
// authgate/src/user.rs
// ============================
//! User records and the storage capability that loads them.
use crate::error::StorageError;
use async_trait::async_trait;
use authgate_common::{
    Attributes, STORE_CONFIRMED, STORE_EMAIL, STORE_OAUTH2_PROVIDER, STORE_OAUTH2_UID,
    STORE_PASSWORD, STORE_PRIMARY_ID, STORE_USERNAME,
};
use serde::{Deserialize, Serialize};
use std::{any::Any, fmt, sync::Arc};

/// A loaded user record, polymorphic over the storage backend.
pub trait User: Send + Sync + fmt::Debug {
    /// Primary identifier
    fn pid(&self) -> &str;

    /// Numeric identifier, when the backend assigns one
    fn id(&self) -> Option<i64> {
        None
    }

    fn email(&self) -> Option<&str>;

    /// Stored password hash (PHC string)
    fn password_hash(&self) -> Option<&str>;

    /// Whether the account's email address has been confirmed
    fn confirmed(&self) -> bool {
        true
    }

    /// Downcast hook for hosts that need their concrete type back
    fn as_any(&self) -> &dyn Any;
}

/// Storage capability for user records
#[async_trait]
pub trait Storer: Send + Sync {
    /// Load a user by primary identifier
    async fn load(&self, pid: &str) -> Result<Arc<dyn User>, StorageError>;

    /// Create a user from attributes; the primary identifier is taken from
    /// `pid` or, failing that, `email`.
    async fn create(&self, attrs: &Attributes) -> Result<Arc<dyn User>, StorageError>;

    /// Merge attributes into an existing user
    async fn save(&self, pid: &str, attrs: &Attributes) -> Result<(), StorageError>;
}

/// Serializable user record used by the bundled storage backends
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub pid: String,
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub oauth2_uid: Option<String>,
    #[serde(default)]
    pub oauth2_provider: Option<String>,
}

impl StoredUser {
    /// Unconfirmed user whose primary identifier is its email
    pub fn new(id: i64, email: &str) -> Self {
        Self {
            pid: email.to_string(),
            id,
            email: Some(email.to_string()),
            username: None,
            password: None,
            confirmed: false,
            oauth2_uid: None,
            oauth2_provider: None,
        }
    }

    /// Build a record from attributes, if they name a primary identifier
    pub fn from_attributes(id: i64, attrs: &Attributes) -> Option<Self> {
        let pid = attrs
            .get(STORE_PRIMARY_ID)
            .or_else(|| attrs.get(STORE_EMAIL))?
            .clone();
        let mut user = Self {
            pid,
            id,
            email: None,
            username: None,
            password: None,
            confirmed: false,
            oauth2_uid: None,
            oauth2_provider: None,
        };
        user.apply(attrs);
        Some(user)
    }

    /// Overwrite fields present in `attrs`; the primary identifier is fixed.
    pub fn apply(&mut self, attrs: &Attributes) {
        for (key, value) in attrs {
            match key.as_str() {
                STORE_EMAIL => self.email = Some(value.clone()),
                STORE_USERNAME => self.username = Some(value.clone()),
                STORE_PASSWORD => self.password = Some(value.clone()),
                STORE_CONFIRMED => self.confirmed = value == "true",
                STORE_OAUTH2_UID => self.oauth2_uid = Some(value.clone()),
                STORE_OAUTH2_PROVIDER => self.oauth2_provider = Some(value.clone()),
                _ => {},
            }
        }
    }
}

impl User for StoredUser {
    fn pid(&self) -> &str {
        &self.pid
    }

    fn id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn password_hash(&self) -> Option<&str> {
        self.password.as_deref()
    }

    fn confirmed(&self) -> bool {
        self.confirmed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
