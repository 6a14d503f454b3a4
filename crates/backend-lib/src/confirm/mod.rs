// ============================
// authgate/src/confirm/mod.rs
// ============================
//! Single-use, time-bounded confirmation credentials.
//!
//! Codes are never stored in the clear: stores index records by
//! [`confirm_digest`], a BLAKE3 MAC of the code keyed from the configured
//! key material. Issuers for different purposes (account confirmation,
//! password recovery) derive different keys, so a code minted for one is
//! unknown to the other.

mod module;

pub use module::{ConfirmModule, CONFIRM_MODULE, CONFIRM_QUERY_PARAM};
pub(crate) use module::restore_creds;

use crate::auth::token_generator::generate_secure_token;
use crate::error::{AuthError, StorageError};
use crate::metrics;
use crate::validation::{validate_email, validate_user_id};
use ::metrics::counter;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Length of every confirmation code
pub const CONFIRM_CODE_LENGTH: usize = 32;

const DIGEST_CONTEXT: &str = "authgate 2026-01-01 confirmation code digest";

/// A confirmation code bound to one user
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConfirmCreds {
    pub user_id: i64,
    /// Primary identifier of the owner; records written before it was
    /// tracked fall back to the email
    #[serde(default)]
    pub pid: String,
    pub email: String,
    /// Not persisted; stores key records by its digest instead
    #[serde(skip_serializing, default)]
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ConfirmCreds {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The owner's primary identifier
    pub fn owner_pid(&self) -> &str {
        if self.pid.is_empty() {
            &self.email
        } else {
            &self.pid
        }
    }
}

impl fmt::Debug for ConfirmCreds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmCreds")
            .field("user_id", &self.user_id)
            .field("pid", &self.pid)
            .field("email", &self.email)
            .field("code", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Storage key for `code` under `key_material`, as lowercase hex
pub fn confirm_digest(key_material: &str, code: &str) -> String {
    let key = Zeroizing::new(blake3::derive_key(DIGEST_CONTEXT, key_material.as_bytes()));
    blake3::keyed_hash(&key, code.as_bytes()).to_hex().to_string()
}

/// Persistence capability for confirmation credentials
#[async_trait]
pub trait ConfirmCredsStore: Send + Sync {
    /// Persist `creds`, returning the stored record
    async fn create_confirm_creds(
        &self,
        key_material: &str,
        creds: ConfirmCreds,
    ) -> Result<ConfirmCreds, StorageError>;

    /// Remove and return the record for `code`. At most one caller gets
    /// `Some` for a given code.
    async fn take_confirm_creds(
        &self,
        key_material: &str,
        code: &str,
    ) -> Result<Option<ConfirmCreds>, StorageError>;
}

/// Issues and redeems confirmation credentials
pub struct ConfirmationIssuer {
    store: Arc<dyn ConfirmCredsStore>,
    key_material: Zeroizing<String>,
    ttl: TimeDelta,
    purpose: &'static str,
}

impl ConfirmationIssuer {
    /// Issuer for account confirmation codes
    pub fn new(store: Arc<dyn ConfirmCredsStore>, key_material: String, ttl: TimeDelta) -> Self {
        Self {
            store,
            key_material: Zeroizing::new(key_material),
            ttl,
            purpose: "confirm",
        }
    }

    /// Issuer whose codes are keyed apart from every other purpose
    pub fn for_purpose(
        store: Arc<dyn ConfirmCredsStore>,
        purpose: &'static str,
        key_material: &str,
        ttl: TimeDelta,
    ) -> Self {
        Self {
            store,
            key_material: Zeroizing::new(format!("{purpose}:{key_material}")),
            ttl,
            purpose,
        }
    }

    pub fn purpose(&self) -> &'static str {
        self.purpose
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Validate the input and mint credentials without persisting them
    pub fn generate_confirm_creds(
        &self,
        user_id: i64,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<ConfirmCreds, AuthError> {
        let user_id = validate_user_id(user_id)?;
        let email = validate_email(email)?;
        let code = generate_secure_token()?;
        debug_assert_eq!(code.len(), CONFIRM_CODE_LENGTH);

        Ok(ConfirmCreds {
            user_id,
            pid: email.to_string(),
            email: email.to_string(),
            code,
            created_at: now,
            expires_at: now + self.ttl,
        })
    }

    /// Generate credentials now and persist them. Store failures are
    /// returned as they are.
    pub async fn issue(&self, user_id: i64, email: &str) -> Result<ConfirmCreds, AuthError> {
        self.issue_for(email, user_id, email).await
    }

    /// Like [`issue`](Self::issue) for a user whose primary identifier is
    /// not their email
    pub async fn issue_for(
        &self,
        pid: &str,
        user_id: i64,
        email: &str,
    ) -> Result<ConfirmCreds, AuthError> {
        let mut creds = self.generate_confirm_creds(user_id, email, Utc::now())?;
        creds.pid = pid.to_string();
        let stored = self.persist(creds).await?;

        info!(
            user_id,
            purpose = self.purpose,
            expires_at = %stored.expires_at,
            "issued confirmation code"
        );
        counter!(metrics::CONFIRM_ISSUED, "purpose" => self.purpose).increment(1);
        Ok(stored)
    }

    /// Put redeemed credentials back, for when applying them failed.
    /// The code stays valid until its original expiry.
    pub async fn restore(&self, creds: ConfirmCreds) -> Result<(), AuthError> {
        let user_id = creds.user_id;
        self.persist(creds).await?;
        debug!(user_id, purpose = self.purpose, "confirmation code restored");
        Ok(())
    }

    async fn persist(&self, creds: ConfirmCreds) -> Result<ConfirmCreds, AuthError> {
        let code = creds.code.clone();
        let mut stored = self
            .store
            .create_confirm_creds(&self.key_material, creds)
            .await?;
        stored.code = code;
        Ok(stored)
    }

    /// Consume `code` at the current time
    pub async fn redeem(&self, code: &str) -> Result<ConfirmCreds, AuthError> {
        self.redeem_at(code, Utc::now()).await
    }

    /// Consume `code`, rejecting it if `now` is past its expiry
    pub async fn redeem_at(&self, code: &str, now: DateTime<Utc>) -> Result<ConfirmCreds, AuthError> {
        if code.len() != CONFIRM_CODE_LENGTH {
            return Err(AuthError::InvalidConfirmCode);
        }

        let Some(mut creds) = self.store.take_confirm_creds(&self.key_material, code).await? else {
            debug!("unknown or already used confirmation code");
            return Err(AuthError::InvalidConfirmCode);
        };
        if creds.is_expired_at(now) {
            debug!(user_id = creds.user_id, "expired confirmation code");
            return Err(AuthError::ExpiredConfirmCode);
        }

        creds.code = code.to_string();
        counter!(metrics::CONFIRM_REDEEMED, "purpose" => self.purpose).increment(1);
        Ok(creds)
    }
}
