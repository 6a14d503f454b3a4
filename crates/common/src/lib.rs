// ================
// common/src/lib.rs
// ================
//! Common types shared between the `authgate` core, its modules and host
//! applications: lifecycle events, interrupt signals and the canonical
//! attribute vocabulary used when talking to storage backends.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute key holding the primary identifier (email by default)
pub const STORE_PRIMARY_ID: &str = "pid";
/// Attribute key holding the user's email address
pub const STORE_EMAIL: &str = "email";
/// Attribute key holding the user's name
pub const STORE_USERNAME: &str = "username";
/// Attribute key holding the password hash
pub const STORE_PASSWORD: &str = "password";
/// Attribute key holding the external uid returned by an OAuth2 provider
pub const STORE_OAUTH2_UID: &str = "oauth2_uid";
/// Attribute key holding the OAuth2 provider name
pub const STORE_OAUTH2_PROVIDER: &str = "oauth2_provider";
/// Attribute key holding the confirmation flag
pub const STORE_CONFIRMED: &str = "confirmed";

/// Flat attribute map exchanged with storage backends and OAuth2 providers.
pub type Attributes = BTreeMap<String, String>;

/// Lifecycle events hooks can be attached to
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    Register,
    Auth,
    OAuth,
    AuthFail,
    OAuthFail,
    RecoverStart,
    RecoverEnd,
    GetUser,
    GetUserSession,
    PasswordReset,
}

impl Event {
    /// Every event, in declaration order
    pub const ALL: [Event; 10] = [
        Event::Register,
        Event::Auth,
        Event::OAuth,
        Event::AuthFail,
        Event::OAuthFail,
        Event::RecoverStart,
        Event::RecoverEnd,
        Event::GetUser,
        Event::GetUserSession,
        Event::PasswordReset,
    ];

    /// Variant name without the `Event` prefix
    pub fn name(self) -> &'static str {
        match self {
            Event::Register => "Register",
            Event::Auth => "Auth",
            Event::OAuth => "OAuth",
            Event::AuthFail => "AuthFail",
            Event::OAuthFail => "OAuthFail",
            Event::RecoverStart => "RecoverStart",
            Event::RecoverEnd => "RecoverEnd",
            Event::GetUser => "GetUser",
            Event::GetUserSession => "GetUserSession",
            Event::PasswordReset => "PasswordReset",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event{}", self.name())
    }
}

/// Signal returned by a before hook to stop the protected action.
///
/// An interrupt is not a failure: the action is deflected (e.g. the login is
/// refused because the account is locked) and the host decides how to
/// present that.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interrupt {
    #[default]
    None,
    AccountLocked,
    AccountNotConfirmed,
    SessionExpired,
}

impl Interrupt {
    /// Whether this value halts the pipeline
    pub fn is_interrupt(self) -> bool {
        self != Interrupt::None
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interrupt::None => "InterruptNone",
            Interrupt::AccountLocked => "InterruptAccountLocked",
            Interrupt::AccountNotConfirmed => "InterruptAccountNotConfirmed",
            Interrupt::SessionExpired => "InterruptSessionExpired",
        };
        f.write_str(name)
    }
}
