// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const HOOK_INTERRUPTED: &str = "authgate.hook.interrupted";
pub const HOOK_FAILED: &str = "authgate.hook.failed";
pub const MODULE_INITIALIZED: &str = "authgate.module.initialized";
pub const CONFIRM_ISSUED: &str = "authgate.confirm.issued";
pub const CONFIRM_REDEEMED: &str = "authgate.confirm.redeemed";
pub const LOGIN_SUCCEEDED: &str = "authgate.login.succeeded";
pub const LOGIN_FAILED: &str = "authgate.login.failed";
pub const ACCOUNT_LOCKED: &str = "authgate.account.locked";
pub const SESSION_EXPIRED: &str = "authgate.session.expired";
pub const OAUTH2_EXCHANGED: &str = "authgate.oauth2.exchanged";
pub const RECOVER_STARTED: &str = "authgate.recover.started";
pub const PASSWORD_RESET: &str = "authgate.password.reset";
