// ============================
// authgate/src/auth/mod.rs
// ============================
//! Password authentication and the modules built around it.

mod expire;
mod lock;
mod module;
pub mod password;
pub mod token_generator;

pub use expire::{ExpireModule, EXPIRE_MODULE};
pub use lock::{LockModule, Lockout, LOCK_MODULE};
pub use module::{AuthModule, AUTH_MODULE};
pub use password::{hash_password, verify_password};
