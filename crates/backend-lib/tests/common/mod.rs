//! Shared setup for the integration tests.
#![allow(dead_code)]

use authgate::{
    config::Settings,
    mailer::MemoryMailer,
    register_default_modules,
    storage::FlatFileStorage,
    Authgate, MemoryClientStore, RequestScope, SharedAuthgate, SESSION_KEY,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Everything a test needs to drive a booted instance
pub struct TestEnv {
    pub authgate: SharedAuthgate,
    pub storage: Arc<FlatFileStorage>,
    pub mailer: Arc<MemoryMailer>,
    /// Keep in scope, dropping it removes the data directory
    pub temp_dir: TempDir,
}

/// Boot the given modules over flat-file storage in a temporary directory
pub fn setup_test_env(modules: &[&str]) -> TestEnv {
    setup_test_env_with(Settings::default(), modules)
}

pub fn setup_test_env_with(mut settings: Settings, modules: &[&str]) -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    settings.data_dir = temp_dir.path().to_path_buf();

    let storage = Arc::new(FlatFileStorage::new(temp_dir.path()).unwrap());
    let mailer = Arc::new(MemoryMailer::new());
    let mut builder = Authgate::builder(settings, storage.clone())
        .with_confirm_store(storage.clone())
        .with_mailer(mailer.clone());
    register_default_modules(&mut builder).unwrap();

    TestEnv {
        authgate: Arc::new(builder.build(modules).unwrap()),
        storage,
        mailer,
        temp_dir,
    }
}

/// Fresh request scope over an empty session
pub fn anonymous() -> RequestScope {
    RequestScope::new(Arc::new(MemoryClientStore::new()))
}

/// Request scope whose session already names `pid`
pub fn signed_in(pid: &str) -> RequestScope {
    RequestScope::new(Arc::new(MemoryClientStore::with_values([(SESSION_KEY, pid)])))
}

/// Code from the last confirmation mail sent to `to`
pub fn confirm_code(mailer: &MemoryMailer, to: &str) -> String {
    link_param(mailer, to, "cnf=")
}

/// Token from the last password reset mail sent to `to`
pub fn reset_token(mailer: &MemoryMailer, to: &str) -> String {
    link_param(mailer, to, "token=")
}

fn link_param(mailer: &MemoryMailer, to: &str, param: &str) -> String {
    let mail = mailer
        .sent()
        .into_iter()
        .rev()
        .find(|mail| mail.to == to && mail.text_body.contains(param))
        .expect("mail with link");
    mail.text_body
        .split(param)
        .nth(1)
        .expect("link with code")
        .trim()
        .to_string()
}
