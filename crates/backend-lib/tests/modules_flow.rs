//! End-to-end flows across the bundled modules.
mod common;

use authgate::scope::SESSION_LAST_ACTION;
use authgate::user::Storer;
use authgate::{config::Settings, AuthError, Event, Interrupt, SESSION_KEY};
use authgate_common::{Attributes, STORE_EMAIL, STORE_PASSWORD, STORE_USERNAME};
use chrono::{TimeDelta, Utc};
use common::{
    anonymous, confirm_code, reset_token, setup_test_env, setup_test_env_with, signed_in,
};

const ALL_MODULES: [&str; 5] = ["auth", "confirm", "lock", "expire", "recover"];

fn signup(email: &str, password: &str) -> Attributes {
    Attributes::from([
        (STORE_EMAIL.to_string(), email.to_string()),
        (STORE_PASSWORD.to_string(), password.to_string()),
    ])
}

#[tokio::test]
async fn test_register_confirm_login() {
    let env = setup_test_env(&ALL_MODULES);
    let authgate = &env.authgate;

    let register_scope = anonymous();
    let (user, _) = authgate
        .register(&register_scope, signup("george@example.com", "correct horse"))
        .await
        .unwrap();
    assert!(!user.confirmed());
    // not signed in until confirmed
    assert_eq!(register_scope.session().get(SESSION_KEY), None);

    let err = authgate
        .authenticate(&anonymous(), "george@example.com", "correct horse")
        .await
        .unwrap_err();
    assert_eq!(err.interrupt(), Some(Interrupt::AccountNotConfirmed));

    let code = confirm_code(&env.mailer, "george@example.com");
    let confirm_scope = anonymous();
    let creds = authgate.confirm_account(&confirm_scope, &code).await.unwrap();
    assert_eq!(creds.email, "george@example.com");
    assert_eq!(
        confirm_scope.session().get(SESSION_KEY).as_deref(),
        Some("george@example.com")
    );

    // codes are single use
    assert!(matches!(
        authgate.confirm_account(&anonymous(), &code).await,
        Err(AuthError::InvalidConfirmCode)
    ));

    let scope = authgate
        .authenticate(&anonymous(), "george@example.com", "correct horse")
        .await
        .unwrap();
    let user = authgate.require_current_user(&scope).await.unwrap();
    assert!(user.confirmed());
}

#[tokio::test]
async fn test_lockout_after_failed_logins() {
    let env = setup_test_env(&["auth", "lock"]);
    let authgate = &env.authgate;
    authgate
        .register(&anonymous(), signup("george@example.com", "correct horse"))
        .await
        .unwrap();

    for _ in 0..3 {
        let err = authgate
            .authenticate(&anonymous(), "george@example.com", "battery staple")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    // even the right password is refused now
    let err = authgate
        .authenticate(&anonymous(), "george@example.com", "correct horse")
        .await
        .unwrap_err();
    assert_eq!(err.interrupt(), Some(Interrupt::AccountLocked));
}

#[tokio::test]
async fn test_successful_login_resets_failures() {
    let env = setup_test_env(&["auth", "lock"]);
    let authgate = &env.authgate;
    authgate
        .register(&anonymous(), signup("george@example.com", "correct horse"))
        .await
        .unwrap();

    for _ in 0..2 {
        let _ = authgate
            .authenticate(&anonymous(), "george@example.com", "wrong password")
            .await;
    }
    authgate
        .authenticate(&anonymous(), "george@example.com", "correct horse")
        .await
        .unwrap();
    for _ in 0..2 {
        let _ = authgate
            .authenticate(&anonymous(), "george@example.com", "wrong password")
            .await;
    }
    authgate
        .authenticate(&anonymous(), "george@example.com", "correct horse")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_idle_session_expires() {
    let env = setup_test_env(&["auth", "expire"]);
    let authgate = &env.authgate;
    authgate
        .register(&anonymous(), signup("george@example.com", "correct horse"))
        .await
        .unwrap();

    let scope = signed_in("george@example.com");
    let stale = (Utc::now() - TimeDelta::hours(2)).timestamp().to_string();
    scope.session().put(SESSION_LAST_ACTION, &stale);

    let err = authgate.current_user(&scope).await.unwrap_err();
    assert_eq!(err.interrupt(), Some(Interrupt::SessionExpired));
    assert_eq!(scope.session().get(SESSION_KEY), None);

    // the expired session is now simply anonymous
    assert!(authgate.current_user(&scope).await.unwrap().is_none());
}

#[tokio::test]
async fn test_active_session_stays_alive() {
    let mut settings = Settings::default();
    settings.expire_after_secs = 60;
    let env = setup_test_env_with(settings, &["auth", "expire"]);
    let authgate = &env.authgate;
    authgate
        .register(&anonymous(), signup("george@example.com", "correct horse"))
        .await
        .unwrap();

    let scope = authgate
        .authenticate(&anonymous(), "george@example.com", "correct horse")
        .await
        .unwrap();
    assert!(scope.session().get(SESSION_LAST_ACTION).is_some());

    let user = authgate.require_current_user(&scope).await.unwrap();
    assert_eq!(user.pid(), "george@example.com");
}

#[tokio::test]
async fn test_session_names_missing_user() {
    let env = setup_test_env(&ALL_MODULES);
    let err = env
        .authgate
        .require_current_user(&signed_in("ghost@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound));

    // the optional lookup reports storage's answer as is
    let err = env
        .authgate
        .current_user(&signed_in("ghost@example.com"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_concurrent_requests_keep_their_identity() {
    let env = setup_test_env(&["auth"]);
    for i in 0..8 {
        env.storage
            .create(&signup(&format!("user{i}@example.com"), "hash"))
            .await
            .unwrap();
    }

    let handles = (0..32).map(|i| {
        let authgate = env.authgate.clone();
        tokio::spawn(async move {
            let pid = format!("user{}@example.com", i % 8);
            let scope = signed_in(&pid);
            let (user, loaded) = authgate.require_loaded_user(&scope).await.unwrap();
            assert_eq!(loaded.pid(), Some(pid.as_str()));
            assert!(scope.user().is_none());
            (pid, user.pid().to_string())
        })
    });

    for handle in futures_util::future::join_all(handles).await {
        let (expected, actual) = handle.unwrap();
        assert_eq!(expected, actual);
    }
}

#[tokio::test]
async fn test_modules_attach_hooks_in_boot_order() {
    let env = setup_test_env(&ALL_MODULES);
    let callbacks = env.authgate.callbacks();
    assert_eq!(
        callbacks.before_names(Event::Auth),
        vec!["confirm.require_confirmed", "lock.check"]
    );
    assert_eq!(callbacks.after_names(Event::Auth), vec!["lock.reset", "expire.touch"]);
    assert_eq!(callbacks.before_names(Event::GetUserSession), vec!["expire.check"]);
    assert_eq!(
        callbacks.after_names(Event::PasswordReset),
        vec!["lock.reset_on_recover"]
    );
    assert_eq!(env.authgate.loaded_modules(), ALL_MODULES);
}

#[tokio::test]
async fn test_password_reset_unlocks_account() {
    let env = setup_test_env(&["auth", "lock", "recover"]);
    let authgate = &env.authgate;
    authgate
        .register(&anonymous(), signup("george@example.com", "correct horse"))
        .await
        .unwrap();
    for _ in 0..3 {
        let _ = authgate
            .authenticate(&anonymous(), "george@example.com", "battery staple")
            .await;
    }

    authgate
        .recover_start(&anonymous(), "george@example.com")
        .await
        .unwrap();
    let token = reset_token(&env.mailer, "george@example.com");
    let scope = anonymous();
    authgate
        .recover_end(&scope, &token, "tr0ub4dor and 3")
        .await
        .unwrap();
    assert_eq!(
        scope.session().get(SESSION_KEY).as_deref(),
        Some("george@example.com")
    );

    let err = authgate
        .authenticate(&anonymous(), "george@example.com", "correct horse")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    authgate
        .authenticate(&anonymous(), "george@example.com", "tr0ub4dor and 3")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_username_primary_id_confirms_and_signs_in() {
    let mut settings = Settings::default();
    settings.primary_id = STORE_USERNAME.to_string();
    let env = setup_test_env_with(settings, &ALL_MODULES);
    let authgate = &env.authgate;

    let mut attrs = signup("george@example.com", "correct horse");
    attrs.insert(STORE_USERNAME.to_string(), "george".to_string());
    let (user, _) = authgate.register(&anonymous(), attrs).await.unwrap();
    assert_eq!(user.pid(), "george");

    let code = confirm_code(&env.mailer, "george@example.com");
    let scope = anonymous();
    let creds = authgate.confirm_account(&scope, &code).await.unwrap();
    assert_eq!(creds.pid, "george");
    assert_eq!(scope.session().get(SESSION_KEY).as_deref(), Some("george"));
    assert!(env.storage.load("george").await.unwrap().confirmed());

    authgate
        .authenticate(&anonymous(), "george", "correct horse")
        .await
        .unwrap();
}
