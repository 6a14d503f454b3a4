// ============================
// authgate/src/lib.rs
// ============================
//! Pluggable authentication core.
//!
//! An [`Authgate`] is booted once through an [`AuthgateBuilder`]: modules
//! are registered, the chosen ones are initialized in order and attach their
//! hooks, and the result is an immutable instance shared across requests as
//! a [`SharedAuthgate`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use authgate::{Authgate, config::Settings, storage::MemoryStorage};
//! # fn boot() -> Result<(), authgate::AuthError> {
//! let storage = Arc::new(MemoryStorage::new());
//! let mut builder = Authgate::builder(Settings::default(), storage.clone())
//!     .with_confirm_store(storage);
//! authgate::register_default_modules(&mut builder)?;
//! let authgate = Arc::new(builder.build(["auth", "confirm", "lock", "expire", "recover"])?);
//! # Ok(()) }
//! ```

pub mod auth;
pub mod callbacks;
pub mod config;
pub mod confirm;
pub mod error;
mod identity;
pub mod mailer;
pub mod metrics;
pub mod module;
pub mod oauth2;
pub mod recover;
pub mod scope;
pub mod storage;
pub mod user;
pub mod validation;

pub use authgate_common::{Attributes, Event, Interrupt};
pub use callbacks::{after_fn, before_fn, AfterHook, BeforeHook, Callbacks};
pub use error::{AuthError, BoxError, StorageError};
pub use module::{Module, ModuleRegistry, RouteTable};
pub use scope::{ClientStore, MemoryClientStore, RequestScope, SESSION_KEY};
pub use user::{Storer, User};

use crate::config::Settings;
use crate::confirm::{ConfirmCredsStore, ConfirmationIssuer};
use crate::mailer::{LogMailer, Mailer};
use crate::oauth2::OAuth2Providers;
use ::metrics::counter;
use std::{fmt, sync::Arc};
use tracing::{error, info, warn};

/// Booted instance as shared with request handlers
pub type SharedAuthgate = Arc<Authgate>;

/// Boot-phase owner of configuration, hooks and modules.
pub struct AuthgateBuilder {
    settings: Arc<Settings>,
    callbacks: Callbacks,
    modules: ModuleRegistry,
    storer: Arc<dyn Storer>,
    confirmation: Option<Arc<ConfirmationIssuer>>,
    recovery: Option<Arc<ConfirmationIssuer>>,
    mailer: Arc<dyn Mailer>,
    oauth2: OAuth2Providers,
}

impl AuthgateBuilder {
    /// Start booting with the given settings and user storage
    pub fn new(settings: Settings, storer: Arc<dyn Storer>) -> Self {
        let oauth2 = OAuth2Providers::from_settings(&settings);
        Self {
            settings: Arc::new(settings),
            callbacks: Callbacks::new(),
            modules: ModuleRegistry::new(),
            storer,
            confirmation: None,
            recovery: None,
            mailer: Arc::new(LogMailer),
            oauth2,
        }
    }

    /// Replace the default logging mailer
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Enable confirmation codes and password reset tokens backed by `store`
    pub fn with_confirm_store(mut self, store: Arc<dyn ConfirmCredsStore>) -> Self {
        self.confirmation = Some(Arc::new(ConfirmationIssuer::new(
            Arc::clone(&store),
            self.settings.confirm_key.clone(),
            self.settings.confirm_token_ttl(),
        )));
        self.recovery = Some(Arc::new(ConfirmationIssuer::for_purpose(
            store,
            recover::RECOVER_MODULE,
            &self.settings.confirm_key,
            self.settings.recover_token_ttl(),
        )));
        self
    }

    /// Replace the OAuth2 provider table built from the settings
    pub fn with_oauth2_providers(mut self, providers: OAuth2Providers) -> Self {
        self.oauth2 = providers;
        self
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Hook tables, mutable only while booting
    pub fn callbacks(&mut self) -> &mut Callbacks {
        &mut self.callbacks
    }

    pub fn storer(&self) -> Arc<dyn Storer> {
        Arc::clone(&self.storer)
    }

    pub fn mailer(&self) -> Arc<dyn Mailer> {
        Arc::clone(&self.mailer)
    }

    pub fn confirmation(&self) -> Option<Arc<ConfirmationIssuer>> {
        self.confirmation.clone()
    }

    pub fn recovery(&self) -> Option<Arc<ConfirmationIssuer>> {
        self.recovery.clone()
    }

    /// Register a module under a unique name
    pub fn register_module(
        &mut self,
        name: impl Into<String>,
        module: impl Module + 'static,
    ) -> Result<(), AuthError> {
        self.modules.register(name, Arc::new(module))
    }

    /// Sorted names of every registered module
    pub fn registered_modules(&self) -> Vec<String> {
        self.modules.names()
    }

    /// Initialize the named modules in order and freeze the instance.
    ///
    /// The builder is consumed either way, so a failing initializer leaves
    /// nothing half-activated behind.
    pub fn build<I, S>(mut self, names: I) -> Result<Authgate, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut loaded: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if loaded.iter().any(|l| l == name) {
                return Err(AuthError::DuplicateModule(name.to_string()));
            }
            let module = self
                .modules
                .get(name)
                .ok_or_else(|| AuthError::UnknownModule(name.to_string()))?;

            if let Err(source) = module.initialize(&mut self) {
                error!(module = name, error = %source, "module failed to initialize");
                return Err(AuthError::ModuleInit {
                    module: name.to_string(),
                    source: Box::new(source),
                });
            }

            info!(module = name, "module initialized");
            counter!(metrics::MODULE_INITIALIZED).increment(1);
            loaded.push(name.to_string());
        }

        if self.settings.uses_development_key() {
            warn!("confirm_key is the development default, set one before going live");
        }

        Ok(Authgate {
            settings: self.settings,
            callbacks: self.callbacks,
            modules: self.modules,
            loaded,
            storer: self.storer,
            confirmation: self.confirmation,
            recovery: self.recovery,
            mailer: self.mailer,
            oauth2: self.oauth2,
        })
    }
}

/// Register the bundled modules under their conventional names
pub fn register_default_modules(builder: &mut AuthgateBuilder) -> Result<(), AuthError> {
    builder.register_module(auth::AUTH_MODULE, auth::AuthModule)?;
    builder.register_module(confirm::CONFIRM_MODULE, confirm::ConfirmModule)?;
    builder.register_module(auth::LOCK_MODULE, auth::LockModule)?;
    builder.register_module(auth::EXPIRE_MODULE, auth::ExpireModule)?;
    builder.register_module(recover::RECOVER_MODULE, recover::RecoverModule)?;
    Ok(())
}

/// Booted, immutable auth core
pub struct Authgate {
    settings: Arc<Settings>,
    callbacks: Callbacks,
    modules: ModuleRegistry,
    loaded: Vec<String>,
    storer: Arc<dyn Storer>,
    confirmation: Option<Arc<ConfirmationIssuer>>,
    recovery: Option<Arc<ConfirmationIssuer>>,
    mailer: Arc<dyn Mailer>,
    oauth2: OAuth2Providers,
}

impl Authgate {
    /// Start booting a new instance
    pub fn builder(settings: Settings, storer: Arc<dyn Storer>) -> AuthgateBuilder {
        AuthgateBuilder::new(settings, storer)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub fn storer(&self) -> &Arc<dyn Storer> {
        &self.storer
    }

    pub fn mailer(&self) -> &Arc<dyn Mailer> {
        &self.mailer
    }

    /// Confirmation issuer, if a confirmation store was configured
    pub fn confirmation(&self) -> Result<&ConfirmationIssuer, AuthError> {
        self.confirmation
            .as_deref()
            .ok_or(AuthError::MissingCapability("confirmation store"))
    }

    /// Password reset token issuer, if a confirmation store was configured
    pub fn recovery(&self) -> Result<&ConfirmationIssuer, AuthError> {
        self.recovery
            .as_deref()
            .ok_or(AuthError::MissingCapability("confirmation store"))
    }

    pub fn oauth2(&self) -> &OAuth2Providers {
        &self.oauth2
    }

    /// Sorted names of every registered module
    pub fn registered_modules(&self) -> Vec<String> {
        self.modules.names()
    }

    /// Names of the initialized modules, in initialization order
    pub fn loaded_modules(&self) -> &[String] {
        &self.loaded
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|l| l == name)
    }

    /// Routes of every loaded module, relative to the mount path
    pub fn route_table(&self) -> RouteTable {
        let mut table = RouteTable::new();
        for module in self.loaded.iter().filter_map(|name| self.modules.get(name)) {
            for (path, route) in module.routes() {
                if table.insert(path, route).is_some() {
                    warn!(path, "route registered by more than one module, last one wins");
                }
            }
        }
        table
    }

    /// Templates required by each loaded module
    pub fn templates(&self) -> Vec<(String, Vec<&'static str>)> {
        self.loaded
            .iter()
            .filter_map(|name| self.modules.get(name).map(|m| (name.clone(), m.templates())))
            .collect()
    }
}

impl fmt::Debug for Authgate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authgate")
            .field("loaded", &self.loaded)
            .field("oauth2", &self.oauth2.names())
            .finish_non_exhaustive()
    }
}
