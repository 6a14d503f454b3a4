// crates/backend-lib/src/error.rs

//! Central error types + Axum integration.
use authgate_common::{Event, Interrupt};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Opaque error produced by hooks and host collaborators (mailers, stores).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by storage collaborators, passed through untouched.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Interrupted: {0}")]
    Interrupted(Interrupt),

    #[error("Hook {hook} failed during {event}: {source}")]
    Hook {
        event: Event,
        hook: String,
        #[source]
        source: BoxError,
    },

    #[error("User not found")]
    UserNotFound,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Module {module} failed to initialize: {source}")]
    ModuleInit {
        module: String,
        #[source]
        source: Box<AuthError>,
    },

    #[error("Missing capability: {0}")]
    MissingCapability(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Entropy source failure: {0}")]
    Entropy(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unknown OAuth2 provider: {0}")]
    UnknownProvider(String),

    #[error("OAuth2 provider {0} returned no usable email address")]
    MissingEmail(String),

    #[error("OAuth2 provider {0} reported an unverified email address")]
    UnverifiedEmail(String),

    #[error("OAuth2 provider {0} returned no user id")]
    MissingUid(String),

    #[error("Mail delivery failed: {0}")]
    Mail(#[source] BoxError),

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid confirmation code")]
    InvalidConfirmCode,

    #[error("Confirmation code expired")]
    ExpiredConfirmCode,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

impl AuthError {
    /// The interrupt carried by this error, if it is a deflection rather than a fault
    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            AuthError::Interrupted(interrupt) => Some(*interrupt),
            _ => None,
        }
    }

    /// Whether this error means "identity required but absent"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AuthError::UserNotFound | AuthError::Storage(StorageError::NotFound(_))
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation { .. }
            | AuthError::InvalidConfirmCode
            | AuthError::ExpiredConfirmCode => StatusCode::BAD_REQUEST,
            AuthError::Interrupted(Interrupt::SessionExpired)
            | AuthError::UserNotFound
            | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Interrupted(_) | AuthError::UnverifiedEmail(_) => StatusCode::FORBIDDEN,
            AuthError::Storage(StorageError::NotFound(_)) | AuthError::UnknownProvider(_) => {
                StatusCode::NOT_FOUND
            },
            AuthError::Storage(StorageError::AlreadyExists(_)) => StatusCode::CONFLICT,
            AuthError::Http(_) | AuthError::MissingEmail(_) | AuthError::MissingUid(_) => {
                StatusCode::BAD_GATEWAY
            },
            AuthError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Validation { .. } => "VAL_001",
            AuthError::Interrupted(Interrupt::AccountLocked) => "INT_001",
            AuthError::Interrupted(Interrupt::AccountNotConfirmed) => "INT_002",
            AuthError::Interrupted(Interrupt::SessionExpired) => "INT_003",
            AuthError::Interrupted(Interrupt::None) => "INT_000",
            AuthError::Hook { .. } => "HOOK_001",
            AuthError::UserNotFound => "AUTH_001",
            AuthError::InvalidCredentials => "AUTH_002",
            AuthError::Storage(StorageError::NotFound(_)) => "STORE_001",
            AuthError::Storage(StorageError::AlreadyExists(_)) => "STORE_002",
            AuthError::Storage(_) => "STORE_003",
            AuthError::DuplicateModule(_) => "BOOT_001",
            AuthError::UnknownModule(_) => "BOOT_002",
            AuthError::ModuleInit { .. } => "BOOT_003",
            AuthError::MissingCapability(_) => "BOOT_004",
            AuthError::Config(_) => "CFG_001",
            AuthError::Entropy(_) => "RAND_001",
            AuthError::Http(_) => "OAUTH_001",
            AuthError::UnknownProvider(_) => "OAUTH_002",
            AuthError::MissingEmail(_) => "OAUTH_003",
            AuthError::UnverifiedEmail(_) => "OAUTH_004",
            AuthError::MissingUid(_) => "OAUTH_005",
            AuthError::Mail(_) => "MAIL_001",
            AuthError::DeadlineExceeded => "TIME_001",
            AuthError::InvalidConfirmCode => "CNF_001",
            AuthError::ExpiredConfirmCode => "CNF_002",
            AuthError::PasswordHash(_) => "AUTH_003",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AuthError::Validation { field, .. } => format!("Invalid {field}"),
            AuthError::Interrupted(Interrupt::AccountLocked) => {
                "Your account has been locked, please try again later".to_string()
            },
            AuthError::Interrupted(Interrupt::AccountNotConfirmed) => {
                "Your account has not been confirmed".to_string()
            },
            AuthError::Interrupted(Interrupt::SessionExpired) => {
                "Your session has expired".to_string()
            },
            AuthError::UserNotFound | AuthError::InvalidCredentials => {
                "Authentication failed".to_string()
            },
            AuthError::Storage(StorageError::NotFound(_)) => "Resource not found".to_string(),
            AuthError::InvalidConfirmCode | AuthError::ExpiredConfirmCode => {
                "Invalid or expired confirmation link".to_string()
            },
            AuthError::UnknownProvider(_) => "Unknown login provider".to_string(),
            AuthError::Http(_) | AuthError::MissingEmail(_) | AuthError::MissingUid(_) => {
                "Login provider could not be reached".to_string()
            },
            AuthError::UnverifiedEmail(_) => {
                "The login provider has not verified this email address".to_string()
            },
            AuthError::DeadlineExceeded => "Request timed out".to_string(),
            _ => "An internal server error occurred".to_string(),
        }
    }
}

impl From<figment::Error> for AuthError {
    fn from(err: figment::Error) -> Self {
        AuthError::Config(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %self, "request failed");
        }

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
