use thiserror::Error;

/// Failures reported by the backend's auth API. Messages are the backend's own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("Email not confirmed")]
    EmailNotConfirmed,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("User already registered")]
    AlreadyRegistered,
    #[error("Password should be at least {min} characters")]
    WeakPassword { min: usize },
    #[error("backend not configured")]
    NotConfigured,
    #[error("{0}")]
    Rejected(String),
}

/// Failures reported by the backend's table API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend not configured")]
    NotConfigured,
    #[error("{message}")]
    Request { code: String, message: String },
    #[error("no rows returned for {table}")]
    NoRows { table: &'static str },
}

impl BackendError {
    pub fn request(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Request {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Row did not have the shape the view model expects.
    pub fn malformed(table: &str, column: &str) -> Self {
        BackendError::request(
            "malformed_row",
            format!("{table}.{column} missing or has the wrong type"),
        )
    }

    pub fn code(&self) -> &str {
        match self {
            BackendError::NotConfigured => "not_configured",
            BackendError::Request { code, .. } => code,
            BackendError::NoRows { .. } => "no_rows",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn is_not_configured(&self) -> bool {
        matches!(
            self,
            Error::Auth(AuthError::NotConfigured) | Error::Backend(BackendError::NotConfigured)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
