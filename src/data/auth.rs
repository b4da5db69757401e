//! Auth calls plus the presence/length checks the sign-in and registration
//! forms perform before reaching the backend.

use serde::Deserialize;

use crate::backend::{AuthSession, Backend, SignUpOutcome, SignUpRequest};
use crate::error::AuthError;
use crate::models::Role;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
    /// Checked against `password` when given.
    #[serde(default)]
    pub confirm_password: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Teacher
}

impl Registration {
    pub fn into_request(self) -> Result<SignUpRequest, AuthError> {
        if self.full_name.trim().is_empty() || self.email.trim().is_empty() || self.password.is_empty() {
            return Err(AuthError::Rejected("Please fill in all required fields".into()));
        }
        if self
            .confirm_password
            .as_deref()
            .is_some_and(|c| c != self.password)
        {
            return Err(AuthError::Rejected("Passwords do not match".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword { min: MIN_PASSWORD_LEN });
        }
        Ok(SignUpRequest {
            email: self.email.trim().to_string(),
            password: self.password,
            full_name: self.full_name.trim().to_string(),
            phone: self.phone.filter(|p| !p.trim().is_empty()),
            role: self.role,
        })
    }
}

pub async fn sign_up(backend: &dyn Backend, registration: Registration) -> Result<SignUpOutcome, AuthError> {
    backend.sign_up(registration.into_request()?).await
}

pub async fn sign_in(backend: &dyn Backend, email: &str, password: &str) -> Result<AuthSession, AuthError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AuthError::Rejected("Please fill in all fields".into()));
    }
    backend.sign_in_with_password(email.trim(), password).await
}

pub async fn sign_out(backend: &dyn Backend) -> Result<(), AuthError> {
    backend.sign_out().await
}
