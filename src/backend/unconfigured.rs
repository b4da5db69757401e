use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{
    AuthEvent, AuthSession, AuthSubscription, AuthUser, Backend, Filter, Row, Select,
    SignUpOutcome, SignUpRequest, Table,
};
use crate::error::{AuthError, BackendError};

/// Stand-in used when no usable backend is configured. `get_session` reports
/// "signed out" so the session settles; everything else reports not configured.
pub struct UnconfiguredBackend {
    // Never sent on; keeps subscriptions pending instead of closed.
    events: broadcast::Sender<AuthEvent>,
}

impl UnconfiguredBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        UnconfiguredBackend { events }
    }
}

impl Default for UnconfiguredBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for UnconfiguredBackend {
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        Ok(None)
    }

    async fn get_user(&self) -> Result<Option<AuthUser>, AuthError> {
        Err(AuthError::NotConfigured)
    }

    async fn sign_up(&self, _request: SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        Err(AuthError::NotConfigured)
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<AuthSession, AuthError> {
        Err(AuthError::NotConfigured)
    }

    async fn verify_email(&self, _email: &str, _token: &str) -> Result<AuthSession, AuthError> {
        Err(AuthError::NotConfigured)
    }

    async fn refresh_session(&self) -> Result<AuthSession, AuthError> {
        Err(AuthError::NotConfigured)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        Ok(())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn select(&self, _query: Select) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn insert(&self, _table: Table, _rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn upsert(
        &self,
        _table: Table,
        _rows: Vec<Row>,
        _on_conflict: &[&'static str],
    ) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn update(
        &self,
        _table: Table,
        _filters: Vec<Filter>,
        _patch: Row,
    ) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn delete(&self, _table: Table, _filters: Vec<Filter>) -> Result<usize, BackendError> {
        Err(BackendError::NotConfigured)
    }
}
