//! Port to the relational-database-with-auth service.
//!
//! The rest of the daemon only talks to [`Backend`]; which implementation is
//! behind it is decided once at startup by [`connect`].

mod sqlite;
mod unconfigured;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AuthError, BackendError};
use crate::models::Role;

pub use sqlite::{SqliteBackend, SqliteOptions};
pub use unconfigured::UnconfiguredBackend;

/// One backend row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Institutions,
    Classes,
    ClassEnrollments,
    AttendanceRecords,
    Resources,
    Tests,
    TestQuestions,
    TestSubmissions,
    CoTeachers,
    Notifications,
}

impl Table {
    #[cfg(test)]
    pub const ALL: [Table; 11] = [
        Table::Profiles,
        Table::Institutions,
        Table::Classes,
        Table::ClassEnrollments,
        Table::AttendanceRecords,
        Table::Resources,
        Table::Tests,
        Table::TestQuestions,
        Table::TestSubmissions,
        Table::CoTeachers,
        Table::Notifications,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Institutions => "institutions",
            Table::Classes => "classes",
            Table::ClassEnrollments => "class_enrollments",
            Table::AttendanceRecords => "attendance_records",
            Table::Resources => "resources",
            Table::Tests => "tests",
            Table::TestQuestions => "test_questions",
            Table::TestSubmissions => "test_submissions",
            Table::CoTeachers => "co_teachers",
            Table::Notifications => "notifications",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    In(&'static str, Vec<Value>),
    Gte(&'static str, Value),
    Lte(&'static str, Value),
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    pub fn any_of<I, V>(column: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(column, values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &'static str {
        match self {
            Filter::Eq(c, _) | Filter::In(c, _) | Filter::Gte(c, _) | Filter::Lte(c, _) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

/// A single-table read.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: Table) -> Self {
        Select {
            table,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_by(mut self, column: &'static str, ascending: bool) -> Self {
        self.order = Some(Order { column, ascending });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub email_confirmed_at: Option<String>,
    pub user_metadata: Value,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: AuthUser,
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpOutcome {
    pub user: AuthUser,
    /// Absent until the email address is confirmed.
    pub session: Option<AuthSession>,
    pub confirmation_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChange {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub change: AuthChange,
    pub session: Option<AuthSession>,
}

/// Live feed of auth-state transitions. Dropping it unsubscribes.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    pub fn new(rx: broadcast::Receiver<AuthEvent>) -> Self {
        AuthSubscription { rx }
    }

    /// Next event, or `None` once the backend has gone away.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth subscriber lagged; dropping stale events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError>;
    async fn get_user(&self) -> Result<Option<AuthUser>, AuthError>;
    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, AuthError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError>;
    async fn verify_email(&self, email: &str, token: &str) -> Result<AuthSession, AuthError>;
    async fn refresh_session(&self) -> Result<AuthSession, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    fn on_auth_state_change(&self) -> AuthSubscription;

    async fn select(&self, query: Select) -> Result<Vec<Row>, BackendError>;
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, BackendError>;
    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Row>,
        on_conflict: &[&'static str],
    ) -> Result<Vec<Row>, BackendError>;
    async fn update(
        &self,
        table: Table,
        filters: Vec<Filter>,
        patch: Row,
    ) -> Result<Vec<Row>, BackendError>;
    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<usize, BackendError>;
}

/// Open the configured backend, or the inert one when configuration is
/// missing or unusable.
pub fn connect(config: &Config) -> Arc<dyn Backend> {
    let Some(target) = config.backend.as_ref() else {
        warn!("no backend configured; data calls will report not configured");
        return Arc::new(UnconfiguredBackend::new());
    };
    let options = SqliteOptions {
        auto_confirm: config.auto_confirm,
        password_cost: config.password_cost,
        ..SqliteOptions::default()
    };
    match SqliteBackend::open(&target.database_path, &target.api_key, options) {
        Ok(backend) => {
            info!(path = %target.database_path.display(), "backend connected");
            Arc::new(backend)
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "backend unavailable; falling back to unconfigured client");
            Arc::new(UnconfiguredBackend::new())
        }
    }
}
