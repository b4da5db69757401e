//! Local relational service: tables, password auth and auth-state
//! notifications over one SQLite file.

mod auth;
mod schema;
mod tables;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::bail;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    AuthChange, AuthEvent, AuthSession, AuthSubscription, AuthUser, Backend, Filter, Row, Select,
    SignUpOutcome, SignUpRequest, Table,
};
use crate::error::{AuthError, BackendError};

const SERVICE_KEY: &str = "service.api_key";

/// Lowest bcrypt work factor the hasher accepts.
pub const MIN_PASSWORD_COST: u32 = 4;

#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Accounts are usable right after sign-up when set.
    pub auto_confirm: bool,
    pub session_ttl_secs: i64,
    /// bcrypt work factor for new passwords.
    pub password_cost: u32,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        SqliteOptions {
            auto_confirm: true,
            session_ttl_secs: 3600,
            password_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl SqliteOptions {
    #[cfg(test)]
    pub fn cheap_hashing() -> Self {
        SqliteOptions {
            password_cost: MIN_PASSWORD_COST,
            ..SqliteOptions::default()
        }
    }
}

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    options: SqliteOptions,
    events: broadcast::Sender<AuthEvent>,
}

impl SqliteBackend {
    /// Open (creating if needed) the service at `path`. The first key used
    /// against a database is bound to it; later opens must present it.
    pub fn open(path: &Path, api_key: &str, options: SqliteOptions) -> anyhow::Result<Self> {
        let conn = schema::open_db(path)?;
        Self::from_connection(conn, api_key, options)
    }

    #[cfg(test)]
    pub fn open_in_memory(options: SqliteOptions) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Self::from_connection(conn, "test-key", options)
    }

    fn from_connection(conn: Connection, api_key: &str, options: SqliteOptions) -> anyhow::Result<Self> {
        match schema::state_get(&conn, SERVICE_KEY)? {
            Some(bound) if bound != api_key => bail!("invalid API key for this backend"),
            Some(_) => {}
            None => schema::state_set(&conn, SERVICE_KEY, api_key)?,
        }
        let (events, _) = broadcast::channel(16);
        Ok(SqliteBackend {
            conn: Mutex::new(conn),
            options,
            events,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, BackendError> {
        self.conn
            .lock()
            .map_err(|_| BackendError::request("unavailable", "backend connection poisoned"))
    }

    fn auth_conn(&self) -> Result<MutexGuard<'_, Connection>, AuthError> {
        self.conn
            .lock()
            .map_err(|_| AuthError::Rejected("backend connection poisoned".into()))
    }

    fn emit(&self, change: AuthChange, session: Option<AuthSession>) {
        debug!(?change, "auth state change");
        // No subscribers is fine.
        let _ = self.events.send(AuthEvent { change, session });
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let ttl = self.options.session_ttl_secs;
        let refreshed = {
            let conn = self.auth_conn()?;
            match auth::current_session(&conn)? {
                Some(s) if auth::is_expired(&s) => auth::refresh(&conn, ttl)?,
                other => return Ok(other),
            }
        };
        self.emit(AuthChange::TokenRefreshed, Some(refreshed.clone()));
        Ok(Some(refreshed))
    }

    /// Goes through [`Backend::get_session`] so an expired session is
    /// refreshed rather than served.
    async fn get_user(&self) -> Result<Option<AuthUser>, AuthError> {
        Ok(self.get_session().await?.map(|s| s.user))
    }

    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        let outcome = {
            let conn = self.auth_conn()?;
            auth::sign_up(&conn, &request, &self.options)?
        };
        if let Some(session) = &outcome.session {
            self.emit(AuthChange::SignedIn, Some(session.clone()));
        }
        Ok(outcome)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        let session = {
            let conn = self.auth_conn()?;
            auth::sign_in(&conn, email, password, self.options.session_ttl_secs)?
        };
        self.emit(AuthChange::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn verify_email(&self, email: &str, token: &str) -> Result<AuthSession, AuthError> {
        let session = {
            let conn = self.auth_conn()?;
            auth::verify_email(&conn, email, token, self.options.session_ttl_secs)?
        };
        self.emit(AuthChange::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn refresh_session(&self) -> Result<AuthSession, AuthError> {
        let session = {
            let conn = self.auth_conn()?;
            auth::refresh(&conn, self.options.session_ttl_secs)?
        };
        self.emit(AuthChange::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        {
            let conn = self.auth_conn()?;
            auth::sign_out(&conn)?;
        }
        self.emit(AuthChange::SignedOut, None);
        Ok(())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    async fn select(&self, query: Select) -> Result<Vec<Row>, BackendError> {
        let conn = self.conn()?;
        tables::select(&conn, &query)
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        let conn = self.conn()?;
        tables::insert(&conn, table, rows)
    }

    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Row>,
        on_conflict: &[&'static str],
    ) -> Result<Vec<Row>, BackendError> {
        let conn = self.conn()?;
        tables::upsert(&conn, table, rows, on_conflict)
    }

    async fn update(
        &self,
        table: Table,
        filters: Vec<Filter>,
        patch: Row,
    ) -> Result<Vec<Row>, BackendError> {
        let (rows, own_profile) = {
            let conn = self.conn()?;
            let rows = tables::update(&conn, table, &filters, patch)?;
            // Edits to the signed-in user's profile are announced as UserUpdated.
            let own_profile = match table {
                Table::Profiles => auth::current_session(&conn)
                    .ok()
                    .flatten()
                    .filter(|s| {
                        rows.iter()
                            .any(|r| r.get("id").and_then(|v| v.as_str()) == Some(s.user.id.as_str()))
                    }),
                _ => None,
            };
            (rows, own_profile)
        };
        if let Some(session) = own_profile {
            self.emit(AuthChange::UserUpdated, Some(session));
        }
        Ok(rows)
    }

    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<usize, BackendError> {
        let conn = self.conn()?;
        tables::delete(&conn, table, &filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn temp_db(prefix: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}-{}.sqlite3", prefix, uuid::Uuid::new_v4().simple()))
    }

    #[test]
    fn api_key_is_bound_to_the_database() {
        let path = temp_db("tuitiond-key");
        drop(SqliteBackend::open(&path, "key-a", SqliteOptions::default()).expect("first open"));
        assert!(SqliteBackend::open(&path, "key-b", SqliteOptions::default()).is_err());
        assert!(SqliteBackend::open(&path, "key-a", SqliteOptions::default()).is_ok());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn sign_in_and_out_are_broadcast() {
        let backend = SqliteBackend::open_in_memory(SqliteOptions::cheap_hashing()).expect("open");
        let mut sub = backend.on_auth_state_change();
        backend
            .sign_up(SignUpRequest {
                email: "t@x.io".into(),
                password: "secret1".into(),
                full_name: "T".into(),
                phone: None,
                role: Role::Admin,
            })
            .await
            .expect("sign up");
        let event = sub.next().await.expect("event");
        assert_eq!(event.change, AuthChange::SignedIn);
        assert!(event.session.is_some());

        backend.sign_out().await.expect("sign out");
        let event = sub.next().await.expect("event");
        assert_eq!(event.change, AuthChange::SignedOut);
        assert!(backend.get_session().await.expect("session").is_none());
    }

    #[tokio::test]
    async fn own_profile_edits_are_broadcast() {
        let backend = SqliteBackend::open_in_memory(SqliteOptions::cheap_hashing()).expect("open");
        let out = backend
            .sign_up(SignUpRequest {
                email: "t@x.io".into(),
                password: "secret1".into(),
                full_name: "T".into(),
                phone: None,
                role: Role::Teacher,
            })
            .await
            .expect("sign up");
        let mut sub = backend.on_auth_state_change();
        let mut patch = Row::new();
        patch.insert("full_name".into(), serde_json::json!("Tara"));
        backend
            .update(Table::Profiles, vec![Filter::eq("id", out.user.id.as_str())], patch)
            .await
            .expect("update");
        let event = sub.next().await.expect("event");
        assert_eq!(event.change, AuthChange::UserUpdated);
        assert_eq!(event.session.map(|s| s.user.id), Some(out.user.id));
    }

    #[tokio::test]
    async fn expired_sessions_are_refreshed_on_read() {
        let options = SqliteOptions {
            session_ttl_secs: -1,
            ..SqliteOptions::cheap_hashing()
        };
        let backend = SqliteBackend::open_in_memory(options).expect("open");
        let out = backend
            .sign_up(SignUpRequest {
                email: "t@x.io".into(),
                password: "secret1".into(),
                full_name: "T".into(),
                phone: None,
                role: Role::Teacher,
            })
            .await
            .expect("sign up");
        let first = out.session.expect("session");
        let mut sub = backend.on_auth_state_change();
        let again = backend.get_session().await.expect("ok").expect("session");
        assert_ne!(first.access_token, again.access_token);
        assert_eq!(sub.next().await.expect("event").change, AuthChange::TokenRefreshed);
    }

    #[tokio::test]
    async fn user_lookup_refreshes_an_expired_session() {
        let options = SqliteOptions {
            session_ttl_secs: -1,
            ..SqliteOptions::cheap_hashing()
        };
        let backend = SqliteBackend::open_in_memory(options).expect("open");
        let out = backend
            .sign_up(SignUpRequest {
                email: "u@x.io".into(),
                password: "secret1".into(),
                full_name: "U".into(),
                phone: None,
                role: Role::Student,
            })
            .await
            .expect("sign up");
        let first = out.session.expect("session");
        let mut sub = backend.on_auth_state_change();
        let user = backend.get_user().await.expect("ok").expect("user");
        assert_eq!(user.id, out.user.id);
        let event = sub.next().await.expect("event");
        assert_eq!(event.change, AuthChange::TokenRefreshed);
        let rotated = event.session.expect("session");
        assert_ne!(rotated.access_token, first.access_token);
    }
}
