use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::schema::{state_clear, state_get, state_set};
use super::tables::map_sqlite;
use super::SqliteOptions;
use crate::backend::{AuthSession, AuthUser, SignUpOutcome, SignUpRequest};
use crate::error::AuthError;

const CURRENT_SESSION_KEY: &str = "auth.current_access_token";
pub const MIN_PASSWORD_LEN: usize = 6;

fn db_err(e: rusqlite::Error) -> AuthError {
    AuthError::Rejected(map_sqlite(e).to_string())
}

fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::Rejected(e.to_string()))
}

fn password_matches(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Rejected(e.to_string()))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

struct UserRecord {
    user: AuthUser,
    hash: String,
    confirmation_token: Option<String>,
}

fn load_user(conn: &Connection, where_sql: &str, key: &str) -> Result<Option<UserRecord>, AuthError> {
    conn.query_row(
        &format!(
            "SELECT id, email, email_confirmed_at, user_metadata, created_at,
                    password_hash, confirmation_token
             FROM auth_users WHERE {where_sql}"
        ),
        [key],
        |r| {
            let metadata: String = r.get(3)?;
            Ok(UserRecord {
                user: AuthUser {
                    id: r.get(0)?,
                    email: r.get(1)?,
                    email_confirmed_at: r.get(2)?,
                    user_metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| json!({})),
                    created_at: r.get(4)?,
                },
                hash: r.get(5)?,
                confirmation_token: r.get(6)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

/// Replaces the current session, if any, with a fresh one for `user`.
fn issue_session(conn: &Connection, user: AuthUser, ttl_secs: i64) -> Result<AuthSession, AuthError> {
    if let Some(previous) = state_get(conn, CURRENT_SESSION_KEY).map_err(db_err)? {
        conn.execute("DELETE FROM auth_sessions WHERE access_token = ?", [&previous])
            .map_err(db_err)?;
    }
    let session = AuthSession {
        access_token: Uuid::new_v4().simple().to_string(),
        refresh_token: Uuid::new_v4().simple().to_string(),
        expires_at: Utc::now().timestamp() + ttl_secs,
        user,
    };
    conn.execute(
        "INSERT INTO auth_sessions(access_token, refresh_token, user_id, expires_at)
         VALUES(?, ?, ?, ?)",
        (
            &session.access_token,
            &session.refresh_token,
            &session.user.id,
            session.expires_at,
        ),
    )
    .map_err(db_err)?;
    state_set(conn, CURRENT_SESSION_KEY, &session.access_token).map_err(db_err)?;
    Ok(session)
}

pub fn sign_up(
    conn: &Connection,
    request: &SignUpRequest,
    options: &SqliteOptions,
) -> Result<SignUpOutcome, AuthError> {
    let email = normalize_email(&request.email);
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AuthError::Rejected("Unable to validate email address: invalid format".into()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword {
            min: MIN_PASSWORD_LEN,
        });
    }
    if load_user(conn, "email = ?", &email)?.is_some() {
        return Err(AuthError::AlreadyRegistered);
    }

    let now = Utc::now().to_rfc3339();
    let id = Uuid::new_v4().to_string();
    let hash = hash_password(&request.password, options.password_cost)?;
    let metadata = json!({
        "full_name": request.full_name,
        "phone": request.phone,
        "role": request.role,
    });
    let (confirmed_at, token) = if options.auto_confirm {
        (Some(now.clone()), None)
    } else {
        (None, Some(Uuid::new_v4().simple().to_string()))
    };

    let tx = conn.unchecked_transaction().map_err(db_err)?;
    tx.execute(
        "INSERT INTO auth_users(id, email, password_hash, email_confirmed_at,
                                confirmation_token, user_metadata, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &email,
            &hash,
            &confirmed_at,
            &token,
            metadata.to_string(),
            &now,
        ),
    )
    .map_err(db_err)?;
    // Every account gets its profile row at registration.
    tx.execute(
        "INSERT INTO profiles(id, full_name, phone, role, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            request.full_name.trim(),
            &request.phone,
            request.role.as_str(),
            &now,
            &now,
        ),
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)?;

    let user = AuthUser {
        id,
        email,
        email_confirmed_at: confirmed_at,
        user_metadata: metadata,
        created_at: now,
    };
    let session = if options.auto_confirm {
        Some(issue_session(conn, user.clone(), options.session_ttl_secs)?)
    } else {
        None
    };
    Ok(SignUpOutcome {
        user,
        session,
        confirmation_token: token,
    })
}

pub fn sign_in(
    conn: &Connection,
    email: &str,
    password: &str,
    ttl_secs: i64,
) -> Result<AuthSession, AuthError> {
    let Some(record) = load_user(conn, "email = ?", &normalize_email(email))? else {
        return Err(AuthError::InvalidCredentials);
    };
    if !password_matches(password, &record.hash)? {
        return Err(AuthError::InvalidCredentials);
    }
    if record.user.email_confirmed_at.is_none() {
        return Err(AuthError::EmailNotConfirmed);
    }
    issue_session(conn, record.user, ttl_secs)
}

pub fn verify_email(
    conn: &Connection,
    email: &str,
    token: &str,
    ttl_secs: i64,
) -> Result<AuthSession, AuthError> {
    let invalid = || AuthError::Rejected("Token has expired or is invalid".into());
    let record = load_user(conn, "email = ?", &normalize_email(email))?.ok_or_else(invalid)?;
    if record.confirmation_token.as_deref() != Some(token) {
        return Err(invalid());
    }
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE auth_users SET email_confirmed_at = ?, confirmation_token = NULL WHERE id = ?",
        (&now, &record.user.id),
    )
    .map_err(db_err)?;
    let user = AuthUser {
        email_confirmed_at: Some(now),
        ..record.user
    };
    issue_session(conn, user, ttl_secs)
}

/// The persisted session, whether or not it has expired.
pub fn current_session(conn: &Connection) -> Result<Option<AuthSession>, AuthError> {
    let Some(token) = state_get(conn, CURRENT_SESSION_KEY).map_err(db_err)? else {
        return Ok(None);
    };
    let found: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT refresh_token, user_id, expires_at FROM auth_sessions WHERE access_token = ?",
            [&token],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((refresh_token, user_id, expires_at)) = found else {
        state_clear(conn, CURRENT_SESSION_KEY).map_err(db_err)?;
        return Ok(None);
    };
    let Some(record) = load_user(conn, "id = ?", &user_id)? else {
        state_clear(conn, CURRENT_SESSION_KEY).map_err(db_err)?;
        return Ok(None);
    };
    Ok(Some(AuthSession {
        access_token: token,
        refresh_token,
        expires_at,
        user: record.user,
    }))
}

pub fn is_expired(session: &AuthSession) -> bool {
    session.expires_at <= Utc::now().timestamp()
}

/// Rotate the current session's tokens.
pub fn refresh(conn: &Connection, ttl_secs: i64) -> Result<AuthSession, AuthError> {
    let Some(current) = current_session(conn)? else {
        return Err(AuthError::NotAuthenticated);
    };
    issue_session(conn, current.user, ttl_secs)
}

pub fn sign_out(conn: &Connection) -> Result<(), AuthError> {
    if let Some(token) = state_get(conn, CURRENT_SESSION_KEY).map_err(db_err)? {
        conn.execute("DELETE FROM auth_sessions WHERE access_token = ?", [&token])
            .map_err(db_err)?;
    }
    state_clear(conn, CURRENT_SESSION_KEY).map_err(db_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::schema::init_schema;
    use crate::models::Role;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn
    }

    fn options(auto_confirm: bool) -> SqliteOptions {
        SqliteOptions {
            auto_confirm,
            ..SqliteOptions::cheap_hashing()
        }
    }

    fn request(email: &str, password: &str) -> SignUpRequest {
        SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            full_name: "Asha Rao".to_string(),
            phone: None,
            role: Role::Teacher,
        }
    }

    #[test]
    fn sign_up_creates_profile_and_session() {
        let conn = conn();
        let out = sign_up(&conn, &request("Asha@Example.com", "secret1"), &options(true)).expect("sign up");
        assert_eq!(out.user.email, "asha@example.com");
        assert!(out.session.is_some());
        let role: String = conn
            .query_row("SELECT role FROM profiles WHERE id = ?", [&out.user.id], |r| r.get(0))
            .expect("profile row");
        assert_eq!(role, "teacher");
        let current = current_session(&conn).expect("current").expect("some");
        assert_eq!(current.user.id, out.user.id);
    }

    #[test]
    fn sign_up_rejects_short_passwords_and_duplicates() {
        let conn = conn();
        assert_eq!(
            sign_up(&conn, &request("a@b.co", "123"), &options(true)).expect_err("weak"),
            AuthError::WeakPassword { min: 6 }
        );
        sign_up(&conn, &request("a@b.co", "123456"), &options(true)).expect("first");
        assert_eq!(
            sign_up(&conn, &request("A@B.co", "123456"), &options(true)).expect_err("dup"),
            AuthError::AlreadyRegistered
        );
    }

    #[test]
    fn unconfirmed_accounts_cannot_sign_in_until_verified() {
        let conn = conn();
        let out = sign_up(&conn, &request("a@b.co", "123456"), &options(false)).expect("sign up");
        assert!(out.session.is_none());
        assert_eq!(
            sign_in(&conn, "a@b.co", "123456", 3600).expect_err("unconfirmed"),
            AuthError::EmailNotConfirmed
        );
        assert!(verify_email(&conn, "a@b.co", "wrong", 3600).is_err());
        let token = out.confirmation_token.expect("token");
        verify_email(&conn, "a@b.co", &token, 3600).expect("verify");
        sign_in(&conn, "a@b.co", "123456", 3600).expect("sign in");
    }

    #[test]
    fn wrong_password_is_invalid_credentials() {
        let conn = conn();
        sign_up(&conn, &request("a@b.co", "123456"), &options(true)).expect("sign up");
        assert_eq!(
            sign_in(&conn, "a@b.co", "654321", 3600).expect_err("bad"),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            sign_in(&conn, "nobody@b.co", "123456", 3600).expect_err("unknown"),
            AuthError::InvalidCredentials
        );
    }

    #[test]
    fn sign_out_forgets_the_session_and_refresh_rotates_it() {
        let conn = conn();
        sign_up(&conn, &request("a@b.co", "123456"), &options(true)).expect("sign up");
        let before = current_session(&conn).expect("ok").expect("session");
        let after = refresh(&conn, 3600).expect("refresh");
        assert_ne!(before.access_token, after.access_token);
        sign_out(&conn).expect("sign out");
        assert!(current_session(&conn).expect("ok").is_none());
        assert_eq!(refresh(&conn, 3600).expect_err("gone"), AuthError::NotAuthenticated);
    }

    #[test]
    fn passwords_are_stored_as_bcrypt_hashes() {
        let conn = conn();
        let out = sign_up(&conn, &request("a@b.co", "123456"), &options(true)).expect("sign up");
        let stored: String = conn
            .query_row("SELECT password_hash FROM auth_users WHERE id = ?", [&out.user.id], |r| r.get(0))
            .expect("user row");
        assert!(stored.starts_with("$2"));
        assert!(!stored.contains("123456"));
        assert!(bcrypt::verify("123456", &stored).expect("verify"));
    }

    #[test]
    fn repeated_sign_ins_keep_one_session_row() {
        let conn = conn();
        sign_up(&conn, &request("a@b.co", "123456"), &options(true)).expect("sign up");
        for _ in 0..5 {
            sign_in(&conn, "a@b.co", "123456", 3600).expect("sign in");
        }
        let count = |conn: &Connection| -> i64 {
            conn.query_row("SELECT COUNT(*) FROM auth_sessions", [], |r| r.get(0))
                .expect("count")
        };
        assert_eq!(count(&conn), 1);
        refresh(&conn, 3600).expect("refresh");
        assert_eq!(count(&conn), 1);
        sign_out(&conn).expect("sign out");
        assert_eq!(count(&conn), 0);
    }
}
