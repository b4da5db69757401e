use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::backend::AuthSession;
use crate::data::auth::Registration;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, parse_params};
use crate::ipc::types::{AppState, Request};
use crate::session::SessionState;

/// Upper bound on waiting for the profile load that follows a sign-in.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn session_view(s: &SessionState) -> serde_json::Value {
    json!({
        "user": s.user,
        "profile": s.profile,
        "loading": s.loading,
        "isAuthenticated": s.is_authenticated(),
        "isAdmin": s.is_admin(),
        "isTeacher": s.is_teacher(),
        "isStudent": s.is_student(),
    })
}

/// Waits until the session reflects `user_id` with its profile loaded.
async fn settled_for(state: &AppState, user_id: &str) -> SessionState {
    let wait = state
        .session
        .wait_for(|s| !s.loading && s.user.as_ref().is_some_and(|u| u.id == user_id));
    match tokio::time::timeout(SETTLE_TIMEOUT, wait).await {
        Ok(s) => s,
        Err(_) => {
            warn!(user_id, "session did not settle after sign-in");
            state.session.snapshot()
        }
    }
}

async fn signed_in(state: &AppState, session: AuthSession) -> serde_json::Value {
    // Cached reads belong to whoever was signed in before.
    state.client.queries().clear();
    let settled = settled_for(state, &session.user.id).await;
    json!({
        "session": session,
        "state": session_view(&settled),
    })
}

async fn sign_in(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;
    let session = state.session.sign_in(&email, &password).await?;
    Ok(signed_in(state, session).await)
}

async fn sign_up(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let registration: Registration = parse_params(params)?;
    let outcome = state.session.sign_up(registration).await?;
    match outcome.session {
        Some(session) => Ok(signed_in(state, session).await),
        None => Ok(json!({
            "user": outcome.user,
            "confirmationRequired": true,
            "confirmationToken": outcome.confirmation_token,
        })),
    }
}

async fn verify_email(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?;
    let token = get_required_str(params, "token")?;
    let session = state.session.verify_email(&email, &token).await?;
    Ok(signed_in(state, session).await)
}

async fn sign_out(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    state.session.sign_out().await?;
    state.client.queries().clear();
    Ok(json!({ "state": session_view(&state.session.snapshot()) }))
}

async fn refresh(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let session = state.session.refresh().await?;
    Ok(json!({ "session": session }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.signIn" => sign_in(state, &req.params).await,
        "auth.signUp" => sign_up(state, &req.params).await,
        "auth.verifyEmail" => verify_email(state, &req.params).await,
        "auth.signOut" => sign_out(state).await,
        "auth.refresh" => refresh(state).await,
        "auth.state" => Ok(json!({ "state": session_view(&state.session.snapshot()) })),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
