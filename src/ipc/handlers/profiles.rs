use serde_json::json;

use crate::data::institutions::NewInstitution;
use crate::data::profiles::ProfileUpdate;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, parse_params};
use crate::ipc::types::{AppState, Request};

fn current(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    // The session keeps the signed-in profile loaded.
    let snapshot = state.session.snapshot();
    Ok(json!({ "profile": snapshot.profile }))
}

async fn update(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let updates: ProfileUpdate = parse_params(params)?;
    let profile = state.client.update_profile(&updates).await?;
    state.session.reload_profile().await;
    Ok(json!({ "profile": profile }))
}

async fn by_institution(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let institution_id = get_required_str(params, "institutionId")?;
    let profiles = state.client.profiles_by_institution(&institution_id).await?;
    Ok(json!({ "profiles": profiles }))
}

async fn create_institution(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: NewInstitution = parse_params(params)?;
    let institution = state.client.create_institution(&input).await?;
    Ok(json!({ "institution": institution }))
}

async fn get_institution(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "institutionId")?;
    let institution = state.client.institution(&id).await?;
    Ok(json!({ "institution": institution }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "profile.current" => current(state),
        "profile.update" => update(state, &req.params).await,
        "profiles.byInstitution" => by_institution(state, &req.params).await,
        "institutions.create" => create_institution(state, &req.params).await,
        "institutions.get" => get_institution(state, &req.params).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
