use serde_json::json;

use crate::data::classes::{ClassUpdate, NewClass};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, parse_field, parse_params};
use crate::ipc::types::{AppState, Request};

async fn list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let classes = state.client.classes().await?;
    Ok(json!({ "classes": classes }))
}

async fn get(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let class = state.client.class(&class_id).await?;
    Ok(json!({ "class": class }))
}

async fn create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: NewClass = parse_params(params)?;
    if input.name.trim().is_empty() || input.subject.trim().is_empty() {
        return Err(HandlerErr::bad_params("name and subject are required"));
    }
    let class = state.client.create_class(&input).await?;
    Ok(json!({ "class": class }))
}

async fn update(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let patch: ClassUpdate = parse_field(params, "patch")?;
    let class = state.client.update_class(&class_id, &patch).await?;
    Ok(json!({ "class": class }))
}

async fn delete(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    state.client.delete_class(&class_id).await?;
    Ok(json!({ "ok": true }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => list(state).await,
        "classes.get" => get(state, &req.params).await,
        "classes.create" => create(state, &req.params).await,
        "classes.update" => update(state, &req.params).await,
        "classes.delete" => delete(state, &req.params).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
