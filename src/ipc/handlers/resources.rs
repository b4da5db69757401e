use serde_json::json;

use crate::data::resources::NewResource;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, parse_params};
use crate::ipc::types::{AppState, Request};

async fn by_class(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let resources = state.client.resources(&class_id).await?;
    Ok(json!({ "resources": resources }))
}

async fn create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: NewResource = parse_params(params)?;
    let resource = state.client.create_resource(&input).await?;
    Ok(json!({ "resource": resource }))
}

async fn delete(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let resource_id = get_required_str(params, "resourceId")?;
    state.client.delete_resource(&resource_id).await?;
    Ok(json!({ "ok": true }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "resources.byClass" => by_class(state, &req.params).await,
        "resources.create" => create(state, &req.params).await,
        "resources.delete" => delete(state, &req.params).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
