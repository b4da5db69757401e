use serde_json::json;

use crate::data::notifications::NewNotification;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, parse_params};
use crate::ipc::types::{AppState, Request};

async fn list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let notifications = state.client.notifications().await?;
    let unread = notifications.iter().filter(|n| !n.is_read).count();
    Ok(json!({ "notifications": notifications, "unread": unread }))
}

async fn mark_read(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "notificationId")?;
    let notification = state.client.mark_notification_read(&id).await?;
    Ok(json!({ "notification": notification }))
}

async fn create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: NewNotification = parse_params(params)?;
    let notification = state.client.create_notification(&input).await?;
    Ok(json!({ "notification": notification }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notifications.list" => list(state).await,
        "notifications.markRead" => mark_read(state, &req.params).await,
        "notifications.create" => create(state, &req.params).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
