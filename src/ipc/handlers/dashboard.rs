use chrono::Utc;
use serde_json::json;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};

async fn stats(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let stats = state.client.dashboard_stats(Utc::now().date_naive()).await?;
    Ok(json!({ "stats": stats }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.stats" => stats(state).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
