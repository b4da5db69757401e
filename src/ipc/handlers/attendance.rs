use serde_json::json;

use crate::data::attendance::AttendanceMark;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str, parse_field};
use crate::ipc::types::{AppState, Request};

async fn by_class(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_opt_str(params, "date");
    let records = state.client.attendance(&class_id, date.as_deref()).await?;
    Ok(json!({ "records": records }))
}

/// Accepts `records: [...]` for a batch; a single mark may be sent inline.
async fn mark(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let marks: Vec<AttendanceMark> = if params.get("records").is_some() {
        parse_field(params, "records")?
    } else {
        vec![serde_json::from_value(params.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))?]
    };
    if marks.is_empty() {
        return Err(HandlerErr::bad_params("records must not be empty"));
    }
    let records = state.client.mark_attendance(&marks).await?;
    Ok(json!({ "records": records }))
}

async fn stats(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let start = get_opt_str(params, "startDate");
    let end = get_opt_str(params, "endDate");
    let stats = state
        .client
        .attendance_stats(&class_id, start.as_deref(), end.as_deref())
        .await?;
    Ok(json!({ "stats": stats }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.byClass" => by_class(state, &req.params).await,
        "attendance.mark" => mark(state, &req.params).await,
        "attendance.stats" => stats(state, &req.params).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
