use serde_json::json;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::models::CoTeacherPermissions;

async fn by_class(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let co_teachers = state.client.co_teachers(&class_id).await?;
    Ok(json!({ "coTeachers": co_teachers }))
}

async fn add(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let permissions: CoTeacherPermissions = match params.get("permissions") {
        Some(p) => serde_json::from_value(p.clone())
            .map_err(|e| HandlerErr::bad_params(format!("permissions: {}", e)))?,
        None => CoTeacherPermissions::default(),
    };
    let co_teacher = state
        .client
        .add_co_teacher(&class_id, &teacher_id, permissions)
        .await?;
    Ok(json!({ "coTeacher": co_teacher }))
}

async fn remove(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    state.client.remove_co_teacher(&class_id, &teacher_id).await?;
    Ok(json!({ "ok": true }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "coTeachers.byClass" => by_class(state, &req.params).await,
        "coTeachers.add" => add(state, &req.params).await,
        "coTeachers.remove" => remove(state, &req.params).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
