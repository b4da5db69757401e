use serde_json::json;

use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};

async fn list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let students = state.client.students().await?;
    Ok(json!({ "students": students }))
}

async fn by_class(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let students = state.client.students_by_class(&class_id).await?;
    Ok(json!({ "students": students }))
}

async fn enroll(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let class_id = get_required_str(params, "classId")?;
    let enrollment = state.client.enroll_student(&student_id, &class_id).await?;
    Ok(json!({ "enrollment": enrollment }))
}

async fn unenroll(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let class_id = get_required_str(params, "classId")?;
    let enrollment = state.client.unenroll_student(&student_id, &class_id).await?;
    Ok(json!({ "enrollment": enrollment }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => list(state).await,
        "students.byClass" => by_class(state, &req.params).await,
        "students.enroll" => enroll(state, &req.params).await,
        "students.unenroll" => unenroll(state, &req.params).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
