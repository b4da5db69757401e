use serde_json::json;

use crate::data::assessments::{NewQuestion, NewSubmission, NewTest};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, parse_params};
use crate::ipc::types::{AppState, Request};

async fn by_class(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let tests = state.client.tests(&class_id).await?;
    Ok(json!({ "tests": tests }))
}

async fn create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: NewTest = parse_params(params)?;
    let test = state.client.create_test(&input).await?;
    Ok(json!({ "test": test }))
}

async fn questions(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let test_id = get_required_str(params, "testId")?;
    let questions = state.client.test_questions(&test_id).await?;
    Ok(json!({ "questions": questions }))
}

async fn add_question(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: NewQuestion = parse_params(params)?;
    let question = state.client.add_question(&input).await?;
    Ok(json!({ "question": question }))
}

async fn submit(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input: NewSubmission = parse_params(params)?;
    let submission = state.client.submit_test(&input).await?;
    Ok(json!({ "submission": submission }))
}

pub async fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "tests.byClass" => by_class(state, &req.params).await,
        "tests.create" => create(state, &req.params).await,
        "tests.questions" => questions(state, &req.params).await,
        "tests.addQuestion" => add_question(state, &req.params).await,
        "tests.submit" => submit(state, &req.params).await,
        _ => return None,
    };
    Some(respond(&req.id, result))
}
