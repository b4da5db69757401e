//! Tests (assessments), their questions and student submissions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{column_values, count_by, name_or_unknown, profile_names, single, to_row, RowReader};
use crate::backend::{Backend, Filter, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::{QuestionType, Test, TestQuestion, TestSubmission, TestType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct NewTest {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: TestType,
    pub class_id: String,
    pub created_by: String,
    pub total_marks: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_published: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct NewQuestion {
    pub test_id: String,
    pub question_text: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub marks: Option<i64>,
    pub options: Option<Vec<String>>,
    pub correct_answer: Option<String>,
    pub order_index: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct NewSubmission {
    pub test_id: String,
    pub student_id: String,
    pub answers: Value,
    pub score: Option<f64>,
}

fn test_from_row(row: &Row, creator_name: String, question_count: usize) -> Result<Test, BackendError> {
    let r = RowReader::new(Table::Tests, row);
    Ok(Test {
        id: r.text("id")?,
        title: r.text("title")?,
        description: r.opt_text("description"),
        kind: r.parsed("type", TestType::parse)?,
        class_id: r.text("class_id")?,
        created_by: r.text("created_by")?,
        creator_name,
        total_marks: r.int("total_marks")?,
        duration_minutes: r.opt_int("duration_minutes"),
        start_time: r.opt_text("start_time"),
        end_time: r.opt_text("end_time"),
        is_published: r.flag("is_published")?,
        question_count,
        created_at: r.text("created_at")?,
        updated_at: r.text("updated_at")?,
    })
}

fn question_from_row(row: &Row) -> Result<TestQuestion, BackendError> {
    let r = RowReader::new(Table::TestQuestions, row);
    let options = match r.value("options") {
        Value::Null => None,
        v => Some(serde_json::from_value(v).map_err(|_| BackendError::malformed("test_questions", "options"))?),
    };
    Ok(TestQuestion {
        id: r.text("id")?,
        test_id: r.text("test_id")?,
        question_text: r.text("question_text")?,
        kind: r.parsed("type", QuestionType::parse)?,
        marks: r.int("marks")?,
        options,
        correct_answer: r.opt_text("correct_answer"),
        order_index: r.int("order_index")?,
        created_at: r.text("created_at")?,
    })
}

fn submission_from_row(row: &Row) -> Result<TestSubmission, BackendError> {
    let r = RowReader::new(Table::TestSubmissions, row);
    Ok(TestSubmission {
        id: r.text("id")?,
        test_id: r.text("test_id")?,
        student_id: r.text("student_id")?,
        answers: r.value("answers"),
        score: r.opt_real("score"),
        submitted_at: r.text("submitted_at")?,
    })
}

async fn hydrate(backend: &dyn Backend, rows: &[Row]) -> Result<Vec<Test>> {
    let names = profile_names(backend, column_values(rows, "created_by")).await?;
    let ids = column_values(rows, "id");
    let questions = if ids.is_empty() {
        Vec::new()
    } else {
        backend
            .select(Select::from(Table::TestQuestions).filter(Filter::any_of("test_id", ids)))
            .await?
    };
    let counts = count_by(&questions, "test_id");
    rows.iter()
        .map(|row| {
            let r = RowReader::new(Table::Tests, row);
            let creator = name_or_unknown(&names, &r.opt_text("created_by").unwrap_or_default());
            let count = r.opt_text("id").and_then(|id| counts.get(&id).copied()).unwrap_or(0);
            test_from_row(row, creator, count).map_err(Into::into)
        })
        .collect()
}

/// Newest first.
pub async fn tests_by_class(backend: &dyn Backend, class_id: &str) -> Result<Vec<Test>> {
    let rows = backend
        .select(
            Select::from(Table::Tests)
                .eq("class_id", class_id)
                .order_by("created_at", false),
        )
        .await?;
    hydrate(backend, &rows).await
}

pub async fn create_test(backend: &dyn Backend, input: &NewTest) -> Result<Test> {
    let rows = backend.insert(Table::Tests, vec![to_row(input)?]).await?;
    let row = single(Table::Tests, rows)?;
    let mut out = hydrate(backend, std::slice::from_ref(&row)).await?;
    Ok(out.remove(0))
}

pub async fn test_questions(backend: &dyn Backend, test_id: &str) -> Result<Vec<TestQuestion>> {
    let rows = backend
        .select(
            Select::from(Table::TestQuestions)
                .eq("test_id", test_id)
                .order_by("order_index", true),
        )
        .await?;
    rows.iter()
        .map(|r| question_from_row(r).map_err(Into::into))
        .collect()
}

pub async fn add_question(backend: &dyn Backend, input: &NewQuestion) -> Result<TestQuestion> {
    let rows = backend.insert(Table::TestQuestions, vec![to_row(input)?]).await?;
    Ok(question_from_row(&single(Table::TestQuestions, rows)?)?)
}

pub async fn submit_test(backend: &dyn Backend, input: &NewSubmission) -> Result<TestSubmission> {
    let rows = backend.insert(Table::TestSubmissions, vec![to_row(input)?]).await?;
    Ok(submission_from_row(&single(Table::TestSubmissions, rows)?)?)
}
