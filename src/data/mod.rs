//! Thin async wrappers over backend calls, one file per entity. Each
//! operation is one request (plus display-name lookups) and reshapes rows
//! into the view models in [`crate::models`].

pub mod assessments;
pub mod attendance;
pub mod auth;
pub mod classes;
pub mod co_teachers;
pub mod dashboard;
pub mod institutions;
pub mod notifications;
pub mod profiles;
pub mod resources;
pub mod students;

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::backend::{AuthUser, Backend, Filter, Row, Select, Table};
use crate::error::{AuthError, BackendError, Result};

/// Display name used when a joined profile is missing.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Typed access to one row; failures name the table and column.
pub struct RowReader<'a> {
    table: Table,
    row: &'a Row,
}

impl<'a> RowReader<'a> {
    pub fn new(table: Table, row: &'a Row) -> Self {
        RowReader { table, row }
    }

    fn malformed(&self, column: &str) -> BackendError {
        BackendError::malformed(self.table.name(), column)
    }

    pub fn text(&self, column: &str) -> Result<String, BackendError> {
        self.row
            .get(column)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.malformed(column))
    }

    pub fn opt_text(&self, column: &str) -> Option<String> {
        self.row.get(column).and_then(Value::as_str).map(str::to_string)
    }

    pub fn flag(&self, column: &str) -> Result<bool, BackendError> {
        self.row
            .get(column)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.malformed(column))
    }

    pub fn int(&self, column: &str) -> Result<i64, BackendError> {
        self.row
            .get(column)
            .and_then(Value::as_i64)
            .ok_or_else(|| self.malformed(column))
    }

    pub fn opt_int(&self, column: &str) -> Option<i64> {
        self.row.get(column).and_then(Value::as_i64)
    }

    pub fn opt_real(&self, column: &str) -> Option<f64> {
        self.row.get(column).and_then(Value::as_f64)
    }

    pub fn value(&self, column: &str) -> Value {
        self.row.get(column).cloned().unwrap_or(Value::Null)
    }

    pub fn parsed<T>(&self, column: &str, parse: fn(&str) -> Option<T>) -> Result<T, BackendError> {
        self.row
            .get(column)
            .and_then(Value::as_str)
            .and_then(parse)
            .ok_or_else(|| self.malformed(column))
    }
}

/// Serialize an input struct into a row, dropping absent fields.
pub fn to_row<T: Serialize>(input: &T) -> Result<Row, BackendError> {
    match serde_json::to_value(input) {
        Ok(Value::Object(map)) => Ok(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        Ok(_) => Err(BackendError::request("bad_input", "input is not an object")),
        Err(e) => Err(BackendError::request("bad_input", e.to_string())),
    }
}

pub fn single(table: Table, rows: Vec<Row>) -> Result<Row, BackendError> {
    rows.into_iter()
        .next()
        .ok_or(BackendError::NoRows { table: table.name() })
}

pub fn column_values(rows: &[Row], column: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|r| r.get(column).and_then(Value::as_str))
        .filter(|v| seen.insert(v.to_string()))
        .map(str::to_string)
        .collect()
}

/// Profile id → full name for the given ids.
pub async fn profile_names(backend: &dyn Backend, ids: Vec<String>) -> Result<HashMap<String, String>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = backend
        .select(Select::from(Table::Profiles).filter(Filter::any_of("id", ids)))
        .await?;
    let mut names = HashMap::with_capacity(rows.len());
    for row in &rows {
        let r = RowReader::new(Table::Profiles, row);
        names.insert(r.text("id")?, r.text("full_name")?);
    }
    Ok(names)
}

pub fn name_or_unknown(names: &HashMap<String, String>, id: &str) -> String {
    names
        .get(id)
        .filter(|n| !n.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}

/// Number of rows per value of `column`.
pub fn count_by(rows: &[Row], column: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for v in rows.iter().filter_map(|r| r.get(column).and_then(Value::as_str)) {
        *counts.entry(v.to_string()).or_insert(0) += 1;
    }
    counts
}

/// The signed-in user. A backend that is not configured is a data-call
/// failure here, not an auth one.
pub async fn signed_in_user(backend: &dyn Backend) -> Result<Option<AuthUser>> {
    match backend.get_user().await {
        Ok(user) => Ok(user),
        Err(AuthError::NotConfigured) => Err(BackendError::NotConfigured.into()),
        Err(e) => Err(e.into()),
    }
}

pub async fn current_user_id(backend: &dyn Backend) -> Result<String> {
    match signed_in_user(backend).await? {
        Some(user) => Ok(user.id),
        None => Err(AuthError::NotAuthenticated.into()),
    }
}
