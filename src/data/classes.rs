use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{column_values, count_by, name_or_unknown, profile_names, single, to_row, RowReader};
use crate::backend::{Backend, Filter, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::Class;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct NewClass {
    pub name: String,
    pub subject: String,
    pub description: Option<String>,
    pub schedule: Option<String>,
    pub room_code: String,
    pub teacher_id: String,
    pub institution_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct ClassUpdate {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<String>,
    pub room_code: Option<String>,
    pub teacher_id: Option<String>,
    pub is_active: Option<bool>,
}

fn class_from_row(
    row: &Row,
    teacher_names: &HashMap<String, String>,
    student_counts: &HashMap<String, usize>,
) -> Result<Class, BackendError> {
    let r = RowReader::new(Table::Classes, row);
    let id = r.text("id")?;
    let teacher_id = r.text("teacher_id")?;
    Ok(Class {
        teacher_name: name_or_unknown(teacher_names, &teacher_id),
        student_count: student_counts.get(&id).copied().unwrap_or(0),
        id,
        name: r.text("name")?,
        subject: r.text("subject")?,
        description: r.opt_text("description"),
        teacher_id,
        institution_id: r.text("institution_id")?,
        room_code: r.text("room_code")?,
        schedule: r.opt_text("schedule"),
        is_active: r.flag("is_active")?,
        created_at: r.text("created_at")?,
        updated_at: r.text("updated_at")?,
    })
}

/// Fill teacher names and active-enrollment counts.
async fn hydrate(backend: &dyn Backend, rows: &[Row]) -> Result<Vec<Class>> {
    let teacher_names = profile_names(backend, column_values(rows, "teacher_id")).await?;
    let class_ids = column_values(rows, "id");
    let enrollments = if class_ids.is_empty() {
        Vec::new()
    } else {
        backend
            .select(
                Select::from(Table::ClassEnrollments)
                    .filter(Filter::any_of("class_id", class_ids))
                    .eq("is_active", true),
            )
            .await?
    };
    let counts = count_by(&enrollments, "class_id");
    rows.iter()
        .map(|row| class_from_row(row, &teacher_names, &counts).map_err(Into::into))
        .collect()
}

/// Active classes, newest first.
pub async fn list_classes(backend: &dyn Backend) -> Result<Vec<Class>> {
    let rows = backend
        .select(
            Select::from(Table::Classes)
                .eq("is_active", true)
                .order_by("created_at", false),
        )
        .await?;
    hydrate(backend, &rows).await
}

pub async fn get_class(backend: &dyn Backend, id: &str) -> Result<Option<Class>> {
    let rows = backend.select(Select::from(Table::Classes).eq("id", id)).await?;
    Ok(hydrate(backend, &rows).await?.into_iter().next())
}

pub async fn create_class(backend: &dyn Backend, input: &NewClass) -> Result<Class> {
    let rows = backend.insert(Table::Classes, vec![to_row(input)?]).await?;
    let row = single(Table::Classes, rows)?;
    single_class(hydrate(backend, &[row]).await?)
}

pub async fn update_class(backend: &dyn Backend, id: &str, updates: &ClassUpdate) -> Result<Class> {
    let rows = backend
        .update(Table::Classes, vec![Filter::eq("id", id)], to_row(updates)?)
        .await?;
    let row = single(Table::Classes, rows)?;
    single_class(hydrate(backend, &[row]).await?)
}

pub async fn delete_class(backend: &dyn Backend, id: &str) -> Result<()> {
    backend
        .delete(Table::Classes, vec![Filter::eq("id", id)])
        .await?;
    Ok(())
}

fn single_class(classes: Vec<Class>) -> Result<Class> {
    classes
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::NoRows { table: Table::Classes.name() }.into())
}
