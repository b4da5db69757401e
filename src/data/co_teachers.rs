use serde_json::json;

use super::{column_values, current_user_id, name_or_unknown, profile_names, single, RowReader};
use crate::backend::{Backend, Filter, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::{CoTeacher, CoTeacherPermissions};

fn co_teacher_from_row(row: &Row, teacher_name: String) -> Result<CoTeacher, BackendError> {
    let r = RowReader::new(Table::CoTeachers, row);
    let permissions = serde_json::from_value(r.value("permissions"))
        .map_err(|_| BackendError::malformed("co_teachers", "permissions"))?;
    Ok(CoTeacher {
        id: r.text("id")?,
        class_id: r.text("class_id")?,
        teacher_id: r.text("teacher_id")?,
        teacher_name,
        added_by: r.text("added_by")?,
        permissions,
        added_at: r.text("added_at")?,
    })
}

async fn with_names(backend: &dyn Backend, rows: &[Row]) -> Result<Vec<CoTeacher>> {
    let names = profile_names(backend, column_values(rows, "teacher_id")).await?;
    rows.iter()
        .map(|row| {
            let id = row.get("teacher_id").and_then(|v| v.as_str()).unwrap_or_default();
            co_teacher_from_row(row, name_or_unknown(&names, id)).map_err(Into::into)
        })
        .collect()
}

pub async fn co_teachers_by_class(backend: &dyn Backend, class_id: &str) -> Result<Vec<CoTeacher>> {
    let rows = backend
        .select(
            Select::from(Table::CoTeachers)
                .eq("class_id", class_id)
                .order_by("added_at", true),
        )
        .await?;
    with_names(backend, &rows).await
}

/// Adds (or re-grants) a co-teacher on behalf of the signed-in user.
pub async fn add_co_teacher(
    backend: &dyn Backend,
    class_id: &str,
    teacher_id: &str,
    permissions: CoTeacherPermissions,
) -> Result<CoTeacher> {
    let added_by = current_user_id(backend).await?;
    let row = json!({
        "class_id": class_id,
        "teacher_id": teacher_id,
        "added_by": added_by,
        "permissions": permissions,
    });
    let rows = backend
        .upsert(
            Table::CoTeachers,
            vec![row.as_object().cloned().unwrap_or_default()],
            &["class_id", "teacher_id"],
        )
        .await?;
    let row = single(Table::CoTeachers, rows)?;
    let mut out = with_names(backend, std::slice::from_ref(&row)).await?;
    Ok(out.remove(0))
}

pub async fn remove_co_teacher(backend: &dyn Backend, class_id: &str, teacher_id: &str) -> Result<()> {
    backend
        .delete(
            Table::CoTeachers,
            vec![Filter::eq("class_id", class_id), Filter::eq("teacher_id", teacher_id)],
        )
        .await?;
    Ok(())
}
