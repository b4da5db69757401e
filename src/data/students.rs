use std::collections::HashMap;

use serde_json::json;

use super::{column_values, single, RowReader};
use crate::backend::{Backend, Filter, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::{Enrollment, Role, Student, StudentStatus};

fn enrollment_from_row(row: &Row) -> Result<Enrollment, BackendError> {
    let r = RowReader::new(Table::ClassEnrollments, row);
    Ok(Enrollment {
        id: r.text("id")?,
        student_id: r.text("student_id")?,
        class_id: r.text("class_id")?,
        enrolled_at: r.text("enrolled_at")?,
        is_active: r.flag("is_active")?,
    })
}

fn student_from_parts(profile: &Row, enrollment: Option<&Enrollment>) -> Result<Student, BackendError> {
    let p = RowReader::new(Table::Profiles, profile);
    let phone = p.opt_text("phone");
    Ok(Student {
        id: p.text("id")?,
        full_name: p.text("full_name")?,
        parent_phone: phone.clone(),
        phone,
        class_id: enrollment.map(|e| e.class_id.clone()).unwrap_or_default(),
        enrollment_date: match enrollment {
            Some(e) => e.enrolled_at.clone(),
            None => p.text("created_at")?,
        },
        status: if enrollment.is_some_and(|e| e.is_active) {
            StudentStatus::Active
        } else {
            StudentStatus::Inactive
        },
    })
}

/// Every student profile, with its earliest active enrollment if any.
pub async fn list_students(backend: &dyn Backend) -> Result<Vec<Student>> {
    let profiles = backend
        .select(
            Select::from(Table::Profiles)
                .eq("role", Role::Student.as_str())
                .order_by("full_name", true),
        )
        .await?;
    let ids = column_values(&profiles, "id");
    let enrollment_rows = if ids.is_empty() {
        Vec::new()
    } else {
        backend
            .select(
                Select::from(Table::ClassEnrollments)
                    .filter(Filter::any_of("student_id", ids))
                    .eq("is_active", true)
                    .order_by("enrolled_at", true),
            )
            .await?
    };
    let mut first_enrollment: HashMap<String, Enrollment> = HashMap::new();
    for row in &enrollment_rows {
        let e = enrollment_from_row(row)?;
        first_enrollment.entry(e.student_id.clone()).or_insert(e);
    }
    profiles
        .iter()
        .map(|p| {
            let id = p.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            student_from_parts(p, first_enrollment.get(id)).map_err(Into::into)
        })
        .collect()
}

/// Students actively enrolled in `class_id`.
pub async fn students_by_class(backend: &dyn Backend, class_id: &str) -> Result<Vec<Student>> {
    let enrollment_rows = backend
        .select(
            Select::from(Table::ClassEnrollments)
                .eq("class_id", class_id)
                .eq("is_active", true)
                .order_by("enrolled_at", true),
        )
        .await?;
    let enrollments = enrollment_rows
        .iter()
        .map(enrollment_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    if enrollments.is_empty() {
        return Ok(Vec::new());
    }
    let profiles = backend
        .select(
            Select::from(Table::Profiles)
                .filter(Filter::any_of("id", enrollments.iter().map(|e| e.student_id.clone()))),
        )
        .await?;
    let by_id: HashMap<&str, &Row> = profiles
        .iter()
        .filter_map(|p| p.get("id").and_then(|v| v.as_str()).map(|id| (id, p)))
        .collect();
    let mut students = Vec::with_capacity(enrollments.len());
    for e in &enrollments {
        // An enrollment whose profile is gone is skipped.
        if let Some(profile) = by_id.get(e.student_id.as_str()) {
            students.push(student_from_parts(profile, Some(e))?);
        }
    }
    Ok(students)
}

/// Enroll, or re-activate a previous enrollment.
pub async fn enroll_student(backend: &dyn Backend, student_id: &str, class_id: &str) -> Result<Enrollment> {
    let row = json!({
        "student_id": student_id,
        "class_id": class_id,
        "is_active": true,
    });
    let rows = backend
        .upsert(
            Table::ClassEnrollments,
            vec![row.as_object().cloned().unwrap_or_default()],
            &["student_id", "class_id"],
        )
        .await?;
    Ok(enrollment_from_row(&single(Table::ClassEnrollments, rows)?)?)
}

pub async fn unenroll_student(backend: &dyn Backend, student_id: &str, class_id: &str) -> Result<Enrollment> {
    let mut patch = Row::new();
    patch.insert("is_active".to_string(), json!(false));
    let rows = backend
        .update(
            Table::ClassEnrollments,
            vec![Filter::eq("student_id", student_id), Filter::eq("class_id", class_id)],
            patch,
        )
        .await?;
    Ok(enrollment_from_row(&single(Table::ClassEnrollments, rows)?)?)
}
