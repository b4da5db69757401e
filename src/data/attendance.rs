use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{column_values, name_or_unknown, profile_names, signed_in_user, to_row, RowReader};
use crate::backend::{Backend, Filter, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::{AttendanceRecord, AttendanceStats, AttendanceStatus};

/// One student's mark for a class on a date. Re-marking the same
/// (student, class, date) replaces the earlier mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct AttendanceMark {
    pub student_id: String,
    pub class_id: String,
    /// `YYYY-MM-DD`; today when absent.
    pub date: Option<String>,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
    pub marked_by: Option<String>,
}

const CONFLICT_KEY: [&str; 3] = ["student_id", "class_id", "date"];

fn check_date(date: &str) -> Result<(), BackendError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| BackendError::request("22007", format!("invalid input syntax for type date: \"{date}\"")))
}

fn record_from_row(row: &Row, student_name: String) -> Result<AttendanceRecord, BackendError> {
    let r = RowReader::new(Table::AttendanceRecords, row);
    Ok(AttendanceRecord {
        id: r.text("id")?,
        student_id: r.text("student_id")?,
        student_name,
        class_id: r.text("class_id")?,
        date: r.text("date")?,
        status: r.parsed("status", AttendanceStatus::parse)?,
        marked_by: r.opt_text("marked_by"),
        notes: r.opt_text("notes"),
        marked_at: r.text("marked_at")?,
    })
}

async fn with_names(backend: &dyn Backend, rows: &[Row]) -> Result<Vec<AttendanceRecord>> {
    let names = profile_names(backend, column_values(rows, "student_id")).await?;
    rows.iter()
        .map(|row| {
            let student_id = row.get("student_id").and_then(|v| v.as_str()).unwrap_or_default();
            record_from_row(row, name_or_unknown(&names, student_id)).map_err(Into::into)
        })
        .collect()
}

/// Records for a class, optionally for one date, most recently marked first.
pub async fn attendance_by_class(
    backend: &dyn Backend,
    class_id: &str,
    date: Option<&str>,
) -> Result<Vec<AttendanceRecord>> {
    let mut query = Select::from(Table::AttendanceRecords).eq("class_id", class_id);
    if let Some(date) = date {
        check_date(date)?;
        query = query.eq("date", date);
    }
    let rows = backend.select(query.order_by("marked_at", false)).await?;
    with_names(backend, &rows).await
}

pub async fn mark_attendance(backend: &dyn Backend, marks: &[AttendanceMark]) -> Result<Vec<AttendanceRecord>> {
    if marks.is_empty() {
        return Ok(Vec::new());
    }
    let marker = signed_in_user(backend).await?.map(|u| u.id);
    let mut rows = Vec::with_capacity(marks.len());
    for mark in marks {
        if let Some(date) = mark.date.as_deref() {
            check_date(date)?;
        }
        let mut row = to_row(mark)?;
        if mark.marked_by.is_none() {
            if let Some(id) = &marker {
                row.insert("marked_by".to_string(), json!(id));
            }
        }
        rows.push(row);
    }
    let saved = backend
        .upsert(Table::AttendanceRecords, rows, &CONFLICT_KEY)
        .await?;
    with_names(backend, &saved).await
}

/// Counts by status over an optional inclusive date range.
pub async fn attendance_stats(
    backend: &dyn Backend,
    class_id: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<AttendanceStats> {
    let mut query = Select::from(Table::AttendanceRecords).eq("class_id", class_id);
    if let Some(start) = start_date {
        check_date(start)?;
        query = query.filter(Filter::Gte("date", json!(start)));
    }
    if let Some(end) = end_date {
        check_date(end)?;
        query = query.filter(Filter::Lte("date", json!(end)));
    }
    let rows = backend.select(query).await?;
    let mut stats = AttendanceStats {
        total: rows.len(),
        ..AttendanceStats::default()
    };
    for row in &rows {
        match RowReader::new(Table::AttendanceRecords, row).parsed("status", AttendanceStatus::parse)? {
            AttendanceStatus::Present => stats.present += 1,
            AttendanceStatus::Absent => stats.absent += 1,
            AttendanceStatus::Late => stats.late += 1,
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::classes::tests::seed_class;
    use crate::data::fixtures;
    use crate::data::students::enroll_student;
    use crate::models::Role;

    fn mark(student: &str, class: &str, date: &str, status: AttendanceStatus) -> AttendanceMark {
        AttendanceMark {
            student_id: student.to_string(),
            class_id: class.to_string(),
            date: Some(date.to_string()),
            status,
            notes: None,
            marked_by: None,
        }
    }

    #[tokio::test]
    async fn marking_twice_overwrites_the_same_record() {
        let backend = fixtures::backend();
        let teacher = fixtures::register(backend.as_ref(), "t@x.io", "Tara", Role::Teacher).await;
        let sam = fixtures::register(backend.as_ref(), "s@x.io", "Sam", Role::Student).await;
        let class = seed_class(backend.as_ref(), &teacher).await;
        enroll_student(backend.as_ref(), &sam, &class.id).await.expect("enroll");

        let first = mark_attendance(
            backend.as_ref(),
            &[mark(&sam, &class.id, "2024-09-02", AttendanceStatus::Absent)],
        )
        .await
        .expect("first");
        let second = mark_attendance(
            backend.as_ref(),
            &[mark(&sam, &class.id, "2024-09-02", AttendanceStatus::Late)],
        )
        .await
        .expect("second");
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].student_name, "Sam");
        // The last sign-up (Sam) is the signed-in user and is recorded as marker.
        assert_eq!(second[0].marked_by.as_deref(), Some(sam.as_str()));

        let records = attendance_by_class(backend.as_ref(), &class.id, Some("2024-09-02"))
            .await
            .expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn stats_respect_the_date_range() {
        let backend = fixtures::backend();
        let teacher = fixtures::register(backend.as_ref(), "t@x.io", "Tara", Role::Teacher).await;
        let sam = fixtures::register(backend.as_ref(), "s@x.io", "Sam", Role::Student).await;
        let class = seed_class(backend.as_ref(), &teacher).await;
        mark_attendance(
            backend.as_ref(),
            &[
                mark(&sam, &class.id, "2024-09-01", AttendanceStatus::Present),
                mark(&sam, &class.id, "2024-09-02", AttendanceStatus::Late),
                mark(&sam, &class.id, "2024-09-03", AttendanceStatus::Absent),
            ],
        )
        .await
        .expect("mark");

        let all = attendance_stats(backend.as_ref(), &class.id, None, None).await.expect("all");
        assert_eq!(all, AttendanceStats { present: 1, absent: 1, late: 1, total: 3 });
        let window = attendance_stats(backend.as_ref(), &class.id, Some("2024-09-02"), Some("2024-09-03"))
            .await
            .expect("window");
        assert_eq!(window, AttendanceStats { present: 0, absent: 1, late: 1, total: 2 });
    }

    #[tokio::test]
    async fn malformed_dates_are_rejected_before_the_request() {
        let backend = fixtures::backend();
        let e = attendance_by_class(backend.as_ref(), "c", Some("02/09/2024"))
            .await
            .expect_err("date");
        assert!(e.to_string().contains("invalid input syntax for type date"));
    }
}
