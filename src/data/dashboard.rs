use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;

use crate::backend::{Backend, Filter, Select, Table};
use crate::error::Result;
use crate::models::{AttendanceStatus, DashboardStats, Role};

/// Headline counts for the home screen. `today` decides which attendance
/// marks count; tests starting at or after `now` are upcoming.
pub async fn dashboard_stats(
    backend: &dyn Backend,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<DashboardStats> {
    let classes = backend
        .select(Select::from(Table::Classes).eq("is_active", true))
        .await?;
    let students = backend
        .select(Select::from(Table::Profiles).eq("role", Role::Student.as_str()))
        .await?;
    let attended = backend
        .select(
            Select::from(Table::AttendanceRecords)
                .eq("date", today.to_string())
                .filter(Filter::any_of(
                    "status",
                    [AttendanceStatus::Present.as_str(), AttendanceStatus::Late.as_str()],
                )),
        )
        .await?;
    let upcoming = backend
        .select(Select::from(Table::Tests).filter(Filter::Gte("start_time", json!(now.to_rfc3339()))))
        .await?;

    Ok(DashboardStats {
        total_classes: classes.len(),
        total_students: students.len(),
        today_attendance: attended.len(),
        upcoming_tests: upcoming.len(),
    })
}
