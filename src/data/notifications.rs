use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{current_user_id, single, to_row, RowReader};
use crate::backend::{Backend, Filter, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::Notification;

const INBOX_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub recipient_id: String,
    pub class_id: Option<String>,
}

fn notification_from_row(row: &Row) -> Result<Notification, BackendError> {
    let r = RowReader::new(Table::Notifications, row);
    Ok(Notification {
        id: r.text("id")?,
        title: r.text("title")?,
        message: r.text("message")?,
        kind: r.text("type")?,
        recipient_id: r.text("recipient_id")?,
        class_id: r.opt_text("class_id"),
        is_read: r.flag("is_read")?,
        created_at: r.text("created_at")?,
    })
}

/// The signed-in user's inbox, newest first.
pub async fn notifications(backend: &dyn Backend) -> Result<Vec<Notification>> {
    let me = current_user_id(backend).await?;
    let rows = backend
        .select(
            Select::from(Table::Notifications)
                .eq("recipient_id", me)
                .order_by("created_at", false)
                .limit(INBOX_LIMIT),
        )
        .await?;
    rows.iter()
        .map(|r| notification_from_row(r).map_err(Into::into))
        .collect()
}

pub async fn mark_notification_read(backend: &dyn Backend, id: &str) -> Result<Notification> {
    let mut patch = Row::new();
    patch.insert("is_read".to_string(), json!(true));
    let rows = backend
        .update(Table::Notifications, vec![Filter::eq("id", id)], patch)
        .await?;
    Ok(notification_from_row(&single(Table::Notifications, rows)?)?)
}

pub async fn create_notification(backend: &dyn Backend, input: &NewNotification) -> Result<Notification> {
    let rows = backend.insert(Table::Notifications, vec![to_row(input)?]).await?;
    Ok(notification_from_row(&single(Table::Notifications, rows)?)?)
}
