use serde::{Deserialize, Serialize};

use super::{column_values, name_or_unknown, profile_names, single, to_row, RowReader};
use crate::backend::{Backend, Filter, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::{Resource, ResourceType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct NewResource {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub url: String,
    pub file_size: Option<i64>,
    pub class_id: String,
    pub uploaded_by: String,
}

fn resource_from_row(row: &Row, uploader_name: String) -> Result<Resource, BackendError> {
    let r = RowReader::new(Table::Resources, row);
    Ok(Resource {
        id: r.text("id")?,
        title: r.text("title")?,
        description: r.opt_text("description"),
        kind: r.parsed("type", ResourceType::parse)?,
        url: r.text("url")?,
        file_size: r.opt_int("file_size"),
        class_id: r.text("class_id")?,
        uploaded_by: r.text("uploaded_by")?,
        uploader_name,
        uploaded_at: r.text("uploaded_at")?,
    })
}

async fn with_uploaders(backend: &dyn Backend, rows: &[Row]) -> Result<Vec<Resource>> {
    let names = profile_names(backend, column_values(rows, "uploaded_by")).await?;
    rows.iter()
        .map(|row| {
            let by = row.get("uploaded_by").and_then(|v| v.as_str()).unwrap_or_default();
            resource_from_row(row, name_or_unknown(&names, by)).map_err(Into::into)
        })
        .collect()
}

/// Newest uploads first.
pub async fn resources_by_class(backend: &dyn Backend, class_id: &str) -> Result<Vec<Resource>> {
    let rows = backend
        .select(
            Select::from(Table::Resources)
                .eq("class_id", class_id)
                .order_by("uploaded_at", false),
        )
        .await?;
    with_uploaders(backend, &rows).await
}

pub async fn create_resource(backend: &dyn Backend, input: &NewResource) -> Result<Resource> {
    if input.title.trim().is_empty() || input.url.trim().is_empty() {
        return Err(BackendError::request("23502", "resource title and url are required").into());
    }
    let rows = backend.insert(Table::Resources, vec![to_row(input)?]).await?;
    let row = single(Table::Resources, rows)?;
    let mut out = with_uploaders(backend, std::slice::from_ref(&row)).await?;
    Ok(out.remove(0))
}

pub async fn delete_resource(backend: &dyn Backend, id: &str) -> Result<()> {
    backend
        .delete(Table::Resources, vec![Filter::eq("id", id)])
        .await?;
    Ok(())
}
