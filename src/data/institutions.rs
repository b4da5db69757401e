use serde::{Deserialize, Serialize};

use super::{single, to_row, RowReader};
use crate::backend::{Backend, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::Institution;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct NewInstitution {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub owner_id: Option<String>,
}

fn institution_from_row(row: &Row) -> Result<Institution, BackendError> {
    let r = RowReader::new(Table::Institutions, row);
    Ok(Institution {
        id: r.text("id")?,
        name: r.text("name")?,
        address: r.opt_text("address"),
        phone: r.opt_text("phone"),
        email: r.opt_text("email"),
        owner_id: r.opt_text("owner_id"),
        created_at: r.text("created_at")?,
        updated_at: r.text("updated_at")?,
    })
}

pub async fn create_institution(backend: &dyn Backend, input: &NewInstitution) -> Result<Institution> {
    let rows = backend
        .insert(Table::Institutions, vec![to_row(input)?])
        .await?;
    Ok(institution_from_row(&single(Table::Institutions, rows)?)?)
}

pub async fn get_institution(backend: &dyn Backend, id: &str) -> Result<Option<Institution>> {
    let rows = backend
        .select(Select::from(Table::Institutions).eq("id", id))
        .await?;
    rows.first()
        .map(institution_from_row)
        .transpose()
        .map_err(Into::into)
}
