use serde::{Deserialize, Serialize};

use super::institutions::get_institution;
use super::{current_user_id, signed_in_user, single, to_row, RowReader};
use crate::backend::{Backend, Filter, Row, Select, Table};
use crate::error::{BackendError, Result};
use crate::models::{Profile, Role};

/// Fields a user may change on their own profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub institution_id: Option<String>,
    pub avatar_url: Option<String>,
}

pub fn profile_from_row(row: &Row) -> Result<Profile, BackendError> {
    let r = RowReader::new(Table::Profiles, row);
    Ok(Profile {
        id: r.text("id")?,
        full_name: r.text("full_name")?,
        phone: r.opt_text("phone"),
        role: r.parsed("role", Role::parse)?,
        institution_id: r.opt_text("institution_id"),
        avatar_url: r.opt_text("avatar_url"),
        created_at: r.text("created_at")?,
        updated_at: r.text("updated_at")?,
        institution: None,
    })
}

async fn with_institution(backend: &dyn Backend, mut profile: Profile) -> Result<Profile> {
    if let Some(id) = profile.institution_id.as_deref() {
        profile.institution = get_institution(backend, id).await?;
    }
    Ok(profile)
}

/// Profile of the signed-in user, with its institution. `None` when nobody
/// is signed in.
pub async fn current_profile(backend: &dyn Backend) -> Result<Option<Profile>> {
    let Some(user) = signed_in_user(backend).await? else {
        return Ok(None);
    };
    let rows = backend
        .select(Select::from(Table::Profiles).eq("id", user.id.as_str()))
        .await?;
    let profile = profile_from_row(&single(Table::Profiles, rows)?)?;
    Ok(Some(with_institution(backend, profile).await?))
}

pub async fn update_profile(backend: &dyn Backend, updates: &ProfileUpdate) -> Result<Profile> {
    let user_id = current_user_id(backend).await?;
    let rows = backend
        .update(Table::Profiles, vec![Filter::eq("id", user_id)], to_row(updates)?)
        .await?;
    let profile = profile_from_row(&single(Table::Profiles, rows)?)?;
    with_institution(backend, profile).await
}

pub async fn profiles_by_institution(backend: &dyn Backend, institution_id: &str) -> Result<Vec<Profile>> {
    let rows = backend
        .select(
            Select::from(Table::Profiles)
                .eq("institution_id", institution_id)
                .order_by("full_name", true),
        )
        .await?;
    rows.iter()
        .map(|r| profile_from_row(r).map_err(Into::into))
        .collect()
}
