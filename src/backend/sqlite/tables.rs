use chrono::Utc;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{ffi, params_from_iter, Connection};
use serde_json::{json, Value};
use uuid::Uuid;

use super::schema::{columns, Column, Fill, Kind};
use crate::backend::{Filter, Row, Select, Table};
use crate::error::BackendError;

pub fn map_sqlite(e: rusqlite::Error) -> BackendError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &e {
        let code = match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => "23505",
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => "23503",
            ffi::SQLITE_CONSTRAINT_NOTNULL => "23502",
            ffi::SQLITE_CONSTRAINT_CHECK => "23514",
            _ => "sqlite",
        };
        let message = message.clone().unwrap_or_else(|| e.to_string());
        return BackendError::request(code, message);
    }
    BackendError::request("sqlite", e.to_string())
}

fn column(table: Table, name: &str) -> Result<&'static Column, BackendError> {
    columns(table)
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| {
            BackendError::request(
                "42703",
                format!("column \"{}\" of relation \"{}\" does not exist", name, table.name()),
            )
        })
}

fn to_sql(table: Table, col: &Column, value: &Value) -> Result<SqlValue, BackendError> {
    let bad = || {
        BackendError::request(
            "22P02",
            format!("invalid input for {}.{}: {}", table.name(), col.name, value),
        )
    };
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    Ok(match col.kind {
        Kind::Text => SqlValue::Text(value.as_str().ok_or_else(bad)?.to_string()),
        Kind::Integer => SqlValue::Integer(value.as_i64().ok_or_else(bad)?),
        Kind::Real => SqlValue::Real(value.as_f64().ok_or_else(bad)?),
        Kind::Bool => SqlValue::Integer(i64::from(value.as_bool().ok_or_else(bad)?)),
        Kind::Json => SqlValue::Text(value.to_string()),
    })
}

fn from_sql(kind: Kind, value: ValueRef<'_>) -> Value {
    match (kind, value) {
        (_, ValueRef::Null) => Value::Null,
        (Kind::Bool, ValueRef::Integer(i)) => Value::Bool(i != 0),
        (Kind::Json, ValueRef::Text(t)) => {
            serde_json::from_slice(t).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(t).into()))
        }
        (_, ValueRef::Integer(i)) => json!(i),
        (_, ValueRef::Real(f)) => json!(f),
        (_, ValueRef::Text(t)) => Value::String(String::from_utf8_lossy(t).into_owned()),
        (_, ValueRef::Blob(_)) => Value::Null,
    }
}

fn fill_value(fill: Fill) -> Value {
    match fill {
        Fill::Uuid => json!(Uuid::new_v4().to_string()),
        Fill::Now => json!(Utc::now().to_rfc3339()),
        Fill::Today => json!(Utc::now().date_naive().to_string()),
        Fill::Bool(b) => json!(b),
        Fill::Int(i) => json!(i),
        Fill::Text(s) => json!(s),
    }
}

/// Apply column defaults for an insert.
fn with_defaults(table: Table, mut row: Row) -> Row {
    for c in columns(table) {
        if let Some(fill) = c.fill {
            if row.get(c.name).map_or(true, Value::is_null) {
                row.insert(c.name.to_string(), fill_value(fill));
            }
        }
    }
    row
}

fn where_clause(table: Table, filters: &[Filter]) -> Result<(String, Vec<SqlValue>), BackendError> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut parts = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    for f in filters {
        let c = column(table, f.column())?;
        match f {
            Filter::Eq(_, v) if v.is_null() => parts.push(format!("{} IS NULL", c.name)),
            Filter::Eq(_, v) => {
                parts.push(format!("{} = ?", c.name));
                params.push(to_sql(table, c, v)?);
            }
            Filter::In(_, vs) if vs.is_empty() => parts.push("1 = 0".to_string()),
            Filter::In(_, vs) => {
                let marks = vec!["?"; vs.len()].join(", ");
                parts.push(format!("{} IN ({})", c.name, marks));
                for v in vs {
                    params.push(to_sql(table, c, v)?);
                }
            }
            Filter::Gte(_, v) => {
                parts.push(format!("{} >= ?", c.name));
                params.push(to_sql(table, c, v)?);
            }
            Filter::Lte(_, v) => {
                parts.push(format!("{} <= ?", c.name));
                params.push(to_sql(table, c, v)?);
            }
        }
    }
    Ok((format!(" WHERE {}", parts.join(" AND ")), params))
}

pub fn select(conn: &Connection, query: &Select) -> Result<Vec<Row>, BackendError> {
    let table = query.table;
    let cols = columns(table);
    let names: Vec<&str> = cols.iter().map(|c| c.name).collect();
    let (where_sql, params) = where_clause(table, &query.filters)?;
    let mut sql = format!("SELECT {} FROM {}{}", names.join(", "), table.name(), where_sql);
    if let Some(order) = &query.order {
        let c = column(table, order.column)?;
        let dir = if order.ascending { "ASC" } else { "DESC" };
        // rowid keeps rows inserted within the same timestamp in insert order.
        sql.push_str(&format!(" ORDER BY {} {}, rowid {}", c.name, dir, dir));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql).map_err(map_sqlite)?;
    stmt.query_map(params_from_iter(params), |r| {
        let mut row = Row::new();
        for (i, c) in cols.iter().enumerate() {
            row.insert(c.name.to_string(), from_sql(c.kind, r.get_ref(i)?));
        }
        Ok(row)
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(map_sqlite)
}

fn by_ids(conn: &Connection, table: Table, ids: Vec<Value>) -> Result<Vec<Row>, BackendError> {
    let mut rows = select(conn, &Select::from(table).filter(Filter::In("id", ids.clone())))?;
    // Keep the caller's order.
    rows.sort_by_key(|r| ids.iter().position(|id| Some(id) == r.get("id")));
    Ok(rows)
}

fn bind_row(table: Table, row: &Row) -> Result<(Vec<&'static str>, Vec<SqlValue>), BackendError> {
    let mut names = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (k, v) in row {
        let c = column(table, k)?;
        names.push(c.name);
        values.push(to_sql(table, c, v)?);
    }
    Ok((names, values))
}

pub fn insert(conn: &Connection, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
    let tx = conn.unchecked_transaction().map_err(map_sqlite)?;
    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        let row = with_defaults(table, row);
        let (names, values) = bind_row(table, &row)?;
        let marks = vec!["?"; names.len()].join(", ");
        tx.execute(
            &format!("INSERT INTO {}({}) VALUES({})", table.name(), names.join(", "), marks),
            params_from_iter(values),
        )
        .map_err(map_sqlite)?;
        ids.push(row.get("id").cloned().unwrap_or(Value::Null));
    }
    tx.commit().map_err(map_sqlite)?;
    by_ids(conn, table, ids)
}

pub fn upsert(
    conn: &Connection,
    table: Table,
    rows: Vec<Row>,
    on_conflict: &[&'static str],
) -> Result<Vec<Row>, BackendError> {
    for name in on_conflict {
        column(table, name)?;
    }
    let tx = conn.unchecked_transaction().map_err(map_sqlite)?;
    let mut keys = Vec::with_capacity(rows.len());
    for row in rows {
        let supplied: Vec<String> = row.keys().cloned().collect();
        let row = with_defaults(table, row);
        let (names, values) = bind_row(table, &row)?;
        let marks = vec!["?"; names.len()].join(", ");
        // Only overwrite what the caller supplied, plus refreshed timestamps.
        let mut updates = Vec::new();
        for &name in &names {
            if name == "id" || name == "created_at" || on_conflict.contains(&name) {
                continue;
            }
            let refreshed = column(table, name)?.fill == Some(Fill::Now);
            if refreshed || supplied.iter().any(|s| s == name) {
                updates.push(format!("{name} = excluded.{name}"));
            }
        }
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        tx.execute(
            &format!(
                "INSERT INTO {}({}) VALUES({}) ON CONFLICT({}) {}",
                table.name(),
                names.join(", "),
                marks,
                on_conflict.join(", "),
                action
            ),
            params_from_iter(values),
        )
        .map_err(map_sqlite)?;
        keys.push(
            on_conflict
                .iter()
                .map(|c| Filter::Eq(c, row.get(*c).cloned().unwrap_or(Value::Null)))
                .collect::<Vec<_>>(),
        );
    }
    tx.commit().map_err(map_sqlite)?;

    let mut out = Vec::with_capacity(keys.len());
    for filters in keys {
        let mut q = Select::from(table);
        q.filters = filters;
        out.extend(select(conn, &q)?);
    }
    Ok(out)
}

fn matching_ids(conn: &Connection, table: Table, filters: &[Filter]) -> Result<Vec<Value>, BackendError> {
    let mut q = Select::from(table);
    q.filters = filters.to_vec();
    Ok(select(conn, &q)?
        .into_iter()
        .filter_map(|mut r| r.remove("id"))
        .collect())
}

fn require_filters(table: Table, filters: &[Filter], verb: &str) -> Result<(), BackendError> {
    if filters.is_empty() {
        return Err(BackendError::request(
            "21000",
            format!("{} on {} requires a WHERE clause", verb, table.name()),
        ));
    }
    Ok(())
}

pub fn update(
    conn: &Connection,
    table: Table,
    filters: &[Filter],
    mut patch: Row,
) -> Result<Vec<Row>, BackendError> {
    require_filters(table, filters, "UPDATE")?;
    patch.remove("id");
    if columns(table).iter().any(|c| c.name == "updated_at") && !patch.contains_key("updated_at") {
        patch.insert("updated_at".to_string(), fill_value(Fill::Now));
    }
    let ids = matching_ids(conn, table, filters)?;
    if ids.is_empty() || patch.is_empty() {
        return by_ids(conn, table, ids);
    }
    let (names, mut values) = bind_row(table, &patch)?;
    let sets: Vec<String> = names.iter().map(|n| format!("{n} = ?")).collect();
    let marks = vec!["?"; ids.len()].join(", ");
    for id in &ids {
        values.push(to_sql(table, column(table, "id")?, id)?);
    }
    conn.execute(
        &format!("UPDATE {} SET {} WHERE id IN ({})", table.name(), sets.join(", "), marks),
        params_from_iter(values),
    )
    .map_err(map_sqlite)?;
    by_ids(conn, table, ids)
}

pub fn delete(conn: &Connection, table: Table, filters: &[Filter]) -> Result<usize, BackendError> {
    require_filters(table, filters, "DELETE")?;
    let (where_sql, params) = where_clause(table, filters)?;
    conn.execute(
        &format!("DELETE FROM {}{}", table.name(), where_sql),
        params_from_iter(params),
    )
    .map_err(map_sqlite)
}
