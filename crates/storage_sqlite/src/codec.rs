use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use core_types::{Metadata, ParseEnumError};
use rusqlite::{Connection, Params, Row};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Same shape the column defaults produce, so stored timestamps sort as text.
pub(crate) fn format_date(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_date(column: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt {
            column,
            detail: format!("invalid datetime `{value}`: {err}"),
        })
}

pub(crate) fn parse_uuid(column: &'static str, value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|err| StoreError::Corrupt {
        column,
        detail: format!("invalid uuid `{value}`: {err}"),
    })
}

pub(crate) fn parse_metadata(column: &'static str, value: &str) -> StoreResult<Metadata> {
    serde_json::from_str(value).map_err(|err| StoreError::Corrupt {
        column,
        detail: format!("invalid json object: {err}"),
    })
}

pub(crate) fn encode_metadata(value: &Metadata) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn parse_enum<T>(column: &'static str, value: &str) -> StoreResult<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    value.parse().map_err(|err: ParseEnumError| StoreError::Corrupt {
        column,
        detail: err.to_string(),
    })
}

pub(crate) fn get_uuid(row: &Row<'_>, column: &'static str) -> StoreResult<Uuid> {
    parse_uuid(column, &row.get::<_, String>(column)?)
}

pub(crate) fn get_date(row: &Row<'_>, column: &'static str) -> StoreResult<DateTime<Utc>> {
    parse_date(column, &row.get::<_, String>(column)?)
}

pub(crate) fn get_opt_date(
    row: &Row<'_>,
    column: &'static str,
) -> StoreResult<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(column)?
        .map(|value| parse_date(column, &value))
        .transpose()
}

pub(crate) fn get_metadata(row: &Row<'_>, column: &'static str) -> StoreResult<Metadata> {
    parse_metadata(column, &row.get::<_, String>(column)?)
}

pub(crate) fn get_opt_metadata(
    row: &Row<'_>,
    column: &'static str,
) -> StoreResult<Option<Metadata>> {
    row.get::<_, Option<String>>(column)?
        .map(|value| parse_metadata(column, &value))
        .transpose()
}

pub(crate) fn get_enum<T>(row: &Row<'_>, column: &'static str) -> StoreResult<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    parse_enum(column, &row.get::<_, String>(column)?)
}

pub(crate) fn query_all<T, P>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: impl Fn(&Row<'_>) -> StoreResult<T>,
) -> StoreResult<Vec<T>>
where
    P: Params,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut output = Vec::new();
    while let Some(row) = rows.next()? {
        output.push(map(row)?);
    }
    Ok(output)
}

pub(crate) fn query_optional<T, P>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: impl Fn(&Row<'_>) -> StoreResult<T>,
) -> StoreResult<Option<T>>
where
    P: Params,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(map(row)?)),
        None => Ok(None),
    }
}

pub(crate) fn count(conn: &Connection, table: &str, column: &str, id: &str) -> StoreResult<u64> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1");
    let rows: i64 = conn.query_row(&sql, [id], |row| row.get(0))?;
    Ok(rows.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_dates_match_sqlite_default_shape() {
        let value = DateTime::parse_from_rfc3339("2025-03-04T05:06:07.089Z")
            .expect("parse")
            .with_timezone(&Utc);
        assert_eq!(format_date(&value), "2025-03-04T05:06:07.089Z");
        assert_eq!(parse_date("t", "2025-03-04T05:06:07.089Z").expect("roundtrip"), value);
    }

    #[test]
    fn corrupt_uuid_names_column() {
        let err = parse_uuid("slides.id", "nope").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { column: "slides.id", .. }));
    }
}
