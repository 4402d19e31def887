//! Live schema introspection
//!
//! Read-only queries against `information_schema` and `pg_catalog` of the
//! database the client is connected to.

use super::types::{normalize_type, CanonicalType, ColumnDefinition};
use crate::db::queries::{self, SqlBuilder};
use serde::Serialize;
use tokio_postgres::{Error, GenericClient, Row};

/// A foreign key as it exists in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveForeignKey {
    pub name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_update: String,
    pub on_delete: String,
}

/// Everything the validator needs to know about one live table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTable {
    pub columns: Vec<ColumnDefinition>,
    pub foreign_keys: Vec<LiveForeignKey>,
    pub record_count: i64,
}

impl LiveTable {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_foreign_key(&self, name: &str) -> bool {
        self.foreign_keys.iter().any(|fk| fk.name == name)
    }
}

fn column_from_row(row: &Row) -> ColumnDefinition {
    let data_type: String = row.get("data_type");
    let udt_name: String = row.get("udt_name");
    let is_enum: bool = row.get("is_enum");
    let default: Option<String> = row.get("column_default");
    let is_identity: bool = row.get("is_identity");
    let max_length: Option<i32> = row.get("max_length");

    let canonical = if is_enum {
        CanonicalType::Enum
    } else if data_type == "USER-DEFINED" {
        CanonicalType::Other(udt_name.clone())
    } else {
        normalize_type(&data_type)
    };

    let autoincrement = is_identity
        || default
            .as_deref()
            .is_some_and(|d| d.trim_start().starts_with("nextval("));

    ColumnDefinition {
        name: row.get("column_name"),
        data_type: canonical,
        raw_type: if data_type == "USER-DEFINED" { udt_name } else { data_type },
        length: max_length.and_then(|l| u32::try_from(l).ok()),
        nullable: row.get("nullable"),
        default,
        unsigned: false,
        autoincrement,
        comment: row.get("comment"),
    }
}

pub async fn table_exists<C: GenericClient>(client: &C, table: &str) -> Result<bool, Error> {
    let row = client.query_one(queries::TABLE_EXISTS, &[&table]).await?;
    Ok(row.get("exists"))
}

pub async fn column_exists<C: GenericClient>(client: &C, table: &str, column: &str) -> Result<bool, Error> {
    let row = client.query_one(queries::COLUMN_EXISTS, &[&table, &column]).await?;
    Ok(row.get("exists"))
}

/// Normalized definition of one column, `None` if it does not exist
pub async fn get_column_definition<C: GenericClient>(
    client: &C,
    table: &str,
    column: &str,
) -> Result<Option<ColumnDefinition>, Error> {
    let column: Option<&str> = Some(column);
    let row = client.query_opt(queries::TABLE_COLUMNS, &[&table, &column]).await?;
    Ok(row.as_ref().map(column_from_row))
}

pub async fn table_columns<C: GenericClient>(client: &C, table: &str) -> Result<Vec<ColumnDefinition>, Error> {
    let all: Option<&str> = None;
    let rows = client.query(queries::TABLE_COLUMNS, &[&table, &all]).await?;
    Ok(rows.iter().map(column_from_row).collect())
}

pub async fn table_foreign_keys<C: GenericClient>(client: &C, table: &str) -> Result<Vec<LiveForeignKey>, Error> {
    let rows = client.query(queries::TABLE_FOREIGN_KEYS, &[&table]).await?;
    Ok(rows
        .iter()
        .map(|row| LiveForeignKey {
            name: row.get("constraint_name"),
            column: row.get::<_, Option<String>>("column_name").unwrap_or_default(),
            referenced_table: row.get("referenced_table"),
            referenced_column: row.get::<_, Option<String>>("referenced_column").unwrap_or_default(),
            on_update: row.get("on_update"),
            on_delete: row.get("on_delete"),
        })
        .collect())
}

pub async fn count_rows<C: GenericClient>(client: &C, table: &str) -> Result<i64, Error> {
    let row = client.query_one(&SqlBuilder::count_rows(table), &[]).await?;
    Ok(row.get("total"))
}

/// Snapshot of a table, `None` when it does not exist
pub async fn snapshot_table<C: GenericClient>(client: &C, table: &str) -> Result<Option<LiveTable>, Error> {
    if !table_exists(client, table).await? {
        return Ok(None);
    }
    Ok(Some(LiveTable {
        columns: table_columns(client, table).await?,
        foreign_keys: table_foreign_keys(client, table).await?,
        record_count: count_rows(client, table).await?,
    }))
}
