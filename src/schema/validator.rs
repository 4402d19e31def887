//! Schema validation: live table vs expected declaration

use super::expected::{ExpectedSchema, TableSchema};
use super::introspect::{snapshot_table, LiveTable};
use super::types::{compare_column_definitions, ColumnDiff};
use tokio_postgres::GenericClient;
use serde::Serialize;
use tracing::debug;

/// A present column whose definition diverges
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDifference {
    pub column: String,
    #[serde(flatten)]
    pub diff: ColumnDiff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaValidationResult {
    pub table: String,
    pub exists: bool,
    pub missing_columns: Vec<String>,
    pub different_columns: Vec<ColumnDifference>,
    pub missing_foreign_keys: Vec<String>,
    pub has_data: bool,
    pub record_count: i64,
}

impl SchemaValidationResult {
    pub fn is_valid(&self) -> bool {
        self.exists
            && self.missing_columns.is_empty()
            && self.different_columns.is_empty()
            && self.missing_foreign_keys.is_empty()
    }
}

/// Diff an expected table against its live snapshot (`None` = missing).
///
/// Live columns and constraints that are not declared are ignored.
pub fn diff_table(table: &str, expected: &TableSchema, live: Option<&LiveTable>) -> SchemaValidationResult {
    let Some(live) = live else {
        return SchemaValidationResult {
            table: table.to_string(),
            exists: false,
            missing_columns: expected.columns.iter().map(|c| c.name.clone()).collect(),
            different_columns: Vec::new(),
            missing_foreign_keys: expected.foreign_keys.iter().map(|fk| fk.name.clone()).collect(),
            has_data: false,
            record_count: 0,
        };
    };

    let mut missing_columns = Vec::new();
    let mut different_columns = Vec::new();
    for spec in &expected.columns {
        match live.column(&spec.name) {
            None => missing_columns.push(spec.name.clone()),
            Some(actual) => {
                let diff = compare_column_definitions(spec, actual);
                if !diff.is_empty() {
                    different_columns.push(ColumnDifference {
                        column: spec.name.clone(),
                        diff,
                    });
                }
            }
        }
    }

    let missing_foreign_keys = expected
        .foreign_keys
        .iter()
        .filter(|fk| !live.has_foreign_key(&fk.name))
        .map(|fk| fk.name.clone())
        .collect();

    SchemaValidationResult {
        table: table.to_string(),
        exists: true,
        missing_columns,
        different_columns,
        missing_foreign_keys,
        has_data: live.record_count > 0,
        record_count: live.record_count,
    }
}

pub async fn validate_table_schema<C: GenericClient>(
    client: &C,
    table: &str,
    expected: &TableSchema,
) -> Result<SchemaValidationResult, tokio_postgres::Error> {
    let live = snapshot_table(client, table).await?;
    let result = diff_table(table, expected, live.as_ref());
    debug!(
        table = %table,
        exists = result.exists,
        missing = result.missing_columns.len(),
        different = result.different_columns.len(),
        "Validated table"
    );
    Ok(result)
}

/// Validate every table of an expected schema, in declaration order
pub async fn validate_schema<C: GenericClient>(
    client: &C,
    expected: &ExpectedSchema,
) -> Result<Vec<SchemaValidationResult>, tokio_postgres::Error> {
    let mut results = Vec::with_capacity(expected.len());
    for (table, schema) in expected.tables() {
        results.push(validate_table_schema(client, table, schema).await?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::expected::{ColumnKind, ColumnSpec};
    use crate::schema::introspect::LiveForeignKey;
    use crate::schema::types::{normalize_type, ColumnDefinition};
    use pretty_assertions::assert_eq;

    fn live_column(name: &str, raw: &str, nullable: bool) -> ColumnDefinition {
        ColumnDefinition {
            name: name.to_string(),
            data_type: normalize_type(raw),
            raw_type: raw.to_string(),
            length: None,
            nullable,
            default: None,
            unsigned: false,
            autoincrement: false,
            comment: None,
        }
    }

    fn vaccinations() -> TableSchema {
        TableSchema::new()
            .column(ColumnSpec::new("id", ColumnKind::BigInteger).autoincrement())
            .column(ColumnSpec::new("patient_id", ColumnKind::BigInteger))
            .column(ColumnSpec::new("vaccine_name", ColumnKind::String { length: Some(120) }))
            .column(ColumnSpec::new("lot_number", ColumnKind::String { length: None }).nullable())
            .foreign_key("vaccinations_patient_id_foreign", "patient_id", "patients", "id")
    }

    #[test]
    fn test_missing_table_reports_everything_missing() {
        let result = diff_table("vaccinations", &vaccinations(), None);
        assert!(!result.exists);
        assert_eq!(result.missing_columns.len(), 4);
        assert_eq!(result.missing_foreign_keys, vec!["vaccinations_patient_id_foreign"]);
        assert!(!result.is_valid());
    }

    #[test]
    fn test_reports_only_the_missing_column() {
        let live = LiveTable {
            columns: vec![
                live_column("id", "bigint", false),
                live_column("patient_id", "bigint", false),
                live_column("vaccine_name", "character varying", false),
                live_column("legacy_code", "text", true),
            ],
            foreign_keys: vec![LiveForeignKey {
                name: "vaccinations_patient_id_foreign".to_string(),
                column: "patient_id".to_string(),
                referenced_table: "patients".to_string(),
                referenced_column: "id".to_string(),
                on_update: "NO ACTION".to_string(),
                on_delete: "CASCADE".to_string(),
            }],
            record_count: 3,
        };

        let result = diff_table("vaccinations", &vaccinations(), Some(&live));
        assert!(result.exists);
        assert_eq!(result.missing_columns, vec!["lot_number"]);
        assert!(result.different_columns.is_empty());
        assert!(result.missing_foreign_keys.is_empty());
        assert!(result.has_data);
        assert_eq!(result.record_count, 3);
    }

    #[test]
    fn test_reports_diverging_columns() {
        let live = LiveTable {
            columns: vec![
                live_column("id", "bigint", false),
                live_column("patient_id", "integer", false),
                live_column("vaccine_name", "character varying", true),
                live_column("lot_number", "character varying", true),
            ],
            foreign_keys: Vec::new(),
            record_count: 0,
        };

        let result = diff_table("vaccinations", &vaccinations(), Some(&live));
        let columns: Vec<&str> = result.different_columns.iter().map(|d| d.column.as_str()).collect();
        assert_eq!(columns, vec!["patient_id", "vaccine_name"]);
        assert_eq!(result.missing_foreign_keys, vec!["vaccinations_patient_id_foreign"]);
        assert!(!result.has_data);
    }
}
