//! Smart migrator: additive convergence of a live table towards its
//! expected declaration.
//!
//! Only creates tables, adds columns and adds foreign keys. Nothing is ever
//! dropped, renamed or narrowed, so running it twice is a no-op.

use crate::error::MigrationError;
use crate::schema::introspect::{snapshot_table, LiveTable};
use crate::schema::{DdlGenerator, ExpectedSchema, TableSchema};
use deadpool_postgres::Client;
use serde::Serialize;
use tracing::{error, info, warn};

/// Produces the statements that create a missing table
pub trait TableCreator {
    fn create_statements(&self, table: &str) -> Vec<String>;
}

impl TableCreator for TableSchema {
    fn create_statements(&self, table: &str) -> Vec<String> {
        DdlGenerator::create_table(table, self)
    }
}

impl<F> TableCreator for F
where
    F: Fn(&str) -> Vec<String>,
{
    fn create_statements(&self, table: &str) -> Vec<String> {
        self(table)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    pub table: String,
    pub created: bool,
    pub modified: bool,
    pub added_columns: Vec<String>,
    pub added_foreign_keys: Vec<String>,
    pub errors: Vec<MigrationError>,
    /// Statements executed, or that would be executed on a dry run
    pub statements: Vec<String>,
}

impl MigrationOutcome {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        !self.statements.is_empty()
    }

    fn failed(table: &str, message: String) -> Self {
        let mut outcome = Self::new(table);
        outcome.errors.push(MigrationError::Generic {
            table: table.to_string(),
            message,
        });
        outcome
    }
}

/// Plan the changes that converge `live` (`None` = missing table) towards
/// `expected`, without touching the database.
///
/// A missing column that a populated table cannot accept (not null, no
/// default) is rejected as unsafe, and foreign keys on rejected columns are
/// skipped. Every other addition is still planned.
pub fn plan<T: TableCreator + ?Sized>(
    table: &str,
    expected: &TableSchema,
    live: Option<&LiveTable>,
    create_table: &T,
) -> MigrationOutcome {
    let mut outcome = MigrationOutcome::new(table);

    let Some(live) = live else {
        outcome.created = true;
        outcome.statements = create_table.create_statements(table);
        return outcome;
    };

    let mut rejected: Vec<&str> = Vec::new();
    for spec in expected.columns.iter().filter(|c| live.column(&c.name).is_none()) {
        if live.record_count > 0 && spec.requires_backfill() {
            outcome.errors.push(MigrationError::Unsafe {
                table: table.to_string(),
                column: spec.name.clone(),
            });
            rejected.push(&spec.name);
            continue;
        }
        outcome.statements.extend(DdlGenerator::add_column(table, spec));
        outcome.added_columns.push(spec.name.clone());
    }

    for fk in expected.foreign_keys.iter().filter(|fk| !live.has_foreign_key(&fk.name)) {
        if rejected.contains(&fk.column.as_str()) {
            outcome.errors.push(MigrationError::Generic {
                table: table.to_string(),
                message: format!(
                    "foreign key '{}' skipped because column '{}' was not added",
                    fk.name, fk.column
                ),
            });
            continue;
        }
        outcome.statements.push(DdlGenerator::add_foreign_key(table, fk));
        outcome.added_foreign_keys.push(fk.name.clone());
    }

    outcome.modified = !outcome.statements.is_empty();
    outcome
}

async fn migrate_table<T: TableCreator + ?Sized>(
    client: &mut Client,
    table: &str,
    expected: &TableSchema,
    create_table: &T,
    dry_run: bool,
) -> Result<MigrationOutcome, tokio_postgres::Error> {
    let tx = client.transaction().await?;
    let live = snapshot_table(&*tx, table).await?;
    let outcome = plan(table, expected, live.as_ref(), create_table);

    if dry_run || !outcome.has_changes() {
        tx.rollback().await?;
        return Ok(outcome);
    }

    for statement in &outcome.statements {
        tx.batch_execute(statement).await?;
    }
    tx.commit().await?;
    Ok(outcome)
}

async fn converge_table<T: TableCreator + ?Sized>(
    client: &mut Client,
    table: &str,
    expected: &TableSchema,
    create_table: &T,
    dry_run: bool,
) -> MigrationOutcome {
    match migrate_table(client, table, expected, create_table, dry_run).await {
        Ok(outcome) => {
            for err in &outcome.errors {
                warn!(table = %table, "{}", err);
            }
            if outcome.created && !dry_run {
                info!(table = %table, "🆕 Created table");
            } else if outcome.modified && !dry_run {
                info!(
                    table = %table,
                    columns = ?outcome.added_columns,
                    foreign_keys = ?outcome.added_foreign_keys,
                    "🔧 Converged table"
                );
            }
            outcome
        }
        Err(e) => {
            // the transaction was dropped, so nothing of this table persisted
            error!(table = %table, error = %e, "Table migration rolled back");
            MigrationOutcome::failed(table, e.to_string())
        }
    }
}

/// Converge one table. Creates it when missing, otherwise adds the missing
/// columns and foreign keys in one transaction. Failures are recorded in
/// the outcome, never returned.
pub async fn apply_smart_migration<T: TableCreator + ?Sized>(
    client: &mut Client,
    table: &str,
    expected: &TableSchema,
    create_table: &T,
) -> MigrationOutcome {
    converge_table(client, table, expected, create_table, false).await
}

/// Converge (or, with `dry_run`, plan) every table of `expected` in
/// declaration order. A failing table does not stop the others.
pub async fn converge_schema(client: &mut Client, expected: &ExpectedSchema, dry_run: bool) -> Vec<MigrationOutcome> {
    let mut outcomes = Vec::with_capacity(expected.len());
    for (table, definition) in expected.tables() {
        outcomes.push(converge_table(client, table, definition, definition, dry_run).await);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::expected::{ColumnDefault, ColumnKind, ColumnSpec};
    use crate::schema::introspect::LiveForeignKey;
    use crate::schema::types::{normalize_type, ColumnDefinition};
    use pretty_assertions::assert_eq;

    fn live_column(name: &str, raw: &str) -> ColumnDefinition {
        ColumnDefinition {
            name: name.to_string(),
            data_type: normalize_type(raw),
            raw_type: raw.to_string(),
            length: None,
            nullable: false,
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
            .column(ColumnSpec::new("lot_number", ColumnKind::String { length: Some(50) }).nullable())
            .column(ColumnSpec::new("verified", ColumnKind::Boolean).default_value(ColumnDefault::Bool(false)))
            .column(ColumnSpec::new("batch_code", ColumnKind::String { length: None }))
            .foreign_key("vaccinations_patient_id_foreign", "patient_id", "patients", "id")
    }

    fn live(record_count: i64, columns: &[&str]) -> LiveTable {
        LiveTable {
            columns: columns.iter().map(|c| live_column(c, "bigint")).collect(),
            foreign_keys: Vec::new(),
            record_count,
        }
    }

    #[test]
    fn test_missing_table_uses_creator() {
        let creator = |table: &str| vec![format!("CREATE TABLE {} ()", table)];
        let outcome = plan("vaccinations", &vaccinations(), None, &creator);
        assert!(outcome.created);
        assert_eq!(outcome.statements, vec!["CREATE TABLE vaccinations ()"]);
    }

    #[test]
    fn test_missing_table_from_declaration() {
        let schema = vaccinations();
        let outcome = plan("vaccinations", &schema, None, &schema);
        assert!(outcome.created);
        assert!(outcome.statements.iter().any(|s| s.starts_with("CREATE TABLE \"vaccinations\"")));
    }

    #[test]
    fn test_empty_table_accepts_every_column() {
        let schema = vaccinations();
        let outcome = plan("vaccinations", &schema, Some(&live(0, &["id"])), &schema);

        assert!(outcome.modified);
        assert_eq!(outcome.added_columns, vec!["patient_id", "lot_number", "verified", "batch_code"]);
        assert_eq!(outcome.added_foreign_keys, vec!["vaccinations_patient_id_foreign"]);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_populated_table_rejects_unsafe_columns_only() {
        let schema = vaccinations();
        let outcome = plan("vaccinations", &schema, Some(&live(12, &["id"])), &schema);

        assert_eq!(outcome.added_columns, vec!["lot_number", "verified"]);
        assert!(outcome.added_foreign_keys.is_empty());
        assert_eq!(
            outcome.errors[0],
            MigrationError::Unsafe {
                table: "vaccinations".to_string(),
                column: "patient_id".to_string()
            }
        );
        assert_eq!(
            outcome.errors[1],
            MigrationError::Unsafe {
                table: "vaccinations".to_string(),
                column: "batch_code".to_string()
            }
        );
        // foreign key on the rejected patient_id column
        assert!(matches!(outcome.errors[2], MigrationError::Generic { .. }));
        assert_eq!(outcome.errors.len(), 3);
    }

    #[test]
    fn test_converged_table_plans_nothing() {
        let schema = vaccinations();
        let mut table = live(5, &["id", "patient_id", "lot_number", "verified", "batch_code", "legacy"]);
        table.foreign_keys.push(LiveForeignKey {
            name: "vaccinations_patient_id_foreign".to_string(),
            column: "patient_id".to_string(),
            referenced_table: "patients".to_string(),
            referenced_column: "id".to_string(),
            on_update: "NO ACTION".to_string(),
            on_delete: "NO ACTION".to_string(),
        });

        let outcome = plan("vaccinations", &schema, Some(&table), &schema);
        assert!(!outcome.created);
        assert!(!outcome.modified);
        assert!(!outcome.has_changes());
        assert!(outcome.is_success());
    }
}
