//! Reference data seeders for tenant databases
//!
//! Every seeder is idempotent and runs in its own transaction. Seeders for
//! module tables are skipped when the module's table does not exist.

use crate::schema::introspect::table_exists;
use deadpool_postgres::Client;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Unknown seeder '{0}'")]
    UnknownSeeder(String),

    #[error("Seeder '{seeder}' failed: {source}")]
    Database {
        seeder: String,
        #[source]
        source: tokio_postgres::Error,
    },
}

#[derive(Debug)]
pub struct Seeder {
    pub name: &'static str,
    /// Skip unless this table exists
    pub requires_table: &'static str,
    pub statements: &'static [&'static str],
}

pub const SEEDERS: &[Seeder] = &[
    Seeder {
        name: "departments",
        requires_table: "departments",
        statements: &[r#"
            INSERT INTO departments (name, code, description, is_active, created_at, updated_at)
            VALUES
                ('Emergency', 'ER', 'Emergency and trauma care', TRUE, NOW(), NOW()),
                ('Internal Medicine', 'IM', 'General adult medicine', TRUE, NOW(), NOW()),
                ('Pediatrics', 'PED', 'Care for infants and children', TRUE, NOW(), NOW()),
                ('Surgery', 'SUR', 'General surgery', TRUE, NOW(), NOW()),
                ('Obstetrics', 'OBS', 'Maternity and obstetric care', TRUE, NOW(), NOW())
            ON CONFLICT (code) DO NOTHING
        "#],
    },
    Seeder {
        name: "lab_tests",
        requires_table: "lab_tests",
        statements: &[r#"
            INSERT INTO lab_tests (code, name, specimen_type, turnaround_hours, created_at, updated_at)
            VALUES
                ('CBC', 'Complete blood count', 'blood', 4, NOW(), NOW()),
                ('BMP', 'Basic metabolic panel', 'blood', 6, NOW(), NOW()),
                ('UA', 'Urinalysis', 'urine', 2, NOW(), NOW()),
                ('HBA1C', 'Glycated hemoglobin', 'blood', 24, NOW(), NOW())
            ON CONFLICT (code) DO NOTHING
        "#],
    },
    Seeder {
        name: "medications",
        requires_table: "medications",
        statements: &[r#"
            INSERT INTO medications (name, generic_name, form, strength, unit_price_cents, stock_quantity, reorder_level, created_at, updated_at)
            SELECT v.name, v.generic_name, v.form, v.strength, v.price, 0, 10, NOW(), NOW()
            FROM (VALUES
                ('Paracetamol 500mg', 'paracetamol', 'tablet', '500mg', 10),
                ('Amoxicillin 250mg', 'amoxicillin', 'capsule', '250mg', 35),
                ('Ibuprofen 400mg', 'ibuprofen', 'tablet', '400mg', 15),
                ('Saline 0.9%', 'sodium chloride', 'infusion', '500ml', 220)
            ) AS v(name, generic_name, form, strength, price)
            WHERE NOT EXISTS (SELECT 1 FROM medications m WHERE m.name = v.name)
        "#],
    },
];

/// Seeders run when no specific one is requested, in order
pub const DEFAULT_CHAIN: [&str; 3] = ["departments", "lab_tests", "medications"];

pub fn find_seeder(name: &str) -> Option<&'static Seeder> {
    SEEDERS.iter().find(|s| s.name == name)
}

fn seeder_names(seeder: Option<&str>) -> Vec<&str> {
    match seeder {
        Some(name) => vec![name],
        None => DEFAULT_CHAIN.to_vec(),
    }
}

/// Run one seeder. Returns `false` when it was skipped for a missing table.
pub async fn run_seeder(client: &mut Client, name: &str) -> Result<bool, SeedError> {
    let seeder = find_seeder(name).ok_or_else(|| SeedError::UnknownSeeder(name.to_string()))?;
    let failed = |source| SeedError::Database {
        seeder: seeder.name.to_string(),
        source,
    };

    let tx = client.transaction().await.map_err(failed)?;
    if !table_exists(&*tx, seeder.requires_table).await.map_err(failed)? {
        debug!(seeder = %seeder.name, table = %seeder.requires_table, "Seeder skipped, table missing");
        return Ok(false);
    }
    for statement in seeder.statements {
        tx.batch_execute(statement).await.map_err(failed)?;
    }
    tx.commit().await.map_err(failed)?;

    info!(seeder = %seeder.name, "🌱 Seeded");
    Ok(true)
}

/// Run `seeder`, or the default chain when `None`. Returns the seeders
/// that actually ran.
pub async fn run_seeders(client: &mut Client, seeder: Option<&str>) -> Result<Vec<String>, SeedError> {
    let mut executed = Vec::new();
    for name in seeder_names(seeder) {
        if run_seeder(client, name).await? {
            executed.push(name.to_string());
        }
    }
    Ok(executed)
}

/// Seeders `run_seeders` would execute, without writing anything
pub async fn plan_seeders(client: &Client, seeder: Option<&str>) -> Result<Vec<String>, SeedError> {
    let pg: &tokio_postgres::Client = client;
    let mut planned = Vec::new();
    for name in seeder_names(seeder) {
        let seeder = find_seeder(name).ok_or_else(|| SeedError::UnknownSeeder(name.to_string()))?;
        let present = table_exists(pg, seeder.requires_table)
            .await
            .map_err(|source| SeedError::Database {
                seeder: seeder.name.to_string(),
                source,
            })?;
        if present {
            planned.push(seeder.name.to_string());
        }
    }
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builtin_schema;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_chain_is_registered() {
        for name in DEFAULT_CHAIN {
            assert!(find_seeder(name).is_some(), "{}", name);
        }
        assert!(find_seeder("admin_users").is_none());
    }

    #[test]
    fn test_seeder_names() {
        assert_eq!(seeder_names(None), DEFAULT_CHAIN.to_vec());
        assert_eq!(seeder_names(Some("lab_tests")), vec!["lab_tests"]);
    }

    #[test]
    fn test_seeders_target_declared_tables() {
        for seeder in SEEDERS {
            assert!(builtin_schema().table(seeder.requires_table).is_some());
        }
    }
}
