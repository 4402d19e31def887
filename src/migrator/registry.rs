//! Ordered migration set: shared tables first, then one group per feature
//! module. Table shapes come from the expected schema the runner is given.

use super::MigrationRunError;
use crate::schema::{DdlGenerator, ExpectedSchema};
use serde::{Deserialize, Serialize};
use MigrationStep::{CreateTable, Sql};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    /// Create a table as declared in the expected schema
    CreateTable(&'static str),
    Sql(&'static str),
}

#[derive(Debug, PartialEq, Eq)]
pub struct Migration {
    pub id: &'static str,
    /// Owning feature module, `None` for the shared set
    pub module: Option<&'static str>,
    pub steps: &'static [MigrationStep],
}

impl Migration {
    /// Statements to execute, in order
    pub fn statements(&self, schema: &ExpectedSchema) -> Result<Vec<String>, MigrationRunError> {
        let mut statements = Vec::new();
        for step in self.steps {
            match step {
                MigrationStep::CreateTable(table) => {
                    let definition = schema.table(table).ok_or_else(|| MigrationRunError::UnknownTable {
                        migration: self.id.to_string(),
                        table: table.to_string(),
                    })?;
                    statements.extend(DdlGenerator::create_table(table, definition));
                }
                MigrationStep::Sql(sql) => statements.push(sql.to_string()),
            }
        }
        Ok(statements)
    }

    pub fn created_tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().filter_map(|step| match step {
            MigrationStep::CreateTable(table) => Some(*table),
            MigrationStep::Sql(_) => None,
        })
    }
}

/// Which part of the migration set to run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "scope", content = "module", rename_all = "snake_case")]
pub enum MigrationScope {
    /// Shared set plus the tenant's modules
    #[default]
    All,
    Shared,
    Module(String),
}

pub static SHARED_MIGRATIONS: &[Migration] = &[
    Migration {
        id: "2024_01_01_000000_create_departments_table",
        module: None,
        steps: &[
            CreateTable("departments"),
            Sql("CREATE UNIQUE INDEX IF NOT EXISTS departments_code_unique ON departments (code)"),
        ],
    },
    Migration {
        id: "2024_01_01_000001_create_users_table",
        module: None,
        steps: &[
            CreateTable("users"),
            Sql("CREATE UNIQUE INDEX IF NOT EXISTS users_email_unique ON users (email)"),
        ],
    },
    Migration {
        id: "2024_01_01_000002_create_personal_access_tokens_table",
        module: None,
        steps: &[
            CreateTable("personal_access_tokens"),
            Sql("CREATE UNIQUE INDEX IF NOT EXISTS personal_access_tokens_token_unique ON personal_access_tokens (token)"),
            Sql("CREATE INDEX IF NOT EXISTS personal_access_tokens_tokenable_index ON personal_access_tokens (tokenable_type, tokenable_id)"),
        ],
    },
    Migration {
        id: "2024_01_01_000003_create_oauth_clients_table",
        module: None,
        steps: &[CreateTable("oauth_clients")],
    },
    Migration {
        id: "2024_01_01_000004_create_oauth_access_tokens_table",
        module: None,
        steps: &[
            CreateTable("oauth_access_tokens"),
            Sql("CREATE INDEX IF NOT EXISTS oauth_access_tokens_user_id_index ON oauth_access_tokens (user_id)"),
        ],
    },
    Migration {
        id: "2024_01_01_000005_create_oauth_refresh_tokens_table",
        module: None,
        steps: &[
            CreateTable("oauth_refresh_tokens"),
            Sql("CREATE INDEX IF NOT EXISTS oauth_refresh_tokens_access_token_id_index ON oauth_refresh_tokens (access_token_id)"),
        ],
    },
    Migration {
        id: "2024_01_02_000000_create_patients_table",
        module: None,
        steps: &[
            CreateTable("patients"),
            Sql("CREATE UNIQUE INDEX IF NOT EXISTS patients_medical_record_number_unique ON patients (medical_record_number)"),
        ],
    },
    Migration {
        id: "2024_01_02_000001_create_admissions_table",
        module: None,
        steps: &[CreateTable("admissions")],
    },
    Migration {
        id: "2024_01_02_000002_create_prescriptions_table",
        module: None,
        steps: &[CreateTable("prescriptions")],
    },
];

pub static MODULE_MIGRATIONS: &[Migration] = &[
    Migration {
        id: "2024_02_01_000000_create_medications_table",
        module: Some("pharmacy"),
        steps: &[CreateTable("medications")],
    },
    Migration {
        id: "2024_02_01_000001_create_dispensations_table",
        module: Some("pharmacy"),
        steps: &[CreateTable("dispensations")],
    },
    Migration {
        id: "2024_02_02_000000_create_lab_tests_table",
        module: Some("laboratory"),
        steps: &[
            CreateTable("lab_tests"),
            Sql("CREATE UNIQUE INDEX IF NOT EXISTS lab_tests_code_unique ON lab_tests (code)"),
        ],
    },
    Migration {
        id: "2024_02_02_000001_create_lab_results_table",
        module: Some("laboratory"),
        steps: &[CreateTable("lab_results")],
    },
    Migration {
        id: "2024_02_03_000000_create_vaccinations_table",
        module: Some("vaccinations"),
        steps: &[CreateTable("vaccinations")],
    },
    Migration {
        id: "2024_02_04_000000_create_invoices_table",
        module: Some("billing"),
        steps: &[
            CreateTable("invoices"),
            Sql("CREATE UNIQUE INDEX IF NOT EXISTS invoices_invoice_number_unique ON invoices (invoice_number)"),
        ],
    },
    Migration {
        id: "2024_02_04_000001_create_invoice_items_table",
        module: Some("billing"),
        steps: &[CreateTable("invoice_items")],
    },
    Migration {
        id: "2024_02_05_000000_create_appointments_table",
        module: Some("appointments"),
        steps: &[
            CreateTable("appointments"),
            Sql("CREATE INDEX IF NOT EXISTS appointments_scheduled_at_index ON appointments (scheduled_at)"),
        ],
    },
    Migration {
        id: "2024_02_06_000000_create_imaging_studies_table",
        module: Some("radiology"),
        steps: &[CreateTable("imaging_studies")],
    },
];

/// Tables the authentication layer cannot work without
pub const AUTH_TABLES: [&str; 5] = [
    "users",
    "personal_access_tokens",
    "oauth_clients",
    "oauth_access_tokens",
    "oauth_refresh_tokens",
];

/// Migrations for `scope`, in execution order. `modules` is the tenant's
/// module list used by [`MigrationScope::All`].
pub fn select(scope: &MigrationScope, modules: &[String]) -> Vec<&'static Migration> {
    match scope {
        MigrationScope::Shared => SHARED_MIGRATIONS.iter().collect(),
        MigrationScope::Module(name) => module_migrations(name).collect(),
        MigrationScope::All => SHARED_MIGRATIONS
            .iter()
            .chain(
                MODULE_MIGRATIONS
                    .iter()
                    .filter(|m| m.module.is_some_and(|owner| modules.iter().any(|n| n == owner))),
            )
            .collect(),
    }
}

pub fn module_migrations(module: &str) -> impl Iterator<Item = &'static Migration> + '_ {
    MODULE_MIGRATIONS.iter().filter(move |m| m.module == Some(module))
}

/// Shared migrations that create at least one of `tables`
pub fn migrations_creating<'a>(tables: &'a [String]) -> impl Iterator<Item = &'static Migration> + 'a {
    SHARED_MIGRATIONS
        .iter()
        .filter(move |m| m.created_tables().any(|t| tables.iter().any(|wanted| wanted == t)))
}

/// Tables owned by the shared set plus the given modules
pub fn tables_for(modules: &[String]) -> Vec<&'static str> {
    select(&MigrationScope::All, modules)
        .into_iter()
        .flat_map(|m| m.created_tables())
        .collect()
}
