//! Tenant schema migrations
//!
//! Two complementary mechanisms: the recorded, ordered migration set
//! ([`runner`], [`registry`]) used at provisioning time, and the additive
//! convergence engine ([`smart`]) that reconciles a live database with the
//! expected schema.

pub mod registry;
pub mod runner;
pub mod smart;

pub use registry::{Migration, MigrationScope, MigrationStep};
pub use runner::MigrationRunner;
pub use smart::{apply_smart_migration, converge_schema, plan, MigrationOutcome, TableCreator};

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Failure of a recorded migration run
#[derive(Error, Debug)]
pub enum MigrationRunError {
    #[error("Migration {migration} failed: {source}")]
    Statement {
        migration: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("Migration {migration} creates table '{table}' which has no declaration")]
    UnknownTable { migration: String, table: String },

    #[error("Migration ledger error: {0}")]
    Ledger(#[source] tokio_postgres::Error),
}

impl MigrationRunError {
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            MigrationRunError::Statement { source, .. } | MigrationRunError::Ledger(source) => source.code(),
            MigrationRunError::UnknownTable { .. } => None,
        }
    }
}
