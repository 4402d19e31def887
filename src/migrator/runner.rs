//! Recorded migration runner
//!
//! Applied migrations are recorded in `schema_migrations` inside the tenant
//! database. Each migration runs in its own transaction together with its
//! ledger row, so a migration is either applied and recorded or neither.

use super::registry::Migration;
use super::MigrationRunError;
use crate::db::queries;
use crate::schema::{introspect::table_exists, ExpectedSchema};
use deadpool_postgres::Client;
use std::collections::HashSet;
use tracing::{debug, info};

const LEDGER_TABLE: &str = "schema_migrations";

pub struct MigrationRunner<'a> {
    schema: &'a ExpectedSchema,
}

impl<'a> MigrationRunner<'a> {
    /// Runner resolving table declarations from `schema`
    pub fn new(schema: &'a ExpectedSchema) -> Self {
        Self { schema }
    }

    pub async fn ensure_ledger(client: &Client) -> Result<(), MigrationRunError> {
        client
            .batch_execute(queries::CREATE_MIGRATIONS_LEDGER)
            .await
            .map_err(MigrationRunError::Ledger)
    }

    /// Ids of the migrations already recorded. Read only: a database without
    /// a ledger has nothing applied.
    pub async fn applied(client: &Client) -> Result<HashSet<String>, MigrationRunError> {
        let pg: &tokio_postgres::Client = client;
        if !table_exists(pg, LEDGER_TABLE).await.map_err(MigrationRunError::Ledger)? {
            return Ok(HashSet::new());
        }
        let rows = client
            .query(queries::LIST_APPLIED_MIGRATIONS, &[])
            .await
            .map_err(MigrationRunError::Ledger)?;
        Ok(rows.iter().map(|row| row.get::<_, String>("id")).collect())
    }

    /// Subset of `migrations` not yet recorded, order preserved
    pub async fn pending(
        client: &Client,
        migrations: &[&'static Migration],
    ) -> Result<Vec<&'static Migration>, MigrationRunError> {
        let applied = Self::applied(client).await?;
        Ok(migrations
            .iter()
            .filter(|m| !applied.contains(m.id))
            .copied()
            .collect())
    }

    /// Apply every pending migration of `migrations`. Returns the ids that
    /// were applied by this call.
    pub async fn run(
        &self,
        client: &mut Client,
        migrations: &[&'static Migration],
    ) -> Result<Vec<String>, MigrationRunError> {
        Self::ensure_ledger(client).await?;
        let pending = Self::pending(client, migrations).await?;
        if pending.is_empty() {
            debug!("No pending migrations");
            return Ok(Vec::new());
        }
        self.apply_all(client, &pending).await
    }

    /// Apply `migrations` whether or not they are recorded. Used to rebuild
    /// tables that went missing after their migration was recorded.
    pub async fn reapply(
        &self,
        client: &mut Client,
        migrations: &[&'static Migration],
    ) -> Result<Vec<String>, MigrationRunError> {
        Self::ensure_ledger(client).await?;
        self.apply_all(client, migrations).await
    }

    async fn apply_all(
        &self,
        client: &mut Client,
        migrations: &[&'static Migration],
    ) -> Result<Vec<String>, MigrationRunError> {
        let batch: i32 = client
            .query_one(queries::NEXT_MIGRATION_BATCH, &[])
            .await
            .map_err(MigrationRunError::Ledger)?
            .get("batch");

        let mut applied = Vec::with_capacity(migrations.len());
        for migration in migrations {
            self.apply_one(client, migration, batch).await?;
            info!(migration = %migration.id, batch, "Migrated");
            applied.push(migration.id.to_string());
        }
        Ok(applied)
    }

    async fn apply_one(&self, client: &mut Client, migration: &Migration, batch: i32) -> Result<(), MigrationRunError> {
        let statements = migration.statements(self.schema)?;
        let failed = |source| MigrationRunError::Statement {
            migration: migration.id.to_string(),
            source,
        };

        let tx = client.transaction().await.map_err(failed)?;
        for statement in &statements {
            tx.batch_execute(statement).await.map_err(failed)?;
        }
        tx.execute(queries::RECORD_MIGRATION, &[&migration.id, &migration.module, &batch])
            .await
            .map_err(failed)?;
        tx.commit().await.map_err(failed)
    }
}
