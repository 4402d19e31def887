//! Single-tenant provisioning
//!
//! Steps run in a fixed order: create database, run migrations (plus the
//! authentication readiness check and default access client), activate
//! modules, seed, mark active. The first failing step stops the run; the
//! partial result travels back inside [`ProvisioningFailure`].

use super::result::{ModuleFailure, ProvisionOptions, ProvisioningResult};
use crate::broker::ConnectionBroker;
use crate::catalog::TenantCatalog;
use crate::config::TenancyConfig;
use crate::db::{validate_identifier, DatabaseAdmin, DbError};
use crate::error::{ModuleError, ProvisioningError, ProvisioningFailure};
use crate::migrator::registry::{self, AUTH_TABLES};
use crate::migrator::{MigrationRunner, MigrationScope};
use crate::models::{AccessClient, Tenant, TenantStatus};
use crate::modules::{find_module, ModuleRegistry};
use crate::schema::{introspect::table_exists, ExpectedSchema};
use crate::seed;
use chrono::Utc;
use deadpool_postgres::Client;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tracing::{error, info, warn};
use uuid::Uuid;

const ACCESS_CLIENT_SECRET_LEN: usize = 40;

pub struct ProvisioningOrchestrator {
    pub(super) catalog: Arc<dyn TenantCatalog>,
    pub(super) broker: Arc<ConnectionBroker>,
    pub(super) admin: DatabaseAdmin,
    pub(super) modules: Arc<ModuleRegistry>,
    pub(super) tenancy: TenancyConfig,
    /// Declarations the migrations create tables from
    schema: Arc<ExpectedSchema>,
}

/// Hex SHA-256 of an access client secret
pub fn hash_secret(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ACCESS_CLIENT_SECRET_LEN)
        .map(char::from)
        .collect()
}

impl ProvisioningOrchestrator {
    pub fn new(
        catalog: Arc<dyn TenantCatalog>,
        broker: Arc<ConnectionBroker>,
        admin: DatabaseAdmin,
        modules: Arc<ModuleRegistry>,
        tenancy: TenancyConfig,
        schema: Arc<ExpectedSchema>,
    ) -> Self {
        Self {
            catalog,
            broker,
            admin,
            modules,
            tenancy,
            schema,
        }
    }

    /// Provision `tenant` according to `options`
    pub async fn provision(
        &self,
        tenant: &Tenant,
        options: &ProvisionOptions,
    ) -> Result<ProvisioningResult, ProvisioningFailure> {
        let mut result = ProvisioningResult::new(tenant.id, options.dry_run);
        info!(tenant_id = %tenant.id, slug = %tenant.slug, dry_run = options.dry_run, "🏥 Provisioning tenant");

        let outcome = if options.dry_run {
            self.plan(tenant, options, &mut result).await
        } else {
            self.run_steps(tenant, options, &mut result).await
        };

        match outcome {
            Ok(()) => {
                info!(tenant_id = %tenant.id, "✅ Tenant provisioned");
                Ok(result)
            }
            Err(error) => {
                error!(tenant_id = %tenant.id, error = %error, "Provisioning failed");
                result.errors.push(error.to_string());
                Err(ProvisioningFailure { result, error })
            }
        }
    }

    async fn run_steps(
        &self,
        tenant: &Tenant,
        options: &ProvisionOptions,
        result: &mut ProvisioningResult,
    ) -> Result<(), ProvisioningError> {
        if options.create_database {
            result.database_created = self.create_database(tenant, options).await?;
        }

        if options.run_migrations {
            let modules = self.migration_modules(tenant.id, options).await?;
            result.applied_migrations = self.run_migrations(tenant, &modules).await?;
            result.migrations_executed = true;
            result.auth_infra_ready = true;
            result.access_client_secret = self.ensure_access_client(tenant).await?;
        }

        if options.activates_modules() {
            let requested = self.requested_modules(options);
            let (activated, failed) = self.activate_modules(tenant.id, &requested).await;
            result.modules_activated = !activated.is_empty();
            result.activated_modules = activated;
            result.failed_modules = failed;
        }

        if options.run_seeders {
            result.executed_seeders = self.seed(tenant, options.seeder.as_deref()).await?;
            result.seeders_executed = true;
        }

        // The caller's copy may be stale after an earlier run
        let current = self.catalog.get_tenant(tenant.id).await?;
        if current.status == TenantStatus::Provisioning {
            self.catalog
                .update_status(tenant.id, TenantStatus::Active, Some(Utc::now()))
                .await?;
            self.broker.invalidate_tenant(tenant.id);
            result.status_activated = true;
            info!(tenant_id = %tenant.id, "Tenant marked active");
        }
        Ok(())
    }

    /// Create the tenant database. Returns `false` when an existing one was
    /// kept.
    pub async fn create_database(&self, tenant: &Tenant, options: &ProvisionOptions) -> Result<bool, ProvisioningError> {
        let name = &tenant.database.database;
        validate_identifier(name).map_err(|_| DbError::InvalidIdentifier(name.clone()))?;

        if self.admin.database_exists(name).await? {
            if options.skip_if_exists {
                info!(tenant_id = %tenant.id, database = %name, "Database exists, keeping it");
                return Ok(false);
            }
            if !options.force {
                return Err(ProvisioningError::DatabaseExists(name.clone()));
            }
            warn!(tenant_id = %tenant.id, database = %name, "Force: dropping existing database");
            self.broker.evict(tenant.id);
            self.admin.drop_database(name).await?;
        }

        let owner = if self.tenancy.create_roles {
            self.admin
                .ensure_role(&tenant.database.username, &tenant.database.password)
                .await?;
            Some(tenant.database.username.as_str())
        } else {
            None
        };

        match self.admin.create_database(name, owner).await {
            Ok(()) => {
                info!(tenant_id = %tenant.id, database = %name, "🗄️  Database created");
                Ok(true)
            }
            // created concurrently between the existence check and here
            Err(DbError::Database(e)) if options.skip_if_exists && e.code() == Some(&SqlState::DUPLICATE_DATABASE) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn requested_modules(&self, options: &ProvisionOptions) -> Vec<String> {
        match &options.selected_modules {
            Some(selected) => selected.clone(),
            None if options.activate_default_modules => self.tenancy.default_modules.clone(),
            None => Vec::new(),
        }
    }

    /// Modules whose migrations belong to this run: the requested ones plus
    /// those already enabled
    async fn migration_modules(&self, tenant_id: Uuid, options: &ProvisionOptions) -> Result<Vec<String>, ProvisioningError> {
        let mut modules = if options.activates_modules() {
            self.requested_modules(options)
        } else {
            Vec::new()
        };
        for enabled in self.modules.get_enabled_modules(tenant_id).await.map_err(ProvisioningError::Module)?.iter() {
            if !modules.contains(enabled) {
                modules.push(enabled.clone());
            }
        }
        modules.retain(|m| find_module(m).is_some());
        Ok(modules)
    }

    async fn run_migrations(&self, tenant: &Tenant, modules: &[String]) -> Result<Vec<String>, ProvisioningError> {
        let session = self.broker.session(tenant).await?;
        let mut client = session.client().await?;

        let runner = MigrationRunner::new(&self.schema);
        let migrations = registry::select(&MigrationScope::All, modules);
        let applied = runner.run(&mut client, &migrations).await?;
        info!(tenant_id = %tenant.id, applied = applied.len(), "📦 Migrations complete");

        self.ensure_auth_infra_ready(&mut client, tenant).await?;
        Ok(applied)
    }

    async fn missing_auth_tables(client: &Client) -> Result<Vec<String>, ProvisioningError> {
        let pg: &tokio_postgres::Client = client;
        let mut missing = Vec::new();
        for table in AUTH_TABLES {
            if !table_exists(pg, table).await? {
                missing.push(table.to_string());
            }
        }
        Ok(missing)
    }

    /// Verify the authentication tables exist, re-running their migrations
    /// once when some are missing
    pub async fn ensure_auth_infra_ready(&self, client: &mut Client, tenant: &Tenant) -> Result<(), ProvisioningError> {
        let missing = Self::missing_auth_tables(client).await?;
        if missing.is_empty() {
            return Ok(());
        }

        warn!(tenant_id = %tenant.id, missing = ?missing, "Auth tables missing, re-running auth migrations");
        let migrations: Vec<_> = registry::migrations_creating(&missing).collect();
        if let Err(e) = MigrationRunner::new(&self.schema).reapply(client, &migrations).await {
            warn!(tenant_id = %tenant.id, error = %e, "Re-running auth migrations failed");
        }

        let still_missing = Self::missing_auth_tables(client).await?;
        if !still_missing.is_empty() {
            return Err(ProvisioningError::AuthInfraNotReady {
                tenant: tenant.id,
                missing: still_missing,
            });
        }
        info!(tenant_id = %tenant.id, "🔐 Auth infrastructure ready");
        Ok(())
    }

    /// Register the tenant's default access client unless one exists.
    /// Returns the plain secret of a newly created client.
    async fn ensure_access_client(&self, tenant: &Tenant) -> Result<Option<String>, ProvisioningError> {
        if self.catalog.find_access_client(tenant.id).await?.is_some() {
            return Ok(None);
        }

        let secret = generate_secret();
        let client = AccessClient {
            client_id: Uuid::new_v4(),
            tenant_id: tenant.id,
            name: format!("{} default client", tenant.name),
            secret_hash: hash_secret(&secret),
            created_at: Utc::now(),
        };
        self.catalog.insert_access_client(&client).await?;
        info!(tenant_id = %tenant.id, client_id = %client.client_id, "Created default access client");
        Ok(Some(secret))
    }

    /// Enable every module of `modules`. A failing module is logged and
    /// reported without stopping the others.
    pub async fn activate_modules(&self, tenant_id: Uuid, modules: &[String]) -> (Vec<String>, Vec<ModuleFailure>) {
        let mut activated = Vec::new();
        let mut failed = Vec::new();
        for module in modules {
            match self.modules.enable_module(tenant_id, module, None, None).await {
                Ok(_) => activated.push(module.clone()),
                Err(e) => {
                    warn!(tenant_id = %tenant_id, module = %module, error = %e, "Module activation failed");
                    failed.push(ModuleFailure {
                        module: module.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        (activated, failed)
    }

    /// Run one seeder or the default chain against the tenant database
    pub async fn seed(&self, tenant: &Tenant, seeder: Option<&str>) -> Result<Vec<String>, ProvisioningError> {
        let session = self.broker.session(tenant).await?;
        let mut client = session.client().await?;
        let executed = seed::run_seeders(&mut client, seeder).await?;
        info!(tenant_id = %tenant.id, seeders = ?executed, "Seeding complete");
        Ok(executed)
    }

    /// Seeders [`seed`](Self::seed) would run, without writing anything
    pub async fn plan_seed(&self, tenant: &Tenant, seeder: Option<&str>) -> Result<Vec<String>, ProvisioningError> {
        let session = self.broker.session(tenant).await?;
        let client = session.client().await?;
        Ok(seed::plan_seeders(&client, seeder).await?)
    }

    /// Run the migrations of `scope` on one tenant. On a dry run nothing is
    /// applied and the pending ids are returned instead.
    pub async fn migrate_tenant(
        &self,
        tenant: &Tenant,
        scope: &MigrationScope,
        dry_run: bool,
    ) -> Result<Vec<String>, ProvisioningError> {
        if let MigrationScope::Module(name) = scope {
            if find_module(name).is_none() {
                return Err(ModuleError::NotRegistered(name.clone()).into());
            }
        }

        let modules = self
            .modules
            .get_enabled_modules(tenant.id)
            .await
            .map_err(ProvisioningError::Module)?;
        let migrations = registry::select(scope, &modules);

        let session = self.broker.session(tenant).await?;
        let mut client = session.client().await?;

        if dry_run {
            let pending = MigrationRunner::pending(&client, &migrations).await?;
            return Ok(pending.iter().map(|m| m.id.to_string()).collect());
        }

        let applied = MigrationRunner::new(&self.schema)
            .run(&mut client, &migrations)
            .await?;
        info!(tenant_id = %tenant.id, scope = ?scope, applied = applied.len(), "Tenant migrated");
        Ok(applied)
    }

    /// Describe what a run with `options` would do, without changing
    /// anything
    async fn plan(
        &self,
        tenant: &Tenant,
        options: &ProvisionOptions,
        result: &mut ProvisioningResult,
    ) -> Result<(), ProvisioningError> {
        let steps = &mut result.planned_steps;
        let name = &tenant.database.database;

        if options.create_database {
            let exists = self.admin.database_exists(name).await?;
            steps.push(match (exists, options.skip_if_exists, options.force) {
                (false, _, _) => format!("create database {}", name),
                (true, true, _) => format!("keep existing database {}", name),
                (true, false, true) => format!("drop and recreate database {}", name),
                (true, false, false) => return Err(ProvisioningError::DatabaseExists(name.clone())),
            });
        }

        if options.run_migrations {
            let modules = self.migration_modules(tenant.id, options).await?;
            let migrations = registry::select(&MigrationScope::All, &modules);
            steps.push(format!(
                "run up to {} migrations (shared + [{}])",
                migrations.len(),
                modules.join(", ")
            ));
            steps.push("verify auth tables and default access client".to_string());
        }

        if options.activates_modules() {
            steps.push(format!("activate modules [{}]", self.requested_modules(options).join(", ")));
        }

        if options.run_seeders {
            match options.seeder.as_deref() {
                Some(seeder) => steps.push(format!("run seeder {}", seeder)),
                None => steps.push(format!("run seeders [{}]", seed::DEFAULT_CHAIN.join(", "))),
            }
        }

        // The caller's copy may be stale after an earlier run
        let current = self.catalog.get_tenant(tenant.id).await?;
        if current.status == TenantStatus::Provisioning {
            steps.push("mark tenant active".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_secret_hash_is_sha256_hex() {
        assert_eq!(
            hash_secret("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_generated_secrets_are_random_alphanumeric() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), ACCESS_CLIENT_SECRET_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
