//! Operations over every connectable tenant
//!
//! Tenants are processed one at a time in catalog order. A tenant's failure
//! is recorded in the report and the batch moves on.

use super::orchestrator::ProvisioningOrchestrator;
use super::result::{
    BulkMigrationReport, BulkProgress, OutcomeStatus, ProgressFn, ProvisionOptions, TenantOutcome,
};
use crate::catalog::CONNECTABLE_STATUSES;
use crate::error::{CatalogError, ProvisioningError};
use crate::migrator::MigrationScope;
use crate::models::Tenant;
use std::future::Future;
use tokio_postgres::error::SqlState;
use tracing::{error, info, warn};

/// Failures that mean "nothing to do here" rather than a broken tenant
fn is_benign(err: &ProvisioningError) -> bool {
    matches!(
        err.sql_state(),
        Some(code) if *code == SqlState::DUPLICATE_TABLE || *code == SqlState::INVALID_CATALOG_NAME
    )
}

fn classify(tenant: &Tenant, err: &ProvisioningError) -> TenantOutcome {
    if is_benign(err) {
        warn!(tenant_id = %tenant.id, error = %err, "Tenant skipped");
        TenantOutcome::new(tenant.id, &tenant.slug, OutcomeStatus::Skipped).with_message(err.to_string())
    } else {
        error!(tenant_id = %tenant.id, error = %err, "Tenant failed");
        TenantOutcome::new(tenant.id, &tenant.slug, OutcomeStatus::Error).with_message(err.to_string())
    }
}

fn emit(progress: Option<ProgressFn<'_>>, event: BulkProgress) {
    if let Some(callback) = progress {
        callback(&event);
    }
}

impl ProvisioningOrchestrator {
    /// `Some(outcome)` when the tenant's database is missing or cannot be
    /// checked, `None` when work can proceed
    async fn precheck(&self, tenant: &Tenant) -> Option<TenantOutcome> {
        match self.admin.database_exists(&tenant.database.database).await {
            Ok(true) => None,
            Ok(false) => {
                warn!(tenant_id = %tenant.id, database = %tenant.database.database, "Tenant database missing, skipping");
                Some(
                    TenantOutcome::new(tenant.id, &tenant.slug, OutcomeStatus::Skipped)
                        .with_message(format!("database '{}' does not exist", tenant.database.database)),
                )
            }
            Err(e) => Some(classify(tenant, &e.into())),
        }
    }

    async fn for_each_tenant<F, Fut>(
        &self,
        operation: &str,
        progress: Option<ProgressFn<'_>>,
        run: F,
    ) -> Result<BulkMigrationReport, CatalogError>
    where
        F: Fn(Tenant) -> Fut,
        Fut: Future<Output = TenantOutcome>,
    {
        let tenants = self.catalog.list_tenants(Some(&CONNECTABLE_STATUSES)).await?;
        let total = tenants.len();
        info!(operation = %operation, total, "🚀 Starting bulk operation");

        let mut report = BulkMigrationReport::default();
        for (index, tenant) in tenants.into_iter().enumerate() {
            let tenant_id = tenant.id;
            emit(progress, BulkProgress::Started { tenant_id, index, total });

            let outcome = run(tenant).await;
            let event = match outcome.status {
                OutcomeStatus::Success => BulkProgress::Succeeded { tenant_id },
                OutcomeStatus::Skipped => BulkProgress::Skipped {
                    tenant_id,
                    reason: outcome.message.clone().unwrap_or_default(),
                },
                OutcomeStatus::Error => BulkProgress::Failed {
                    tenant_id,
                    error: outcome.message.clone().unwrap_or_default(),
                },
            };
            emit(progress, event);
            report.record(outcome);
        }

        info!(
            operation = %operation,
            success = report.success,
            skipped = report.skipped,
            errors = report.errors,
            "Bulk operation finished"
        );
        Ok(report)
    }

    /// Migrate every active or provisioning tenant
    pub async fn run_migrations_for_all_tenants(
        &self,
        scope: &MigrationScope,
        dry_run: bool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<BulkMigrationReport, CatalogError> {
        self.for_each_tenant("migrate", progress, |tenant| async move {
            if let Some(skipped) = self.precheck(&tenant).await {
                return skipped;
            }
            match self.migrate_tenant(&tenant, scope, dry_run).await {
                Ok(migrations) => {
                    let mut outcome = TenantOutcome::new(tenant.id, &tenant.slug, OutcomeStatus::Success);
                    outcome.migrations = migrations;
                    outcome
                }
                Err(e) => classify(&tenant, &e),
            }
        })
        .await
    }

    /// Provision every active or provisioning tenant with the same options
    pub async fn provision_all(
        &self,
        options: &ProvisionOptions,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<BulkMigrationReport, CatalogError> {
        self.for_each_tenant("provision", progress, |tenant| async move {
            match self.provision(&tenant, options).await {
                Ok(result) => {
                    let mut outcome = TenantOutcome::new(tenant.id, &tenant.slug, OutcomeStatus::Success);
                    outcome.migrations = result.applied_migrations.clone();
                    outcome.provisioning = Some(result);
                    outcome
                }
                Err(failure) => {
                    let mut outcome = classify(&tenant, &failure.error);
                    outcome.provisioning = Some(failure.result);
                    outcome
                }
            }
        })
        .await
    }

    /// Seed every active or provisioning tenant. A dry run reports the
    /// seeders that would run.
    pub async fn seed_all_tenants(
        &self,
        seeder: Option<&str>,
        dry_run: bool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<BulkMigrationReport, CatalogError> {
        self.for_each_tenant("seed", progress, |tenant| async move {
            if let Some(skipped) = self.precheck(&tenant).await {
                return skipped;
            }
            let seeded = if dry_run {
                self.plan_seed(&tenant, seeder).await
            } else {
                self.seed(&tenant, seeder).await
            };
            match seeded {
                Ok(seeders) => TenantOutcome::new(tenant.id, &tenant.slug, OutcomeStatus::Success).with_message(format!(
                    "{}: {}",
                    if dry_run { "would seed" } else { "seeders" },
                    seeders.join(", ")
                )),
                Err(e) => classify(&tenant, &e),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;

    fn failed_with(code: SqlState) -> ProvisioningError {
        ConnectionError::Failed {
            database: "hms_x".to_string(),
            reason: "boom".to_string(),
            code: Some(code),
        }
        .into()
    }

    #[test]
    fn test_benign_sql_states() {
        assert!(is_benign(&failed_with(SqlState::INVALID_CATALOG_NAME)));
        assert!(is_benign(&failed_with(SqlState::DUPLICATE_TABLE)));
        assert!(!is_benign(&failed_with(SqlState::UNDEFINED_COLUMN)));
        assert!(!is_benign(&ProvisioningError::DatabaseExists("hms_x".to_string())));
    }

    #[test]
    fn test_classify_maps_benign_to_skipped() {
        let tenant = crate::catalog::sample_tenant("lakeside");
        let skipped = classify(&tenant, &failed_with(SqlState::INVALID_CATALOG_NAME));
        assert_eq!(skipped.status, OutcomeStatus::Skipped);

        let failed = classify(&tenant, &failed_with(SqlState::SYNTAX_ERROR));
        assert_eq!(failed.status, OutcomeStatus::Error);
        assert!(failed.message.unwrap().contains("boom"));
    }
}
