//! Provisioning options, per-tenant results and bulk reports

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// What a provisioning run should do
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvisionOptions {
    pub create_database: bool,
    pub run_migrations: bool,
    pub activate_default_modules: bool,
    /// Explicit module list, replaces the configured defaults
    pub selected_modules: Option<Vec<String>>,
    pub run_seeders: bool,
    /// Run only this seeder instead of the default chain
    #[validate(length(min = 1, max = 64, message = "Seeder name must be between 1 and 64 characters"))]
    pub seeder: Option<String>,
    /// Drop and recreate an existing database
    pub force: bool,
    /// Keep an existing database; wins over `force`
    pub skip_if_exists: bool,
    pub dry_run: bool,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            create_database: true,
            run_migrations: true,
            activate_default_modules: true,
            selected_modules: None,
            run_seeders: true,
            seeder: None,
            force: false,
            skip_if_exists: false,
            dry_run: false,
        }
    }
}

impl ProvisionOptions {
    pub fn activates_modules(&self) -> bool {
        self.activate_default_modules || self.selected_modules.is_some()
    }
}

/// A module that could not be activated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleFailure {
    pub module: String,
    pub error: String,
}

/// Record of one provisioning run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningResult {
    pub tenant_id: Uuid,
    pub dry_run: bool,
    pub database_created: bool,
    pub migrations_executed: bool,
    pub applied_migrations: Vec<String>,
    pub auth_infra_ready: bool,
    /// Plain secret of a default access client created by this run; never
    /// stored, only its hash is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_client_secret: Option<String>,
    /// At least one module was enabled by this run
    pub modules_activated: bool,
    pub activated_modules: Vec<String>,
    pub failed_modules: Vec<ModuleFailure>,
    pub seeders_executed: bool,
    pub executed_seeders: Vec<String>,
    pub status_activated: bool,
    /// Steps a dry run would perform
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_steps: Vec<String>,
    pub errors: Vec<String>,
}

impl ProvisioningResult {
    pub fn new(tenant_id: Uuid, dry_run: bool) -> Self {
        Self {
            tenant_id,
            dry_run,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Skipped,
    Error,
}

/// Outcome of one tenant within a bulk operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantOutcome {
    pub tenant_id: Uuid,
    pub slug: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Migrations applied, or pending on a dry run
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisioningResult>,
}

impl TenantOutcome {
    pub fn new(tenant_id: Uuid, slug: impl Into<String>, status: OutcomeStatus) -> Self {
        Self {
            tenant_id,
            slug: slug.into(),
            status,
            message: None,
            migrations: Vec::new(),
            provisioning: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Result of a bulk operation over all connectable tenants, in processing
/// order. Skipped tenants count towards `success` and are also tallied in
/// `skipped`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMigrationReport {
    pub tenants: Vec<TenantOutcome>,
    pub success: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl BulkMigrationReport {
    pub fn record(&mut self, outcome: TenantOutcome) {
        match outcome.status {
            OutcomeStatus::Success => self.success += 1,
            OutcomeStatus::Skipped => {
                self.success += 1;
                self.skipped += 1;
            }
            OutcomeStatus::Error => self.errors += 1,
        }
        self.tenants.push(outcome);
    }

    pub fn outcome(&self, tenant_id: Uuid) -> Option<&TenantOutcome> {
        self.tenants.iter().find(|o| o.tenant_id == tenant_id)
    }

    pub fn total(&self) -> usize {
        self.tenants.len()
    }
}

/// Progress events of a bulk operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkProgress {
    Started { tenant_id: Uuid, index: usize, total: usize },
    Succeeded { tenant_id: Uuid },
    Skipped { tenant_id: Uuid, reason: String },
    Failed { tenant_id: Uuid, error: String },
}

/// Callback receiving [`BulkProgress`] events
pub type ProgressFn<'a> = &'a (dyn Fn(&BulkProgress) + Send + Sync);
