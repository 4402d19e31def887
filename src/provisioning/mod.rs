//! Tenant provisioning: database creation, migrations, module activation
//! and seeding, for one tenant or all of them.

mod bulk;
mod orchestrator;
mod result;

pub use orchestrator::{hash_secret, ProvisioningOrchestrator};
pub use result::{
    BulkMigrationReport, BulkProgress, ModuleFailure, OutcomeStatus, ProgressFn, ProvisionOptions,
    ProvisioningResult, TenantOutcome,
};
