//! Tenant lifecycle route handlers
//!
//! Catalog records, provisioning, migrations and seeding, for one tenant or
//! all connectable tenants.

use crate::db::tenant_database_name;
use crate::error::{validation_error, ApiResult};
use crate::migrator::MigrationScope;
use crate::models::{CreateTenant, DatabaseParams, SuccessResponse, Tenant, TenantStatus};
use crate::provisioning::{BulkMigrationReport, BulkProgress, ProgressFn, ProvisionOptions, ProvisioningResult};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

/// Filter for listing tenants
#[derive(Debug, Deserialize)]
pub struct ListTenantsQuery {
    pub status: Option<TenantStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: TenantStatus,
}

/// Which migrations to run. `module` wins over `sharedOnly`.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrateRequest {
    #[validate(length(min = 1, max = 64, message = "Module name must be between 1 and 64 characters"))]
    pub module: Option<String>,
    pub shared_only: bool,
    pub dry_run: bool,
}

impl MigrateRequest {
    pub fn scope(&self) -> MigrationScope {
        match (&self.module, self.shared_only) {
            (Some(module), _) => MigrationScope::Module(module.clone()),
            (None, true) => MigrationScope::Shared,
            (None, false) => MigrationScope::All,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateResponse {
    pub tenant_id: Uuid,
    pub dry_run: bool,
    pub scope: MigrationScope,
    /// Applied ids, or pending ids on a dry run
    pub migrations: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct SeedRequest {
    #[validate(length(min = 1, max = 64, message = "Seeder name must be between 1 and 64 characters"))]
    pub seeder: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedResponse {
    pub tenant_id: Uuid,
    pub dry_run: bool,
    /// Seeders that ran, or would run on a dry run
    pub executed_seeders: Vec<String>,
}

fn log_progress(event: &BulkProgress) {
    debug!(event = ?event, "Bulk progress");
}

fn progress_logger() -> Option<ProgressFn<'static>> {
    let callback: ProgressFn<'static> = &log_progress;
    Some(callback)
}

/// Connection parameters for a new tenant when the request carries none:
/// the admin server, with a database named after the slug
fn default_database_params(state: &SharedState, slug: &str) -> DatabaseParams {
    let admin = &state.settings.admin;
    DatabaseParams {
        host: admin.host.clone(),
        port: admin.port,
        database: tenant_database_name(&state.settings.tenancy.database_prefix, slug),
        username: admin.user.clone(),
        password: admin.password.clone(),
    }
}

/// Register a tenant in the catalog, in `provisioning` status
pub async fn create_tenant(
    State(state): State<SharedState>,
    Json(payload): Json<CreateTenant>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<Tenant>>)> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let database = match payload.database.clone() {
        Some(params) => params,
        None => default_database_params(&state, &payload.slug),
    };
    crate::db::validate_identifier(&database.database).map_err(|e| validation_error(e.to_string()))?;

    let tenant = Tenant::new(payload, database);
    state.catalog.insert_tenant(&tenant).await?;
    info!(tenant_id = %tenant.id, slug = %tenant.slug, "Tenant registered");

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            format!("Tenant '{}' registered.", tenant.slug),
            tenant,
        )),
    ))
}

pub async fn list_tenants(
    State(state): State<SharedState>,
    Query(query): Query<ListTenantsQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<Tenant>>>> {
    let filter = query.status.map(|s| [s]);
    let tenants = state.catalog.list_tenants(filter.as_ref().map(|f| &f[..])).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("{} tenant(s).", tenants.len()),
        tenants,
    )))
}

pub async fn get_tenant(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Tenant>>> {
    let tenant = state.catalog.get_tenant(id).await?;
    Ok(Json(SuccessResponse::with_data("Tenant found.", tenant)))
}

/// Administrative status transition. Tenants leaving the connectable
/// statuses lose their pool.
pub async fn update_status(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> ApiResult<Json<SuccessResponse<Tenant>>> {
    let current = state.catalog.get_tenant(id).await?;
    let provisioned_at = match (current.provisioned_at, payload.status) {
        (None, TenantStatus::Active) => Some(Utc::now()),
        (existing, _) => existing,
    };

    let tenant = state.catalog.update_status(id, payload.status, provisioned_at).await?;
    if tenant.status.is_connectable() {
        state.broker.invalidate_tenant(id);
    } else {
        state.broker.evict(id);
    }
    info!(tenant_id = %id, from = %current.status, to = %tenant.status, "Tenant status changed");

    Ok(Json(SuccessResponse::with_data(
        format!("Tenant is now {}.", tenant.status),
        tenant,
    )))
}

pub async fn provision_tenant(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(options): Json<ProvisionOptions>,
) -> ApiResult<Json<SuccessResponse<ProvisioningResult>>> {
    options.validate().map_err(|e| validation_error(e.to_string()))?;

    let tenant = state.catalog.get_tenant(id).await?;
    let result = state.orchestrator.provision(&tenant, &options).await?;

    let message = if result.dry_run {
        format!("Provisioning plan for '{}'.", tenant.slug)
    } else {
        format!("Tenant '{}' provisioned.", tenant.slug)
    };
    Ok(Json(SuccessResponse::with_data(message, result)))
}

pub async fn provision_all(
    State(state): State<SharedState>,
    Json(options): Json<ProvisionOptions>,
) -> ApiResult<Json<SuccessResponse<BulkMigrationReport>>> {
    options.validate().map_err(|e| validation_error(e.to_string()))?;

    let report = state.orchestrator.provision_all(&options, progress_logger()).await?;
    Ok(Json(SuccessResponse::with_data(bulk_message(&report), report)))
}

pub async fn migrate_tenant(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MigrateRequest>,
) -> ApiResult<Json<SuccessResponse<MigrateResponse>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let tenant = state.catalog.get_tenant(id).await?;
    let scope = payload.scope();
    let migrations = state.orchestrator.migrate_tenant(&tenant, &scope, payload.dry_run).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("{} migration(s).", migrations.len()),
        MigrateResponse {
            tenant_id: tenant.id,
            dry_run: payload.dry_run,
            scope,
            migrations,
        },
    )))
}

pub async fn migrate_all(
    State(state): State<SharedState>,
    Json(payload): Json<MigrateRequest>,
) -> ApiResult<Json<SuccessResponse<BulkMigrationReport>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let report = state
        .orchestrator
        .run_migrations_for_all_tenants(&payload.scope(), payload.dry_run, progress_logger())
        .await?;
    Ok(Json(SuccessResponse::with_data(bulk_message(&report), report)))
}

pub async fn seed_tenant(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SeedRequest>,
) -> ApiResult<Json<SuccessResponse<SeedResponse>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let tenant = state.catalog.get_tenant(id).await?;
    let seeder = payload.seeder.as_deref();
    let executed_seeders = if payload.dry_run {
        state.orchestrator.plan_seed(&tenant, seeder).await?
    } else {
        state.orchestrator.seed(&tenant, seeder).await?
    };

    Ok(Json(SuccessResponse::with_data(
        format!(
            "{} seeder(s) {}.",
            executed_seeders.len(),
            if payload.dry_run { "would run" } else { "executed" }
        ),
        SeedResponse {
            tenant_id: tenant.id,
            dry_run: payload.dry_run,
            executed_seeders,
        },
    )))
}

pub async fn seed_all(
    State(state): State<SharedState>,
    Json(payload): Json<SeedRequest>,
) -> ApiResult<Json<SuccessResponse<BulkMigrationReport>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let report = state
        .orchestrator
        .seed_all_tenants(payload.seeder.as_deref(), payload.dry_run, progress_logger())
        .await?;
    Ok(Json(SuccessResponse::with_data(bulk_message(&report), report)))
}

fn bulk_message(report: &BulkMigrationReport) -> String {
    format!(
        "{} tenant(s): {} succeeded ({} skipped), {} failed.",
        report.total(),
        report.success,
        report.skipped,
        report.errors
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::{OutcomeStatus, TenantOutcome};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_migrate_request_scope() {
        let all: MigrateRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(all.scope(), MigrationScope::All);
        assert!(!all.dry_run);

        let shared: MigrateRequest = serde_json::from_str(r#"{"sharedOnly": true, "dryRun": true}"#).unwrap();
        assert_eq!(shared.scope(), MigrationScope::Shared);
        assert!(shared.dry_run);

        let module: MigrateRequest =
            serde_json::from_str(r#"{"module": "billing", "sharedOnly": true}"#).unwrap();
        assert_eq!(module.scope(), MigrationScope::Module("billing".to_string()));
    }

    #[test]
    fn test_seed_request_accepts_dry_run() {
        let request: SeedRequest = serde_json::from_str(r#"{"seeder": "departments", "dryRun": true}"#).unwrap();
        assert!(request.dry_run);
        assert!(request.validate().is_ok());
        assert!(!serde_json::from_str::<SeedRequest>("{}").unwrap().dry_run);
    }

    #[test]
    fn test_bulk_message_counts_skipped_as_success() {
        let mut report = BulkMigrationReport::default();
        report.record(TenantOutcome::new(Uuid::new_v4(), "a", OutcomeStatus::Success));
        report.record(TenantOutcome::new(Uuid::new_v4(), "b", OutcomeStatus::Skipped));
        report.record(TenantOutcome::new(Uuid::new_v4(), "c", OutcomeStatus::Error));
        assert_eq!(bulk_message(&report), "3 tenant(s): 2 succeeded (1 skipped), 1 failed.");
    }

    #[test]
    fn test_empty_seeder_name_is_rejected() {
        let request: SeedRequest = serde_json::from_str(r#"{"seeder": ""}"#).unwrap();
        assert!(request.validate().is_err());
    }
}
