//! Schema validation and convergence of tenant databases
//!
//! Both run against the expected schema restricted to the shared tables and
//! the tables of the tenant's enabled modules.

use crate::auth::Caller;
use crate::broker::{ConnectionTestResult, TenantContext};
use crate::error::{ApiResult, AppError};
use crate::migrator::{apply_smart_migration, converge_schema, registry, MigrationOutcome};
use crate::models::{SuccessResponse, Tenant};
use crate::schema::{generate_validation_report, validate_schema, ExpectedSchema, SchemaValidationResult, ValidationSummary};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidateQuery {
    pub detailed: bool,
    /// `text` renders the operator report instead of JSON
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub tenant_id: Uuid,
    pub summary: ValidationSummary,
    pub tables: Vec<SchemaValidationResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncRequest {
    /// Converge a single table instead of the whole schema
    pub table: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub tenant_id: Uuid,
    pub dry_run: bool,
    pub tables: Vec<MigrationOutcome>,
}

/// The part of the expected schema that applies to `tenant`
async fn expected_for(state: &SharedState, tenant: &Tenant) -> ApiResult<ExpectedSchema> {
    let modules = state.modules.get_enabled_modules(tenant.id).await?;
    let tables = registry::tables_for(&modules);
    Ok(state
        .expected_schema
        .subset(|table| tables.iter().any(|t| *t == table)))
}

pub async fn validate(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ValidateQuery>,
) -> ApiResult<Response> {
    let tenant = state.catalog.get_tenant(id).await?;
    let expected = expected_for(&state, &tenant).await?;

    let session = state.broker.session(&tenant).await?;
    let client = session.client().await?;
    let pg: &tokio_postgres::Client = &client;
    let results = validate_schema(pg, &expected).await?;

    let summary = ValidationSummary::from_results(&results);
    info!(
        tenant_id = %tenant.id,
        tables = summary.tables,
        valid = summary.valid,
        missing = summary.missing,
        "Schema validated"
    );

    if query.format.as_deref() == Some("text") {
        let report = generate_validation_report(&results, query.detailed);
        return Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], report).into_response());
    }

    let tables = if query.detailed {
        results
    } else {
        results.into_iter().filter(|r| !r.is_valid()).collect()
    };
    Ok(Json(SuccessResponse::with_data(
        format!("{} of {} table(s) valid.", summary.valid, summary.tables),
        ValidationResponse {
            tenant_id: tenant.id,
            summary,
            tables,
        },
    ))
    .into_response())
}

pub async fn sync(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SyncRequest>,
) -> ApiResult<Json<SuccessResponse<SyncResponse>>> {
    let tenant = state.catalog.get_tenant(id).await?;
    let expected = expected_for(&state, &tenant).await?;

    let session = state.broker.session(&tenant).await?;
    let mut client = session.client().await?;

    let tables = match &payload.table {
        Some(table) => {
            let definition = expected
                .table(table)
                .ok_or_else(|| AppError::NotFound(format!("Table '{}' is not part of the tenant schema", table)))?;
            if payload.dry_run {
                converge_schema(&mut client, &ExpectedSchema::new().with_table(table.as_str(), definition.clone()), true).await
            } else {
                vec![apply_smart_migration(&mut client, table, definition, definition).await]
            }
        }
        None => converge_schema(&mut client, &expected, payload.dry_run).await,
    };

    let failed = tables.iter().filter(|t| !t.is_success()).count();
    info!(tenant_id = %tenant.id, dry_run = payload.dry_run, tables = tables.len(), failed, "Schema sync finished");

    Ok(Json(SuccessResponse::with_data(
        format!("{} table(s) processed, {} with errors.", tables.len(), failed),
        SyncResponse {
            tenant_id: tenant.id,
            dry_run: payload.dry_run,
            tables,
        },
    )))
}

/// Probe the tenant database without touching the pool registry
pub async fn test_connection(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ConnectionTestResult>>> {
    let tenant = state.catalog.get_tenant(id).await?;
    let result = state.broker.test_connection(&tenant).await?;
    Ok(Json(SuccessResponse::with_data(
        "Connection test successful.",
        result,
    )))
}

/// Resolve the tenant of the bearer token, falling back to the configured
/// default tenant
pub async fn current_tenant(
    State(state): State<SharedState>,
    caller: Caller,
) -> ApiResult<Json<SuccessResponse<Tenant>>> {
    let ctx = TenantContext::new();
    let tenant = state
        .broker
        .current_tenant(&ctx, caller.tenant_id())
        .await?
        .ok_or_else(|| AppError::NotFound("No tenant resolved for this caller".to_string()))?;
    Ok(Json(SuccessResponse::with_data("Current tenant.", tenant)))
}
