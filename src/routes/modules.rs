//! Feature module route handlers

use crate::auth::Caller;
use crate::error::{validation_error, ApiResult};
use crate::models::{ModuleStatus, SuccessResponse};
use crate::modules::{FeatureModule, ModuleChangePreview, ModuleChangeResult};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// One or many module names to toggle
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ModuleChangeRequest {
    #[validate(length(min = 1, message = "At least one module is required"))]
    pub modules: Vec<String>,
    /// Stored on the activation row; only applied when enabling a single
    /// module
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Applied changes, or the preview of a dry run
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ModuleChanges {
    Applied(Vec<ModuleChangeResult>),
    Planned(Vec<ModuleChangePreview>),
}

impl ModuleChanges {
    fn message(&self) -> String {
        match self {
            ModuleChanges::Applied(results) => {
                let failed = results.iter().filter(|r| !r.success).count();
                format!("{} module(s) changed, {} failed.", results.len() - failed, failed)
            }
            ModuleChanges::Planned(preview) => {
                let changing = preview.iter().filter(|p| p.would_change).count();
                format!("Dry run: {} module(s) would change.", changing)
            }
        }
    }
}

/// Every registered feature module
pub async fn list_available(State(state): State<SharedState>) -> Json<SuccessResponse<&'static [FeatureModule]>> {
    let modules = state.modules.get_available_modules();
    Json(SuccessResponse::with_data(
        format!("{} module(s) available.", modules.len()),
        modules,
    ))
}

pub async fn tenant_modules(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Vec<ModuleStatus>>>> {
    let tenant = state.catalog.get_tenant(id).await?;
    let status = state.modules.get_modules_status(tenant.id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} module(s).", status.len()),
        status,
    )))
}

pub async fn enable_modules(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    caller: Caller,
    Json(payload): Json<ModuleChangeRequest>,
) -> ApiResult<Json<SuccessResponse<ModuleChanges>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    let tenant = state.catalog.get_tenant(id).await?;

    if payload.dry_run {
        let preview = state.modules.preview_changes(tenant.id, &payload.modules, true).await?;
        let changes = ModuleChanges::Planned(preview);
        return Ok(Json(SuccessResponse::with_data(changes.message(), changes)));
    }

    let results = match (payload.modules.as_slice(), payload.config) {
        ([single], Some(config)) => {
            state
                .modules
                .enable_module(tenant.id, single, Some(config), caller.actor_id())
                .await?;
            vec![ModuleChangeResult {
                module: single.clone(),
                success: true,
                error: None,
            }]
        }
        (names, _) => state.modules.enable_modules(tenant.id, names, caller.actor_id()).await,
    };

    info!(tenant_id = %tenant.id, modules = ?payload.modules, "Modules enabled");
    let changes = ModuleChanges::Applied(results);
    Ok(Json(SuccessResponse::with_data(changes.message(), changes)))
}

pub async fn disable_modules(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    caller: Caller,
    Json(payload): Json<ModuleChangeRequest>,
) -> ApiResult<Json<SuccessResponse<ModuleChanges>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    let tenant = state.catalog.get_tenant(id).await?;

    if payload.dry_run {
        let preview = state.modules.preview_changes(tenant.id, &payload.modules, false).await?;
        let changes = ModuleChanges::Planned(preview);
        return Ok(Json(SuccessResponse::with_data(changes.message(), changes)));
    }

    let results = state
        .modules
        .disable_modules(tenant.id, &payload.modules, caller.actor_id())
        .await;

    info!(tenant_id = %tenant.id, modules = ?payload.modules, "Modules disabled");
    let changes = ModuleChanges::Applied(results);
    Ok(Json(SuccessResponse::with_data(changes.message(), changes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_change_request_dry_run_defaults_off() {
        let request: ModuleChangeRequest = serde_json::from_str(r#"{"modules": ["billing"]}"#).unwrap();
        assert!(!request.dry_run);
        let request: ModuleChangeRequest =
            serde_json::from_str(r#"{"modules": ["billing"], "dryRun": true}"#).unwrap();
        assert!(request.dry_run);
    }

    #[test]
    fn test_dry_run_message_counts_changing_modules() {
        let changes = ModuleChanges::Planned(vec![
            ModuleChangePreview {
                module: "billing".to_string(),
                currently_enabled: false,
                would_change: true,
                error: None,
            },
            ModuleChangePreview {
                module: "pharmacy".to_string(),
                currently_enabled: true,
                would_change: false,
                error: None,
            },
        ]);
        assert_eq!(changes.message(), "Dry run: 1 module(s) would change.");
    }
}
