//! Feature-module activation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-tenant activation row, unique on (tenant_id, module)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleActivation {
    pub tenant_id: Uuid,
    pub module: String,
    pub is_enabled: bool,
    pub config: serde_json::Value,
    pub enabled_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub actor_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// A toggle to upsert into the catalog
#[derive(Debug, Clone)]
pub struct ActivationChange {
    pub tenant_id: Uuid,
    pub module: String,
    pub enabled: bool,
    /// Replaces the stored config when present, keeps it otherwise
    pub config: Option<serde_json::Value>,
    pub actor_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl ActivationChange {
    /// Apply this change on top of an existing row (or none)
    pub fn apply_to(&self, existing: Option<&ModuleActivation>) -> ModuleActivation {
        let config = self
            .config
            .clone()
            .or_else(|| existing.map(|a| a.config.clone()))
            .unwrap_or_else(|| serde_json::json!({}));

        let (enabled_at, disabled_at) = if self.enabled {
            (Some(self.at), existing.and_then(|a| a.disabled_at))
        } else {
            (existing.and_then(|a| a.enabled_at), Some(self.at))
        };

        ModuleActivation {
            tenant_id: self.tenant_id,
            module: self.module.clone(),
            is_enabled: self.enabled,
            config,
            enabled_at,
            disabled_at,
            actor_id: self.actor_id,
            updated_at: self.at,
        }
    }
}

/// One line of the available x enabled report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    pub module: String,
    pub description: String,
    pub available: bool,
    pub enabled: bool,
}

/// Default API access client registered for a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClient {
    pub client_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub secret_hash: String,
    pub created_at: DateTime<Utc>,
}
