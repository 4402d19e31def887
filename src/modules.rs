//! Feature modules
//!
//! The set of installable modules is fixed at build time. Which of them a
//! tenant has enabled lives in the catalog and is cached per tenant.

use crate::catalog::TenantCatalog;
use crate::error::ModuleError;
use crate::models::{ActivationChange, ModuleActivation, ModuleStatus};
use chrono::Utc;
use moka::sync::Cache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureModule {
    pub name: &'static str,
    pub description: &'static str,
}

pub const FEATURE_MODULES: &[FeatureModule] = &[
    FeatureModule {
        name: "pharmacy",
        description: "Medication stock and dispensing",
    },
    FeatureModule {
        name: "laboratory",
        description: "Lab test catalog and results",
    },
    FeatureModule {
        name: "vaccinations",
        description: "Immunization records and schedules",
    },
    FeatureModule {
        name: "billing",
        description: "Invoices and line items",
    },
    FeatureModule {
        name: "appointments",
        description: "Outpatient scheduling",
    },
    FeatureModule {
        name: "radiology",
        description: "Imaging studies and reports",
    },
];

pub fn find_module(name: &str) -> Option<&'static FeatureModule> {
    FEATURE_MODULES.iter().find(|m| m.name == name)
}

/// Outcome of one module in a bulk enable/disable
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleChangeResult {
    pub module: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What an enable/disable would do to one module's activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleChangePreview {
    pub module: String,
    pub currently_enabled: bool,
    pub would_change: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ModuleRegistry {
    catalog: Arc<dyn TenantCatalog>,
    /// Enabled module names per tenant
    enabled: Cache<Uuid, Arc<Vec<String>>>,
    /// Bumped on every invalidation; a load that started before the bump is
    /// not cached
    generation: AtomicU64,
}

impl ModuleRegistry {
    pub fn new(catalog: Arc<dyn TenantCatalog>, cache_ttl: Duration) -> Self {
        let enabled = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(cache_ttl)
            .build();
        Self {
            catalog,
            enabled,
            generation: AtomicU64::new(0),
        }
    }

    fn ensure_registered(name: &str) -> Result<(), ModuleError> {
        find_module(name)
            .map(|_| ())
            .ok_or_else(|| ModuleError::NotRegistered(name.to_string()))
    }

    async fn set_enabled(
        &self,
        tenant_id: Uuid,
        name: &str,
        enabled: bool,
        config: Option<serde_json::Value>,
        actor_id: Option<Uuid>,
    ) -> Result<ModuleActivation, ModuleError> {
        Self::ensure_registered(name)?;

        let change = ActivationChange {
            tenant_id,
            module: name.to_string(),
            enabled,
            config,
            actor_id,
            at: Utc::now(),
        };
        let activation = self.catalog.upsert_activation(&change).await?;
        self.invalidate(tenant_id);

        info!(
            tenant_id = %tenant_id,
            module = %name,
            enabled,
            "Module {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(activation)
    }

    pub async fn enable_module(
        &self,
        tenant_id: Uuid,
        name: &str,
        config: Option<serde_json::Value>,
        actor_id: Option<Uuid>,
    ) -> Result<ModuleActivation, ModuleError> {
        self.set_enabled(tenant_id, name, true, config, actor_id).await
    }

    pub async fn disable_module(
        &self,
        tenant_id: Uuid,
        name: &str,
        actor_id: Option<Uuid>,
    ) -> Result<ModuleActivation, ModuleError> {
        self.set_enabled(tenant_id, name, false, None, actor_id).await
    }

    /// Enabled module names of a tenant, cache first
    pub async fn get_enabled_modules(&self, tenant_id: Uuid) -> Result<Arc<Vec<String>>, ModuleError> {
        if let Some(cached) = self.enabled.get(&tenant_id) {
            return Ok(cached);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let activations = self.catalog.list_activations(tenant_id).await?;
        let names: Arc<Vec<String>> = Arc::new(
            activations
                .into_iter()
                .filter(|a| a.is_enabled)
                .map(|a| a.module)
                .collect(),
        );
        debug!(tenant_id = %tenant_id, modules = ?names, "Loaded enabled modules");
        self.cache_if_current(tenant_id, generation, names.clone());
        Ok(names)
    }

    fn cache_if_current(&self, tenant_id: Uuid, generation: u64, names: Arc<Vec<String>>) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.enabled.insert(tenant_id, names);
        } else {
            debug!(tenant_id = %tenant_id, "Module list changed while loading, not caching");
        }
    }

    pub async fn is_module_enabled(&self, tenant_id: Uuid, name: &str) -> Result<bool, ModuleError> {
        Ok(self.get_enabled_modules(tenant_id).await?.iter().any(|m| m == name))
    }

    pub fn get_available_modules(&self) -> &'static [FeatureModule] {
        FEATURE_MODULES
    }

    /// Every available module with the tenant's enablement
    pub async fn get_modules_status(&self, tenant_id: Uuid) -> Result<Vec<ModuleStatus>, ModuleError> {
        let enabled = self.get_enabled_modules(tenant_id).await?;
        Ok(FEATURE_MODULES
            .iter()
            .map(|m| ModuleStatus {
                module: m.name.to_string(),
                description: m.description.to_string(),
                available: true,
                enabled: enabled.iter().any(|e| e == m.name),
            })
            .collect())
    }

    pub async fn enable_modules(
        &self,
        tenant_id: Uuid,
        names: &[String],
        actor_id: Option<Uuid>,
    ) -> Vec<ModuleChangeResult> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.enable_module(tenant_id, name, None, actor_id).await;
            results.push(Self::change_result(tenant_id, name, outcome));
        }
        results
    }

    pub async fn disable_modules(
        &self,
        tenant_id: Uuid,
        names: &[String],
        actor_id: Option<Uuid>,
    ) -> Vec<ModuleChangeResult> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.disable_module(tenant_id, name, actor_id).await;
            results.push(Self::change_result(tenant_id, name, outcome));
        }
        results
    }

    /// Preview [`enable_modules`](Self::enable_modules) (`enable`) or
    /// [`disable_modules`](Self::disable_modules) without writing
    pub async fn preview_changes(
        &self,
        tenant_id: Uuid,
        names: &[String],
        enable: bool,
    ) -> Result<Vec<ModuleChangePreview>, ModuleError> {
        let enabled = self.get_enabled_modules(tenant_id).await?;
        Ok(names
            .iter()
            .map(|name| {
                let currently_enabled = enabled.iter().any(|m| m == name);
                match Self::ensure_registered(name) {
                    Ok(()) => ModuleChangePreview {
                        module: name.clone(),
                        currently_enabled,
                        would_change: currently_enabled != enable,
                        error: None,
                    },
                    Err(e) => ModuleChangePreview {
                        module: name.clone(),
                        currently_enabled,
                        would_change: false,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect())
    }

    fn change_result(
        tenant_id: Uuid,
        name: &str,
        outcome: Result<ModuleActivation, ModuleError>,
    ) -> ModuleChangeResult {
        match outcome {
            Ok(_) => ModuleChangeResult {
                module: name.to_string(),
                success: true,
                error: None,
            },
            Err(e) => {
                warn!(tenant_id = %tenant_id, module = %name, error = %e, "Module change failed");
                ModuleChangeResult {
                    module: name.to_string(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Forget the cached module list of a tenant
    pub fn invalidate(&self, tenant_id: Uuid) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.enabled.invalidate(&tenant_id);
    }
}
