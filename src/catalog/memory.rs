use super::{check_transition, TenantCatalog};
use crate::error::CatalogError;
use crate::models::{AccessClient, ActivationChange, ModuleActivation, Tenant, TenantStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Catalog kept in process memory, with failure hooks for tests
#[derive(Default)]
pub struct InMemoryCatalog {
    tenants: RwLock<HashMap<Uuid, Tenant>>,
    activations: RwLock<HashMap<(Uuid, String), ModuleActivation>>,
    clients: RwLock<HashMap<Uuid, AccessClient>>,
    /// Modules whose activation upsert fails
    failing_modules: RwLock<HashSet<String>>,
    activation_reads: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every activation upsert for `module` fail
    pub async fn fail_module(&self, module: &str) {
        self.failing_modules.write().await.insert(module.to_string());
    }

    /// Number of `list_activations` calls served so far
    pub fn activation_reads(&self) -> usize {
        self.activation_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantCatalog for InMemoryCatalog {
    async fn bootstrap(&self) -> Result<(), CatalogError> {
        Ok(())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), CatalogError> {
        let mut tenants = self.tenants.write().await;
        let clash = tenants.values().any(|t| {
            t.id == tenant.id
                || t.external_id == tenant.external_id
                || t.slug == tenant.slug
                || t.database.database == tenant.database.database
        });
        if clash {
            return Err(CatalogError::Conflict(format!("Tenant '{}' already exists", tenant.slug)));
        }
        tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>, CatalogError> {
        Ok(self.tenants.read().await.get(&id).cloned())
    }

    async fn list_tenants(&self, statuses: Option<&[TenantStatus]>) -> Result<Vec<Tenant>, CatalogError> {
        let tenants = self.tenants.read().await;
        let mut list: Vec<Tenant> = tenants
            .values()
            .filter(|t| statuses.map_or(true, |s| s.contains(&t.status)))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TenantStatus,
        provisioned_at: Option<DateTime<Utc>>,
    ) -> Result<Tenant, CatalogError> {
        let mut tenants = self.tenants.write().await;
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| CatalogError::TenantNotFound(id.to_string()))?;
        check_transition(tenant, status)?;

        tenant.status = status;
        if provisioned_at.is_some() {
            tenant.provisioned_at = provisioned_at;
        }
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }

    async fn upsert_activation(&self, change: &ActivationChange) -> Result<ModuleActivation, CatalogError> {
        if self.failing_modules.read().await.contains(&change.module) {
            return Err(CatalogError::Corrupt(format!(
                "activation of '{}' rejected",
                change.module
            )));
        }

        let mut activations = self.activations.write().await;
        let key = (change.tenant_id, change.module.clone());
        let row = change.apply_to(activations.get(&key));
        activations.insert(key, row.clone());
        Ok(row)
    }

    async fn list_activations(&self, tenant_id: Uuid) -> Result<Vec<ModuleActivation>, CatalogError> {
        self.activation_reads.fetch_add(1, Ordering::SeqCst);
        let activations = self.activations.read().await;
        let mut rows: Vec<ModuleActivation> = activations
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.module.cmp(&b.module));
        Ok(rows)
    }

    async fn find_access_client(&self, tenant_id: Uuid) -> Result<Option<AccessClient>, CatalogError> {
        Ok(self.clients.read().await.get(&tenant_id).cloned())
    }

    async fn insert_access_client(&self, client: &AccessClient) -> Result<(), CatalogError> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.tenant_id) {
            return Err(CatalogError::Conflict(format!(
                "Access client for tenant {} already exists",
                client.tenant_id
            )));
        }
        clients.insert(client.tenant_id, client.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{sample_tenant, CONNECTABLE_STATUSES};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_insert_rejects_duplicate_slug() {
        let catalog = InMemoryCatalog::new();
        catalog.insert_tenant(&sample_tenant("stmary")).await.unwrap();

        let err = catalog.insert_tenant(&sample_tenant("stmary")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_status_enforces_lifecycle() {
        let catalog = InMemoryCatalog::new();
        let tenant = sample_tenant("general");
        catalog.insert_tenant(&tenant).await.unwrap();

        let err = catalog
            .update_status(tenant.id, TenantStatus::Suspended, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidTransition { .. }));

        let now = Utc::now();
        let active = catalog
            .update_status(tenant.id, TenantStatus::Active, Some(now))
            .await
            .unwrap();
        assert_eq!(active.status, TenantStatus::Active);
        assert_eq!(active.provisioned_at, Some(now));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let catalog = InMemoryCatalog::new();
        let a = sample_tenant("a");
        let b = sample_tenant("b");
        catalog.insert_tenant(&a).await.unwrap();
        catalog.insert_tenant(&b).await.unwrap();
        catalog.update_status(a.id, TenantStatus::Active, None).await.unwrap();
        catalog.update_status(a.id, TenantStatus::Suspended, None).await.unwrap();

        let connectable = catalog
            .list_tenants(Some(&CONNECTABLE_STATUSES))
            .await
            .unwrap();
        assert_eq!(connectable.len(), 1);
        assert_eq!(connectable[0].id, b.id);
        assert_eq!(catalog.list_tenants(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_tenant_not_found() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.get_tenant(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CatalogError::TenantNotFound(_)));
    }
}
