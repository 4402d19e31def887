//! Tenant catalog
//!
//! Persistence of tenants, module activations and access clients, kept in
//! the catalog database. Unit tests use an in-memory catalog.

#[cfg(test)]
mod memory;
mod postgres;

#[cfg(test)]
pub(crate) use memory::InMemoryCatalog;
pub use postgres::PgCatalog;

use crate::error::CatalogError;
use crate::models::{AccessClient, ActivationChange, ModuleActivation, Tenant, TenantStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Statuses a tenant may hold while receiving migrations or connections
pub const CONNECTABLE_STATUSES: [TenantStatus; 2] = [TenantStatus::Active, TenantStatus::Provisioning];

#[async_trait]
pub trait TenantCatalog: Send + Sync {
    /// Create the catalog tables if they do not exist
    async fn bootstrap(&self) -> Result<(), CatalogError>;

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), CatalogError>;

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>, CatalogError>;

    /// Tenants ordered by creation time, optionally restricted to `statuses`
    async fn list_tenants(&self, statuses: Option<&[TenantStatus]>) -> Result<Vec<Tenant>, CatalogError>;

    /// Move a tenant to `status`, rejecting transitions the lifecycle forbids
    async fn update_status(
        &self,
        id: Uuid,
        status: TenantStatus,
        provisioned_at: Option<DateTime<Utc>>,
    ) -> Result<Tenant, CatalogError>;

    async fn upsert_activation(&self, change: &ActivationChange) -> Result<ModuleActivation, CatalogError>;

    async fn list_activations(&self, tenant_id: Uuid) -> Result<Vec<ModuleActivation>, CatalogError>;

    async fn find_access_client(&self, tenant_id: Uuid) -> Result<Option<AccessClient>, CatalogError>;

    async fn insert_access_client(&self, client: &AccessClient) -> Result<(), CatalogError>;

    async fn get_tenant(&self, id: Uuid) -> Result<Tenant, CatalogError> {
        self.find_tenant(id)
            .await?
            .ok_or_else(|| CatalogError::TenantNotFound(id.to_string()))
    }
}

pub(crate) fn check_transition(tenant: &Tenant, next: TenantStatus) -> Result<(), CatalogError> {
    if tenant.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(CatalogError::InvalidTransition {
            tenant: tenant.id,
            from: tenant.status,
            to: next,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_tenant(slug: &str) -> Tenant {
    use crate::models::{CreateTenant, DatabaseParams};

    Tenant::new(
        CreateTenant {
            external_id: format!("ext-{}", slug),
            name: format!("Hospital {}", slug),
            slug: slug.to_string(),
            database: None,
        },
        DatabaseParams {
            host: "localhost".to_string(),
            port: 5432,
            database: format!("hms_{}", slug),
            username: "postgres".to_string(),
            password: String::new(),
        },
    )
}
