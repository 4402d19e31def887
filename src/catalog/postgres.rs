use super::{check_transition, TenantCatalog};
use crate::db::queries::{self, TENANT_COLUMNS};
use crate::error::CatalogError;
use crate::models::{AccessClient, ActivationChange, DatabaseParams, ModuleActivation, Tenant, TenantStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// Catalog stored in the central Postgres database
#[derive(Clone)]
pub struct PgCatalog {
    pool: Pool,
}

impl PgCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn tenant_from_row(row: &Row) -> Result<Tenant, CatalogError> {
    let status: String = row.get("status");
    let status = status.parse::<TenantStatus>().map_err(CatalogError::Corrupt)?;
    let port: i32 = row.get("db_port");
    let port = u16::try_from(port)
        .map_err(|_| CatalogError::Corrupt(format!("db_port {} out of range", port)))?;

    Ok(Tenant {
        id: row.get("id"),
        external_id: row.get("external_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        database: DatabaseParams {
            host: row.get("db_host"),
            port,
            database: row.get("db_name"),
            username: row.get("db_username"),
            password: row.get("db_password"),
        },
        status,
        provisioned_at: row.get("provisioned_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn activation_from_row(row: &Row) -> ModuleActivation {
    ModuleActivation {
        tenant_id: row.get("tenant_id"),
        module: row.get("module"),
        is_enabled: row.get("is_enabled"),
        config: row.get("config"),
        enabled_at: row.get("enabled_at"),
        disabled_at: row.get("disabled_at"),
        actor_id: row.get("actor_id"),
        updated_at: row.get("updated_at"),
    }
}

fn conflict_or(err: tokio_postgres::Error, what: &str) -> CatalogError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        CatalogError::Conflict(format!("{} already exists", what))
    } else {
        CatalogError::Database(err)
    }
}

#[async_trait]
impl TenantCatalog for PgCatalog {
    async fn bootstrap(&self) -> Result<(), CatalogError> {
        let client = self.pool.get().await?;
        client.batch_execute(queries::CREATE_TENANTS_TABLE).await?;
        client.batch_execute(queries::CREATE_MODULE_ACTIVATIONS_TABLE).await?;
        client.batch_execute(queries::CREATE_ACCESS_CLIENTS_TABLE).await?;
        client.batch_execute(queries::CREATE_CATALOG_INDEXES).await?;
        info!("Catalog tables initialized");
        Ok(())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), CatalogError> {
        let client = self.pool.get().await?;
        let port = i32::from(tenant.database.port);
        let status = tenant.status.as_str();
        client
            .execute(
                queries::INSERT_TENANT,
                &[
                    &tenant.id,
                    &tenant.external_id,
                    &tenant.name,
                    &tenant.slug,
                    &tenant.database.host,
                    &port,
                    &tenant.database.database,
                    &tenant.database.username,
                    &tenant.database.password,
                    &status,
                    &tenant.provisioned_at,
                    &tenant.created_at,
                    &tenant.updated_at,
                ],
            )
            .await
            .map_err(|e| conflict_or(e, &format!("Tenant '{}'", tenant.slug)))?;

        debug!(tenant_id = %tenant.id, slug = %tenant.slug, "Inserted tenant");
        Ok(())
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>, CatalogError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM tenants WHERE id = $1", TENANT_COLUMNS);
        client
            .query_opt(&sql, &[&id])
            .await?
            .map(|row| tenant_from_row(&row))
            .transpose()
    }

    async fn list_tenants(&self, statuses: Option<&[TenantStatus]>) -> Result<Vec<Tenant>, CatalogError> {
        let client = self.pool.get().await?;
        let statuses: Option<Vec<String>> =
            statuses.map(|s| s.iter().map(|st| st.as_str().to_string()).collect());
        let sql = format!(
            "SELECT {} FROM tenants WHERE ($1::text[] IS NULL OR status = ANY($1::text[])) \
             ORDER BY created_at, id",
            TENANT_COLUMNS
        );
        let rows = client.query(&sql, &[&statuses]).await?;
        rows.iter().map(tenant_from_row).collect()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TenantStatus,
        provisioned_at: Option<DateTime<Utc>>,
    ) -> Result<Tenant, CatalogError> {
        let current = self.get_tenant(id).await?;
        check_transition(&current, status)?;

        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE tenants SET status = $2, provisioned_at = COALESCE($3, provisioned_at), \
             updated_at = NOW() WHERE id = $1 AND status = $4 RETURNING {}",
            TENANT_COLUMNS
        );
        let row = client
            .query_opt(&sql, &[&id, &status.as_str(), &provisioned_at, &current.status.as_str()])
            .await?
            .ok_or_else(|| {
                CatalogError::Conflict(format!("Tenant {} changed status concurrently", id))
            })?;

        info!(tenant_id = %id, from = %current.status, to = %status, "Tenant status updated");
        tenant_from_row(&row)
    }

    async fn upsert_activation(&self, change: &ActivationChange) -> Result<ModuleActivation, CatalogError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                queries::UPSERT_ACTIVATION,
                &[
                    &change.tenant_id,
                    &change.module,
                    &change.enabled,
                    &change.config,
                    &change.actor_id,
                    &change.at,
                ],
            )
            .await?;
        Ok(activation_from_row(&row))
    }

    async fn list_activations(&self, tenant_id: Uuid) -> Result<Vec<ModuleActivation>, CatalogError> {
        let client = self.pool.get().await?;
        let rows = client.query(queries::LIST_ACTIVATIONS, &[&tenant_id]).await?;
        Ok(rows.iter().map(activation_from_row).collect())
    }

    async fn find_access_client(&self, tenant_id: Uuid) -> Result<Option<AccessClient>, CatalogError> {
        let client = self.pool.get().await?;
        let row = client.query_opt(queries::FIND_ACCESS_CLIENT, &[&tenant_id]).await?;
        Ok(row.map(|r| AccessClient {
            client_id: r.get("client_id"),
            tenant_id: r.get("tenant_id"),
            name: r.get("name"),
            secret_hash: r.get("secret_hash"),
            created_at: r.get("created_at"),
        }))
    }

    async fn insert_access_client(&self, access: &AccessClient) -> Result<(), CatalogError> {
        let client = self.pool.get().await?;
        client
            .execute(
                queries::INSERT_ACCESS_CLIENT,
                &[
                    &access.client_id,
                    &access.tenant_id,
                    &access.name,
                    &access.secret_hash,
                    &access.created_at,
                ],
            )
            .await
            .map_err(|e| conflict_or(e, &format!("Access client for tenant {}", access.tenant_id)))?;
        Ok(())
    }
}
