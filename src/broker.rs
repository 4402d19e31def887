//! Tenant connection broker
//!
//! Keeps one lazily created pool per tenant database, keyed by tenant id.
//! Which tenant a unit of work talks to is held by an explicit
//! [`TenantContext`]; a context is connected to at most one tenant at a time.
//! [`TenantSession`] wraps a context and disconnects it when dropped.

use crate::catalog::TenantCatalog;
use crate::db::{create_pool, PoolSettings};
use crate::error::{CatalogError, ConnectionError};
use crate::models::{DatabaseParams, Tenant};
use deadpool_postgres::{Object, Pool, PoolError};
use moka::sync::Cache;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pool settings shared by every tenant pool
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub pool_size: usize,
    pub connect_timeout: Duration,
    pub cache_ttl: Duration,
    pub tls: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            connect_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
            tls: false,
        }
    }
}

/// A registered tenant pool
pub struct TenantPool {
    tenant_id: Uuid,
    params: DatabaseParams,
    pool: Pool,
    /// Contexts currently connected through this pool
    holders: AtomicUsize,
}

impl TenantPool {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn params(&self) -> &DatabaseParams {
        &self.params
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl fmt::Debug for TenantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantPool")
            .field("tenant_id", &self.tenant_id)
            .field("database", &self.params.to_display_string())
            .field("holders", &self.holders.load(Ordering::SeqCst))
            .finish()
    }
}

#[derive(Debug)]
struct Connected {
    tenant: Tenant,
    pool: Arc<TenantPool>,
}

/// The tenant a unit of work is currently bound to
#[derive(Debug, Default)]
pub struct TenantContext {
    current: Option<Connected>,
}

impl TenantContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        self.current.as_ref().map(|c| &c.tenant)
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.tenant().map(|t| t.id)
    }
}

/// Result of probing a tenant database
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    pub latency_ms: u64,
    pub server_version: String,
    pub database: String,
    pub host: String,
}

pub struct ConnectionBroker {
    catalog: Arc<dyn TenantCatalog>,
    registry: RwLock<HashMap<Uuid, Arc<TenantPool>>>,
    tenants: Cache<Uuid, Tenant>,
    fallback: RwLock<Option<Uuid>>,
    config: BrokerConfig,
}

fn pool_failure(database: &str, err: PoolError) -> ConnectionError {
    let code = match &err {
        PoolError::Backend(e) => e.code().cloned(),
        _ => None,
    };
    ConnectionError::Failed {
        database: database.to_string(),
        reason: err.to_string(),
        code,
    }
}

fn query_failure(database: &str, err: tokio_postgres::Error) -> ConnectionError {
    ConnectionError::Failed {
        database: database.to_string(),
        reason: err.to_string(),
        code: err.code().cloned(),
    }
}

impl ConnectionBroker {
    pub fn new(catalog: Arc<dyn TenantCatalog>, config: BrokerConfig) -> Self {
        let tenants = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            catalog,
            registry: RwLock::new(HashMap::new()),
            tenants,
            fallback: RwLock::new(None),
            config,
        }
    }

    fn pool_settings(&self, params: &DatabaseParams, max_size: usize) -> PoolSettings {
        PoolSettings {
            host: params.host.clone(),
            port: params.port,
            user: params.username.clone(),
            password: params.password.clone(),
            database: params.database.clone(),
            max_size,
            connect_timeout: self.config.connect_timeout,
            tls: self.config.tls,
        }
    }

    /// Bind `ctx` to `tenant`, opening (or reusing) the tenant's pool
    pub async fn connect(&self, ctx: &mut TenantContext, tenant: &Tenant) -> Result<(), ConnectionError> {
        if !tenant.status.is_connectable() {
            return Err(ConnectionError::InvalidStatus {
                tenant: tenant.slug.clone(),
                status: tenant.status,
            });
        }

        if let Some(current) = &ctx.current {
            if current.tenant.id != tenant.id {
                return Err(ConnectionError::ContextBusy {
                    current: current.tenant.id,
                    requested: tenant.id,
                });
            }
            if current.pool.params == tenant.database {
                debug!(tenant_id = %tenant.id, "Context already connected");
                return Ok(());
            }
            // Same tenant, new parameters: drop the old binding first
            self.disconnect(ctx);
        }

        let entry = self.acquire_pool(tenant)?;

        let ping = async {
            let client = entry
                .pool
                .get()
                .await
                .map_err(|e| pool_failure(&tenant.database.database, e))?;
            client
                .query_one("SELECT 1", &[])
                .await
                .map_err(|e| query_failure(&tenant.database.database, e))?;
            Ok::<(), ConnectionError>(())
        };
        if let Err(err) = ping.await {
            self.release(&entry);
            warn!(tenant_id = %tenant.id, error = %err, "Tenant connection failed");
            return Err(err);
        }

        self.tenants.insert(tenant.id, tenant.clone());
        ctx.current = Some(Connected {
            tenant: tenant.clone(),
            pool: entry,
        });

        info!(
            tenant_id = %tenant.id,
            database = %tenant.database.database,
            "Connected to tenant database"
        );
        Ok(())
    }

    /// Release whatever `ctx` is bound to. Safe to call on an idle context.
    pub fn disconnect(&self, ctx: &mut TenantContext) {
        if let Some(connected) = ctx.current.take() {
            self.tenants.invalidate(&connected.tenant.id);
            self.release(&connected.pool);
            debug!(tenant_id = %connected.tenant.id, "Disconnected tenant context");
        }
    }

    fn acquire_pool(&self, tenant: &Tenant) -> Result<Arc<TenantPool>, ConnectionError> {
        let mut registry = self.registry.write();

        if let Some(existing) = registry.get(&tenant.id) {
            if existing.params == tenant.database {
                existing.holders.fetch_add(1, Ordering::SeqCst);
                return Ok(existing.clone());
            }
            warn!(tenant_id = %tenant.id, "Tenant connection parameters changed, replacing pool");
            if let Some(stale) = registry.remove(&tenant.id) {
                stale.pool.close();
            }
        }

        let pool = create_pool(&self.pool_settings(&tenant.database, self.config.pool_size)).map_err(|e| {
            ConnectionError::Failed {
                database: tenant.database.database.clone(),
                reason: e.to_string(),
                code: None,
            }
        })?;

        let entry = Arc::new(TenantPool {
            tenant_id: tenant.id,
            params: tenant.database.clone(),
            pool,
            holders: AtomicUsize::new(1),
        });
        registry.insert(tenant.id, entry.clone());
        Ok(entry)
    }

    fn release(&self, entry: &Arc<TenantPool>) {
        let mut registry = self.registry.write();
        if entry.holders.fetch_sub(1, Ordering::SeqCst) > 1 {
            return;
        }
        if registry
            .get(&entry.tenant_id)
            .is_some_and(|registered| Arc::ptr_eq(registered, entry))
        {
            registry.remove(&entry.tenant_id);
        }
        entry.pool.close();
    }

    /// Pool of the tenant `ctx` is connected to
    pub fn pool_for(&self, ctx: &TenantContext) -> Result<Pool, ConnectionError> {
        ctx.current
            .as_ref()
            .map(|c| c.pool.pool.clone())
            .ok_or(ConnectionError::NotConnected)
    }

    /// Close and forget a tenant's pool regardless of who holds it
    pub fn evict(&self, tenant_id: Uuid) {
        if let Some(entry) = self.registry.write().remove(&tenant_id) {
            entry.pool.close();
            info!(tenant_id = %tenant_id, "Evicted tenant pool");
        }
        self.tenants.invalidate(&tenant_id);
    }

    pub fn is_registered(&self, tenant_id: Uuid) -> bool {
        self.registry.read().contains_key(&tenant_id)
    }

    pub fn registered_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Drop the cached record of a tenant after it changed in the catalog
    pub fn invalidate_tenant(&self, tenant_id: Uuid) {
        self.tenants.invalidate(&tenant_id);
    }

    pub fn set_fallback_tenant(&self, tenant_id: Option<Uuid>) {
        *self.fallback.write() = tenant_id;
    }

    /// Resolve the tenant for a unit of work: the context's tenant, then the
    /// caller's tenant, then the registered fallback.
    pub async fn current_tenant(
        &self,
        ctx: &TenantContext,
        caller_tenant: Option<Uuid>,
    ) -> Result<Option<Tenant>, CatalogError> {
        if let Some(tenant) = ctx.tenant() {
            return Ok(Some(tenant.clone()));
        }

        if let Some(id) = caller_tenant {
            if let Some(tenant) = self.lookup_tenant(id).await? {
                return Ok(Some(tenant));
            }
        }

        let fallback = *self.fallback.read();
        match fallback {
            Some(id) => self.lookup_tenant(id).await,
            None => Ok(None),
        }
    }

    async fn lookup_tenant(&self, id: Uuid) -> Result<Option<Tenant>, CatalogError> {
        if let Some(tenant) = self.tenants.get(&id) {
            return Ok(Some(tenant));
        }
        let found = self.catalog.find_tenant(id).await?;
        if let Some(tenant) = &found {
            self.tenants.insert(id, tenant.clone());
        }
        Ok(found)
    }

    /// Probe a tenant database through a throwaway pool. Touches neither the
    /// registry nor any context.
    pub async fn test_connection(&self, tenant: &Tenant) -> Result<ConnectionTestResult, ConnectionError> {
        let alias = format!("conntest_{}", Uuid::new_v4().simple());
        let database = tenant.database.database.clone();
        let pool = create_pool(&self.pool_settings(&tenant.database, 1)).map_err(|e| {
            ConnectionError::Failed {
                database: database.clone(),
                reason: e.to_string(),
                code: None,
            }
        })?;
        debug!(alias = %alias, database = %database, "Opened connection test pool");

        let start = Instant::now();
        let outcome = async {
            let client = pool.get().await.map_err(|e| pool_failure(&database, e))?;
            let row = client
                .query_one("SELECT version()", &[])
                .await
                .map_err(|e| query_failure(&database, e))?;
            Ok::<String, ConnectionError>(row.get(0))
        }
        .await;
        let latency = start.elapsed();

        pool.close();
        debug!(alias = %alias, "Closed connection test pool");

        let server_version = outcome?;
        Ok(ConnectionTestResult {
            success: true,
            latency_ms: latency.as_millis() as u64,
            server_version,
            database,
            host: tenant.database.host.clone(),
        })
    }

    /// Connect a fresh context to `tenant` and hand it back as a guard
    pub async fn session(&self, tenant: &Tenant) -> Result<TenantSession<'_>, ConnectionError> {
        let mut ctx = TenantContext::new();
        self.connect(&mut ctx, tenant).await?;
        Ok(TenantSession { broker: self, ctx })
    }
}

/// A connected context that disconnects when it goes out of scope
pub struct TenantSession<'a> {
    broker: &'a ConnectionBroker,
    ctx: TenantContext,
}

impl TenantSession<'_> {
    pub fn context(&self) -> &TenantContext {
        &self.ctx
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.ctx.tenant_id()
    }

    pub fn pool(&self) -> Result<Pool, ConnectionError> {
        self.broker.pool_for(&self.ctx)
    }

    /// Check out a client from the session's pool
    pub async fn client(&self) -> Result<Object, ConnectionError> {
        let connected = self.ctx.current.as_ref().ok_or(ConnectionError::NotConnected)?;
        connected
            .pool
            .pool
            .get()
            .await
            .map_err(|e| pool_failure(&connected.tenant.database.database, e))
    }
}

impl Drop for TenantSession<'_> {
    fn drop(&mut self) {
        self.broker.disconnect(&mut self.ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{sample_tenant, InMemoryCatalog};
    use crate::models::TenantStatus;
    use pretty_assertions::assert_eq;

    fn broker_with(catalog: Arc<InMemoryCatalog>) -> ConnectionBroker {
        ConnectionBroker::new(
            catalog,
            BrokerConfig {
                connect_timeout: Duration::from_millis(300),
                ..BrokerConfig::default()
            },
        )
    }

    fn unreachable(slug: &str) -> Tenant {
        let mut tenant = sample_tenant(slug);
        tenant.database.host = "127.0.0.1".to_string();
        tenant.database.port = 1;
        tenant
    }

    #[tokio::test]
    async fn test_connect_rejects_inactive_tenant() {
        let broker = broker_with(Arc::new(InMemoryCatalog::new()));
        let mut tenant = sample_tenant("closed");
        tenant.status = TenantStatus::Suspended;

        let mut ctx = TenantContext::new();
        let err = broker.connect(&mut ctx, &tenant).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidStatus { .. }));
        assert!(!ctx.is_connected());
        assert_eq!(broker.registered_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_nothing_registered() {
        let broker = broker_with(Arc::new(InMemoryCatalog::new()));
        let tenant = unreachable("offline");

        let mut ctx = TenantContext::new();
        let err = broker.connect(&mut ctx, &tenant).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Failed { .. }));
        assert!(!ctx.is_connected());
        assert!(!broker.is_registered(tenant.id));
    }

    #[tokio::test]
    async fn test_busy_context_rejects_other_tenant() {
        let broker = broker_with(Arc::new(InMemoryCatalog::new()));
        let first = unreachable("first");
        let second = unreachable("second");

        let mut ctx = TenantContext::new();
        ctx.current = Some(Connected {
            tenant: first.clone(),
            pool: broker.acquire_pool(&first).unwrap(),
        });

        let err = broker.connect(&mut ctx, &second).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::ContextBusy { current, requested } if current == first.id && requested == second.id
        ));

        broker.disconnect(&mut ctx);
        assert!(!ctx.is_connected());
        assert!(!broker.is_registered(first.id));
    }

    #[tokio::test]
    async fn test_pool_is_shared_until_last_holder_releases() {
        let broker = broker_with(Arc::new(InMemoryCatalog::new()));
        let tenant = unreachable("shared");

        let a = broker.acquire_pool(&tenant).unwrap();
        let b = broker.acquire_pool(&tenant).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        broker.release(&a);
        assert!(broker.is_registered(tenant.id));
        broker.release(&b);
        assert!(!broker.is_registered(tenant.id));
    }

    #[tokio::test]
    async fn test_changed_parameters_replace_stale_pool() {
        let broker = broker_with(Arc::new(InMemoryCatalog::new()));
        let mut tenant = unreachable("moved");

        let old = broker.acquire_pool(&tenant).unwrap();
        tenant.database.database = "hms_moved_v2".to_string();
        let new = broker.acquire_pool(&tenant).unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.pool().is_closed());

        // Releasing the stale pool must not unregister the replacement
        broker.release(&old);
        assert!(broker.is_registered(tenant.id));
        broker.release(&new);
        assert_eq!(broker.registered_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_pool_for_requires_connection() {
        let broker = broker_with(Arc::new(InMemoryCatalog::new()));
        let mut ctx = TenantContext::new();
        broker.disconnect(&mut ctx);
        broker.disconnect(&mut ctx);
        assert!(matches!(broker.pool_for(&ctx), Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_session_drop_releases_pool() {
        let broker = broker_with(Arc::new(InMemoryCatalog::new()));
        let tenant = unreachable("scoped");

        {
            let session = TenantSession {
                broker: &broker,
                ctx: TenantContext {
                    current: Some(Connected {
                        tenant: tenant.clone(),
                        pool: broker.acquire_pool(&tenant).unwrap(),
                    }),
                },
            };
            assert_eq!(session.tenant_id(), Some(tenant.id));
            assert!(broker.is_registered(tenant.id));
        }

        assert!(!broker.is_registered(tenant.id));
    }

    #[tokio::test]
    async fn test_current_tenant_resolution_order() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let caller = sample_tenant("caller");
        let fallback = sample_tenant("fallback");
        catalog.insert_tenant(&caller).await.unwrap();
        catalog.insert_tenant(&fallback).await.unwrap();
        let broker = broker_with(catalog);
        let ctx = TenantContext::new();

        assert_eq!(broker.current_tenant(&ctx, None).await.unwrap(), None);

        broker.set_fallback_tenant(Some(fallback.id));
        let resolved = broker.current_tenant(&ctx, None).await.unwrap();
        assert_eq!(resolved.map(|t| t.id), Some(fallback.id));

        let resolved = broker.current_tenant(&ctx, Some(caller.id)).await.unwrap();
        assert_eq!(resolved.map(|t| t.id), Some(caller.id));

        // Unknown caller tenant falls through to the fallback
        let resolved = broker.current_tenant(&ctx, Some(Uuid::new_v4())).await.unwrap();
        assert_eq!(resolved.map(|t| t.id), Some(fallback.id));
    }

    #[tokio::test]
    async fn test_failed_connection_test_does_not_register() {
        let broker = broker_with(Arc::new(InMemoryCatalog::new()));
        let tenant = unreachable("offline");

        assert!(broker.test_connection(&tenant).await.is_err());
        assert_eq!(broker.registered_count(), 0);
    }
}
