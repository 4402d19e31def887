//! Shared setup for database-backed tests.
//!
//! Every test needs a Postgres server reachable through `TEST_DATABASE_URL`
//! with rights to create databases; without it the tests return early.
//! Tenant databases get a per-run prefix so parallel runs do not collide.

#![allow(dead_code)]

use hms_tenancy::broker::{BrokerConfig, ConnectionBroker};
use hms_tenancy::catalog::{PgCatalog, TenantCatalog};
use hms_tenancy::config::Settings;
use hms_tenancy::db::{create_pool, tenant_database_name, DatabaseAdmin, PoolSettings};
use hms_tenancy::models::{CreateTenant, DatabaseParams, Tenant, TenantStatus};
use hms_tenancy::modules::ModuleRegistry;
use hms_tenancy::provisioning::ProvisioningOrchestrator;
use hms_tenancy::schema::{builtin_schema, ExpectedSchema};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Harness {
    pub settings: Settings,
    pub catalog: Arc<dyn TenantCatalog>,
    pub broker: Arc<ConnectionBroker>,
    pub modules: Arc<ModuleRegistry>,
    pub admin: DatabaseAdmin,
    pub orchestrator: ProvisioningOrchestrator,
}

/// Build the full stack against `TEST_DATABASE_URL`, or `None` when unset
pub async fn harness() -> Option<Harness> {
    harness_with_schema(builtin_schema().clone()).await
}

/// Same as [`harness`], migrating tenants from `schema`
pub async fn harness_with_schema(schema: ExpectedSchema) -> Option<Harness> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let prefix = format!("hms_t{}_", &Uuid::new_v4().simple().to_string()[..8]);

    let vars: HashMap<&str, String> = HashMap::from([
        ("DATABASE_URL", url),
        ("TENANT_DB_PREFIX", prefix),
        ("TENANT_DB_COLLATION", "C".to_string()),
        ("TENANT_CACHE_TTL_SECS", "60".to_string()),
    ]);
    let settings = Settings::from_lookup(|key| vars.get(key).cloned()).expect("test settings");

    let catalog = PgCatalog::new(create_pool(&PoolSettings::from(&settings.catalog)).expect("catalog pool"));
    catalog.bootstrap().await.expect("catalog bootstrap");
    let catalog: Arc<dyn TenantCatalog> = Arc::new(catalog);

    let admin = DatabaseAdmin::connect(&settings.admin, &settings.tenancy.encoding, &settings.tenancy.collation)
        .await
        .expect("admin connection");

    let broker = Arc::new(ConnectionBroker::new(
        catalog.clone(),
        BrokerConfig {
            pool_size: 2,
            connect_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            tls: settings.catalog.tls,
        },
    ));
    let modules = Arc::new(ModuleRegistry::new(catalog.clone(), Duration::from_secs(60)));
    let orchestrator = ProvisioningOrchestrator::new(
        catalog.clone(),
        broker.clone(),
        admin.clone(),
        modules.clone(),
        settings.tenancy.clone(),
        Arc::new(schema),
    );

    Some(Harness {
        settings,
        catalog,
        broker,
        modules,
        admin,
        orchestrator,
    })
}

impl Harness {
    /// Register a tenant whose database lives on the test server
    pub async fn register_tenant(&self, slug: &str) -> Tenant {
        let database = DatabaseParams {
            host: self.settings.admin.host.clone(),
            port: self.settings.admin.port,
            database: tenant_database_name(&self.settings.tenancy.database_prefix, slug),
            username: self.settings.admin.user.clone(),
            password: self.settings.admin.password.clone(),
        };
        let tenant = Tenant::new(
            CreateTenant {
                external_id: format!("ext-{}-{}", slug, Uuid::new_v4()),
                name: format!("Hospital {}", slug),
                slug: slug.to_string(),
                database: None,
            },
            database,
        );
        self.catalog.insert_tenant(&tenant).await.expect("insert tenant");
        tenant
    }

    /// Create the tenant's database without running anything in it
    pub async fn create_empty_database(&self, tenant: &Tenant) {
        self.admin
            .create_database(&tenant.database.database, None)
            .await
            .expect("create tenant database");
    }

    /// Drop the databases created for `tenants` and retire their catalog
    /// rows so later bulk runs do not pick them up
    pub async fn cleanup(&self, tenants: &[&Tenant]) {
        for tenant in tenants {
            self.broker.evict(tenant.id);
            let _ = self.admin.drop_database(&tenant.database.database).await;

            if let Ok(current) = self.catalog.get_tenant(tenant.id).await {
                if current.status == TenantStatus::Provisioning {
                    let _ = self.catalog.update_status(tenant.id, TenantStatus::Active, None).await;
                }
                let _ = self.catalog.update_status(tenant.id, TenantStatus::Inactive, None).await;
            }
        }
    }
}

/// Slug unique to this run
pub fn unique_slug(base: &str) -> String {
    format!("{}-{}", base, &Uuid::new_v4().simple().to_string()[..8])
}
