//! HMS tenancy service
//!
//! Operator API for the per-hospital database lifecycle: tenant catalog,
//! provisioning, migrations, feature modules and schema convergence.

use anyhow::Context;
use hms_tenancy::broker::{BrokerConfig, ConnectionBroker};
use hms_tenancy::catalog::{PgCatalog, TenantCatalog};
use hms_tenancy::config::{LogFormat, Settings};
use hms_tenancy::db::{create_pool, DatabaseAdmin, PoolSettings};
use hms_tenancy::modules::ModuleRegistry;
use hms_tenancy::provisioning::ProvisioningOrchestrator;
use hms_tenancy::routes::create_router;
use hms_tenancy::schema::load_expected_schema;
use hms_tenancy::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize tracing subscriber for structured logging
    init_tracing(settings.log_format);

    info!("🚀 Starting HMS tenancy service...");
    info!("📋 Configuration loaded successfully");

    if !settings.auth.required {
        warn!("⚠️  AUTH_REQUIRED is off, operator API accepts unauthenticated requests");
    }

    // Catalog database, required
    let catalog_pool = create_pool(&PoolSettings::from(&settings.catalog)).context("Failed to create catalog pool")?;
    let catalog = PgCatalog::new(catalog_pool);
    catalog.bootstrap().await.context("Failed to bootstrap catalog tables")?;
    let catalog: Arc<dyn TenantCatalog> = Arc::new(catalog);
    info!("✅ Catalog ready at {}/{}", settings.catalog.host, settings.catalog.database);

    // Server-level connection for CREATE/DROP DATABASE
    let admin = DatabaseAdmin::connect(&settings.admin, &settings.tenancy.encoding, &settings.tenancy.collation)
        .await
        .context("Failed to connect to the admin database")?;

    let tenancy = &settings.tenancy;
    let broker = Arc::new(ConnectionBroker::new(
        catalog.clone(),
        BrokerConfig {
            pool_size: tenancy.pool_size,
            connect_timeout: tenancy.connect_timeout,
            cache_ttl: tenancy.cache_ttl,
            tls: settings.catalog.tls,
        },
    ));
    broker.set_fallback_tenant(tenancy.fallback_tenant);

    let expected_schema = Arc::new(
        load_expected_schema(tenancy.expected_schema_path.as_deref()).context("Failed to load expected schema")?,
    );
    info!("📐 Expected schema: {} table(s)", expected_schema.len());

    let modules = Arc::new(ModuleRegistry::new(catalog.clone(), tenancy.cache_ttl));
    let orchestrator = Arc::new(ProvisioningOrchestrator::new(
        catalog.clone(),
        broker.clone(),
        admin,
        modules.clone(),
        tenancy.clone(),
        expected_schema.clone(),
    ));

    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    let state = Arc::new(AppState::new(
        catalog,
        broker,
        modules,
        orchestrator,
        expected_schema,
        settings,
    ));

    // Build the router
    let app = create_router(state);

    info!("🌐 Server listening on http://{}", addr);
    info!("📚 API Endpoints:");
    info!("   POST /api/tenants                      - Register a tenant");
    info!("   POST /api/tenants/{{id}}/provision       - Provision one tenant");
    info!("   POST /api/tenants/provision            - Provision all tenants");
    info!("   POST /api/tenants/migrate              - Migrate all tenants");
    info!("   GET  /api/tenants/{{id}}/schema/validate - Validate tenant schema");
    info!("   POST /api/tenants/{{id}}/schema/sync     - Converge tenant schema");
    info!("   GET  /api/modules                      - Available feature modules");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hms_tenancy=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init(),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
