//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::auth::TokenVerifier;
use crate::broker::ConnectionBroker;
use crate::catalog::TenantCatalog;
use crate::config::Settings;
use crate::modules::ModuleRegistry;
use crate::provisioning::ProvisioningOrchestrator;
use crate::schema::ExpectedSchema;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Tenant and module-activation records
    pub catalog: Arc<dyn TenantCatalog>,

    /// Per-tenant connection pools
    pub broker: Arc<ConnectionBroker>,

    pub modules: Arc<ModuleRegistry>,

    pub orchestrator: Arc<ProvisioningOrchestrator>,

    /// Schema tenant databases are validated and converged against
    pub expected_schema: Arc<ExpectedSchema>,

    /// Verifier for bearer tokens issued by the hospital application
    pub tokens: TokenVerifier,

    pub settings: Settings,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn TenantCatalog>,
        broker: Arc<ConnectionBroker>,
        modules: Arc<ModuleRegistry>,
        orchestrator: Arc<ProvisioningOrchestrator>,
        expected_schema: Arc<ExpectedSchema>,
        settings: Settings,
    ) -> Self {
        Self {
            tokens: TokenVerifier::new(&settings.auth.jwt_secret),
            catalog,
            broker,
            modules,
            orchestrator,
            expected_schema,
            settings,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
