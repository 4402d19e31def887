//! Error handling module
//!
//! Domain error taxonomy for the tenancy engine plus the HTTP mapping used by
//! the operator API.

use crate::models::TenantStatus;
use crate::provisioning::ProvisioningResult;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tracing::error;
use uuid::Uuid;

/// Failures of the connection broker
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Tenant '{tenant}' cannot be connected while {status} (requires active or provisioning)")]
    InvalidStatus { tenant: String, status: TenantStatus },

    #[error("Context is connected to tenant {current}; disconnect before connecting to {requested}")]
    ContextBusy { current: Uuid, requested: Uuid },

    #[error("No tenant connected in this context")]
    NotConnected,

    #[error("Failed to connect to tenant database '{database}': {reason}")]
    Failed {
        database: String,
        reason: String,
        code: Option<SqlState>,
    },
}

impl ConnectionError {
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            ConnectionError::Failed { code, .. } => code.as_ref(),
            _ => None,
        }
    }
}

/// Failures of the catalog database
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Catalog pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition for tenant {tenant}: {from} -> {to}")]
    InvalidTransition {
        tenant: Uuid,
        from: TenantStatus,
        to: TenantStatus,
    },

    #[error("Corrupt catalog row: {0}")]
    Corrupt(String),
}

/// Per-table failures recorded by the smart migrator
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationError {
    #[error("Refusing to add non-nullable column '{column}' without a default to populated table '{table}'")]
    Unsafe { table: String, column: String },

    #[error("Migration of table '{table}' failed: {message}")]
    Generic { table: String, message: String },
}

/// Failures of the module registry
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module '{0}' is not registered")]
    NotRegistered(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Failures of the provisioning orchestrator
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("Database '{0}' already exists (pass force or skip_if_exists)")]
    DatabaseExists(String),

    #[error("Authentication infrastructure not ready for tenant {tenant}: missing tables {missing:?}")]
    AuthInfraNotReady { tenant: Uuid, missing: Vec<String> },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Migration(#[from] crate::migrator::MigrationRunError),

    #[error("Provisioning failed: {0}")]
    Generic(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ProvisioningError {
    pub fn generic(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ProvisioningError::Generic(err.into())
    }

    /// SQLSTATE of the underlying driver error, when there is one
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            ProvisioningError::Connection(e) => e.sql_state(),
            ProvisioningError::Migration(e) => e.sql_state(),
            _ => None,
        }
    }
}

impl From<crate::db::DbError> for ProvisioningError {
    fn from(err: crate::db::DbError) -> Self {
        ProvisioningError::generic(err)
    }
}

impl From<crate::seed::SeedError> for ProvisioningError {
    fn from(err: crate::seed::SeedError) -> Self {
        ProvisioningError::generic(err)
    }
}

impl From<tokio_postgres::Error> for ProvisioningError {
    fn from(err: tokio_postgres::Error) -> Self {
        ProvisioningError::generic(err)
    }
}

/// A failed provisioning run: the error that stopped it and everything that
/// was recorded up to that point.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ProvisioningFailure {
    pub result: ProvisioningResult,
    #[source]
    pub error: ProvisioningError,
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(Box<ProvisioningFailure>),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::TenantNotFound(msg) => AppError::NotFound(format!("Tenant {}", msg)),
            CatalogError::Conflict(msg) => AppError::Conflict(msg),
            CatalogError::InvalidTransition { .. } => AppError::Validation(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<ModuleError> for AppError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::NotRegistered(name) => {
                AppError::NotFound(format!("Module '{}' is not registered", name))
            }
            ModuleError::Catalog(e) => e.into(),
        }
    }
}

impl From<ProvisioningError> for AppError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::DatabaseExists(_) => AppError::Conflict(err.to_string()),
            ProvisioningError::Connection(e) => AppError::Connection(e),
            ProvisioningError::Module(e) => e.into(),
            ProvisioningError::Catalog(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<ProvisioningFailure> for AppError {
    fn from(failure: ProvisioningFailure) -> Self {
        AppError::Provisioning(Box::new(failure))
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut data = None;
        let (status, error_code, message, details) = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Database connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Connection(e) => (
                StatusCode::BAD_GATEWAY,
                "CONNECTION_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                msg.clone(),
                None,
            ),
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Provisioning(failure) => {
                data = serde_json::to_value(&failure.result).ok();
                let (status, code) = match &failure.error {
                    ProvisioningError::DatabaseExists(_) => (StatusCode::CONFLICT, "DATABASE_EXISTS"),
                    ProvisioningError::AuthInfraNotReady { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "AUTH_INFRA_NOT_READY")
                    }
                    ProvisioningError::Connection(_) => (StatusCode::BAD_GATEWAY, "CONNECTION_ERROR"),
                    ProvisioningError::Module(ModuleError::NotRegistered(_)) => {
                        (StatusCode::NOT_FOUND, "MODULE_NOT_REGISTERED")
                    }
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "PROVISIONING_ERROR"),
                };
                (
                    status,
                    code,
                    "Provisioning failed".to_string(),
                    Some(failure.error.to_string()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
            data,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_exposes_sql_state() {
        let err = ConnectionError::Failed {
            database: "tenant_a".to_string(),
            reason: "database \"tenant_a\" does not exist".to_string(),
            code: Some(SqlState::INVALID_CATALOG_NAME),
        };
        assert_eq!(err.sql_state(), Some(&SqlState::INVALID_CATALOG_NAME));

        let provisioning: ProvisioningError = err.into();
        assert_eq!(provisioning.sql_state(), Some(&SqlState::INVALID_CATALOG_NAME));
    }

    #[test]
    fn test_module_not_registered_maps_to_not_found() {
        let err: AppError = ModuleError::NotRegistered("telepathy".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_database_exists_maps_to_conflict() {
        let err: AppError = ProvisioningError::DatabaseExists("tenant_x".to_string()).into();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
