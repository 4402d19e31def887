//! Tenant catalog records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Provisioning,
    Active,
    Inactive,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
            TenantStatus::Suspended => "suspended",
        }
    }

    /// Only these statuses may hold a tenant connection
    pub fn is_connectable(&self) -> bool {
        matches!(self, TenantStatus::Active | TenantStatus::Provisioning)
    }

    /// `provisioning -> active` belongs to the orchestrator; everything else
    /// is an administrative toggle between active, inactive and suspended.
    pub fn can_transition_to(&self, next: TenantStatus) -> bool {
        use TenantStatus::*;
        matches!(
            (self, next),
            (Provisioning, Active)
                | (Active, Inactive)
                | (Active, Suspended)
                | (Inactive, Active)
                | (Suspended, Active)
                | (Inactive, Suspended)
                | (Suspended, Inactive)
        )
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(TenantStatus::Provisioning),
            "active" => Ok(TenantStatus::Active),
            "inactive" => Ok(TenantStatus::Inactive),
            "suspended" => Ok(TenantStatus::Suspended),
            other => Err(format!("unknown tenant status '{}'", other)),
        }
    }
}

/// Connection parameters of a tenant database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl DatabaseParams {
    /// Connection string with the password masked, for logs and responses
    pub fn to_display_string(&self) -> String {
        format!(
            "postgres://{}:****@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

/// A tenant (one hospital) as recorded in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub slug: String,
    pub database: DatabaseParams,
    pub status: TenantStatus,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a tenant in the catalog
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenant {
    #[validate(length(min = 1, max = 64, message = "External id must be between 1 and 64 characters"))]
    pub external_id: String,

    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,

    #[validate(custom(function = "crate::db::validate_slug"))]
    pub slug: String,

    /// Explicit connection parameters; derived from settings when absent
    #[serde(default)]
    pub database: Option<DatabaseParams>,
}

impl Tenant {
    /// Build a new tenant record in `provisioning` status
    pub fn new(input: CreateTenant, database: DatabaseParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: input.external_id,
            name: input.name,
            slug: input.slug,
            database,
            status: TenantStatus::Provisioning,
            provisioned_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
