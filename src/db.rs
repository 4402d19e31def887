//! Database connection management
//!
//! Pool construction for the catalog, the admin server and tenant databases,
//! identifier validation, and the server-level operations (CREATE/DROP
//! DATABASE, roles) that cannot run inside a transaction.

pub mod queries;

use crate::config::DatabaseConfig;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use once_cell::sync::Lazy;
use queries::SqlBuilder;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};
use validator::ValidationError;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("static regex"));

static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:[-_][a-z0-9]+)*$").expect("static regex"));

/// Errors raised while building pools or talking to the admin server
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to create pool: {0}")]
    CreatePool(String),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Connection parameters for a single pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_size: usize,
    pub connect_timeout: Duration,
    pub tls: bool,
}

impl From<&DatabaseConfig> for PoolSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            max_size: config.max_pool_size,
            connect_timeout: config.connect_timeout,
            tls: config.tls,
        }
    }
}

/// Create a connection pool. Connections are opened lazily on first use.
pub fn create_pool(settings: &PoolSettings) -> Result<Pool, DbError> {
    let mut cfg = Config::new();
    cfg.host = Some(settings.host.clone());
    cfg.port = Some(settings.port);
    cfg.user = Some(settings.user.clone());
    cfg.password = Some(settings.password.clone());
    cfg.dbname = Some(settings.database.clone());
    cfg.connect_timeout = Some(settings.connect_timeout);
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig {
        max_size: settings.max_size.max(1),
        timeouts: Timeouts {
            wait: Some(settings.connect_timeout),
            create: Some(settings.connect_timeout),
            recycle: None,
        },
        ..Default::default()
    });

    if settings.tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| DbError::CreatePool(format!("TLS pool for '{}': {}", settings.database, e)))
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DbError::CreatePool(format!("pool for '{}': {}", settings.database, e)))
    }
}

/// Validate a SQL identifier (database, table or role name)
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 63 {
        let mut err = ValidationError::new("identifier_length");
        err.message = Some("Identifier must be between 1 and 63 characters".into());
        return Err(err);
    }
    if !IDENTIFIER_RE.is_match(name) {
        let mut err = ValidationError::new("identifier_format");
        err.message = Some(
            "Identifier must start with a letter or underscore and contain only letters, numbers and underscores"
                .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Validate a tenant slug (lowercase, digits, single `-`/`_` separators)
pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    if slug.is_empty() || slug.len() > 48 {
        let mut err = ValidationError::new("slug_length");
        err.message = Some("Slug must be between 1 and 48 characters".into());
        return Err(err);
    }
    if !SLUG_RE.is_match(slug) {
        let mut err = ValidationError::new("slug_format");
        err.message = Some("Slug may contain lowercase letters, digits, '-' and '_'".into());
        return Err(err);
    }
    Ok(())
}

/// Database name for a tenant slug, e.g. `hms_` + `st-mary` -> `hms_st_mary`
pub fn tenant_database_name(prefix: &str, slug: &str) -> String {
    format!("{}{}", prefix, slug.replace('-', "_"))
}

/// Server-level operations issued through the admin connection
#[derive(Clone)]
pub struct DatabaseAdmin {
    pool: Pool,
    encoding: String,
    collation: String,
}

impl DatabaseAdmin {
    pub fn new(pool: Pool, encoding: impl Into<String>, collation: impl Into<String>) -> Self {
        Self {
            pool,
            encoding: encoding.into(),
            collation: collation.into(),
        }
    }

    /// Build the admin pool and check it answers
    pub async fn connect(config: &DatabaseConfig, encoding: &str, collation: &str) -> Result<Self, DbError> {
        let pool = create_pool(&PoolSettings::from(config))?;
        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        drop(client);

        info!(host = %config.host, "Admin connection pool established");
        Ok(Self::new(pool, encoding, collation))
    }

    pub async fn database_exists(&self, name: &str) -> Result<bool, DbError> {
        let client = self.pool.get().await?;
        let row = client.query_one(queries::DATABASE_EXISTS, &[&name]).await?;
        Ok(row.get("exists"))
    }

    pub async fn create_database(&self, name: &str, owner: Option<&str>) -> Result<(), DbError> {
        validate_identifier(name).map_err(|_| DbError::InvalidIdentifier(name.to_string()))?;
        let sql = SqlBuilder::create_database(name, owner, &self.encoding, &self.collation);
        let client = self.pool.get().await?;
        client.batch_execute(&sql).await?;
        info!(database = %name, encoding = %self.encoding, collation = %self.collation, "Created database");
        Ok(())
    }

    /// Drop a database, terminating any sessions still attached to it
    pub async fn drop_database(&self, name: &str) -> Result<(), DbError> {
        validate_identifier(name).map_err(|_| DbError::InvalidIdentifier(name.to_string()))?;
        let client = self.pool.get().await?;
        client.batch_execute(&SqlBuilder::drop_database(name)).await?;
        warn!(database = %name, "Dropped database");
        Ok(())
    }

    /// Create a login role unless it already exists
    pub async fn ensure_role(&self, name: &str, password: &str) -> Result<bool, DbError> {
        validate_identifier(name).map_err(|_| DbError::InvalidIdentifier(name.to_string()))?;
        let client = self.pool.get().await?;
        let row = client.query_one(queries::ROLE_EXISTS, &[&name]).await?;
        if row.get::<_, bool>("exists") {
            debug!(role = %name, "Role already exists");
            return Ok(false);
        }
        client
            .batch_execute(&SqlBuilder::create_login_role(name, password))
            .await?;
        info!(role = %name, "Created tenant role");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("hms_st_mary").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("drop table;").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("st-mary").is_ok());
        assert!(validate_slug("general_2").is_ok());
        assert!(validate_slug("St-Mary").is_err());
        assert!(validate_slug("-leading").is_err());
        assert!(validate_slug("double--dash").is_err());
    }

    #[test]
    fn test_tenant_database_name() {
        assert_eq!(tenant_database_name("hms_", "st-mary"), "hms_st_mary");
        assert!(validate_identifier(&tenant_database_name("hms_", "st-mary")).is_ok());
    }

    #[test]
    fn test_create_pool_is_lazy() {
        let settings = PoolSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "nobody".to_string(),
            password: String::new(),
            database: "missing".to_string(),
            max_size: 0,
            connect_timeout: Duration::from_millis(200),
            tls: false,
        };
        let pool = create_pool(&settings).unwrap();
        assert_eq!(pool.status().max_size, 1);
    }
}
