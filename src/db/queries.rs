//! SQL query constants and builders
//!
//! Contains all SQL used against the catalog, the admin server and tenant
//! databases.

// ---------------------------------------------------------------------------
// Catalog bootstrap
// ---------------------------------------------------------------------------

pub const CREATE_TENANTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS tenants (
        id UUID PRIMARY KEY,
        external_id VARCHAR(64) UNIQUE NOT NULL,
        name VARCHAR(255) NOT NULL,
        slug VARCHAR(63) UNIQUE NOT NULL,
        db_host VARCHAR(255) NOT NULL,
        db_port INTEGER NOT NULL DEFAULT 5432,
        db_name VARCHAR(63) UNIQUE NOT NULL,
        db_username VARCHAR(255) NOT NULL,
        db_password TEXT NOT NULL DEFAULT '',
        status VARCHAR(20) NOT NULL DEFAULT 'provisioning'
            CHECK (status IN ('provisioning', 'active', 'inactive', 'suspended')),
        provisioned_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

pub const CREATE_MODULE_ACTIVATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS module_activations (
        id BIGSERIAL PRIMARY KEY,
        tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
        module VARCHAR(100) NOT NULL,
        is_enabled BOOLEAN NOT NULL DEFAULT false,
        config JSONB NOT NULL DEFAULT '{}'::jsonb,
        enabled_at TIMESTAMPTZ,
        disabled_at TIMESTAMPTZ,
        actor_id UUID,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (tenant_id, module)
    )
"#;

pub const CREATE_ACCESS_CLIENTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS tenant_access_clients (
        client_id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL UNIQUE REFERENCES tenants(id) ON DELETE CASCADE,
        name VARCHAR(255) NOT NULL,
        secret_hash CHAR(64) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

pub const CREATE_CATALOG_INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_tenants_status ON tenants(status);
    CREATE INDEX IF NOT EXISTS idx_module_activations_tenant ON module_activations(tenant_id)
"#;

// ---------------------------------------------------------------------------
// Catalog queries
// ---------------------------------------------------------------------------

pub const TENANT_COLUMNS: &str = "id, external_id, name, slug, db_host, db_port, db_name, \
    db_username, db_password, status, provisioned_at, created_at, updated_at";

pub const INSERT_TENANT: &str = r#"
    INSERT INTO tenants (id, external_id, name, slug, db_host, db_port, db_name,
                         db_username, db_password, status, provisioned_at, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
"#;

pub const UPSERT_ACTIVATION: &str = r#"
    INSERT INTO module_activations
        (tenant_id, module, is_enabled, config, enabled_at, disabled_at, actor_id, updated_at)
    VALUES ($1::uuid, $2::text, $3::boolean, COALESCE($4::jsonb, '{}'::jsonb),
            CASE WHEN $3::boolean THEN $6::timestamptz ELSE NULL END,
            CASE WHEN $3::boolean THEN NULL ELSE $6::timestamptz END,
            $5::uuid, $6::timestamptz)
    ON CONFLICT (tenant_id, module) DO UPDATE SET
        is_enabled = EXCLUDED.is_enabled,
        config = COALESCE($4::jsonb, module_activations.config),
        enabled_at = CASE WHEN EXCLUDED.is_enabled THEN EXCLUDED.updated_at
                          ELSE module_activations.enabled_at END,
        disabled_at = CASE WHEN EXCLUDED.is_enabled THEN module_activations.disabled_at
                           ELSE EXCLUDED.updated_at END,
        actor_id = EXCLUDED.actor_id,
        updated_at = EXCLUDED.updated_at
    RETURNING tenant_id, module, is_enabled, config, enabled_at, disabled_at, actor_id, updated_at
"#;

pub const LIST_ACTIVATIONS: &str = r#"
    SELECT tenant_id, module, is_enabled, config, enabled_at, disabled_at, actor_id, updated_at
    FROM module_activations
    WHERE tenant_id = $1
    ORDER BY module
"#;

pub const FIND_ACCESS_CLIENT: &str = r#"
    SELECT client_id, tenant_id, name, secret_hash, created_at
    FROM tenant_access_clients
    WHERE tenant_id = $1
"#;

pub const INSERT_ACCESS_CLIENT: &str = r#"
    INSERT INTO tenant_access_clients (client_id, tenant_id, name, secret_hash, created_at)
    VALUES ($1, $2, $3, $4, $5)
"#;

// ---------------------------------------------------------------------------
// Admin server
// ---------------------------------------------------------------------------

pub const DATABASE_EXISTS: &str = r#"
    SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1) AS exists
"#;

pub const ROLE_EXISTS: &str = r#"
    SELECT EXISTS(SELECT 1 FROM pg_roles WHERE rolname = $1) AS exists
"#;

// ---------------------------------------------------------------------------
// Tenant database introspection
// ---------------------------------------------------------------------------

pub const TABLE_EXISTS: &str = r#"
    SELECT EXISTS(
        SELECT 1 FROM information_schema.tables
        WHERE table_schema = current_schema()
          AND table_name = $1
          AND table_type = 'BASE TABLE'
    ) AS exists
"#;

pub const COLUMN_EXISTS: &str = r#"
    SELECT EXISTS(
        SELECT 1 FROM information_schema.columns
        WHERE table_schema = current_schema()
          AND table_name = $1
          AND column_name = $2
    ) AS exists
"#;

/// Columns of a table; `$2` narrows to a single column when not NULL
pub const TABLE_COLUMNS: &str = r#"
    SELECT
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        c.udt_name::text AS udt_name,
        c.character_maximum_length::int AS max_length,
        c.is_nullable = 'YES' AS nullable,
        c.column_default::text AS column_default,
        c.is_identity = 'YES' AS is_identity,
        EXISTS(
            SELECT 1 FROM pg_catalog.pg_type t
            WHERE t.typname = c.udt_name AND t.typtype = 'e'
        ) AS is_enum,
        col_description(
            format('%I.%I', c.table_schema, c.table_name)::regclass,
            c.ordinal_position::int
        ) AS comment
    FROM information_schema.columns c
    WHERE c.table_schema = current_schema()
      AND c.table_name = $1
      AND ($2::text IS NULL OR c.column_name = $2::text)
    ORDER BY c.ordinal_position
"#;

pub const TABLE_FOREIGN_KEYS: &str = r#"
    SELECT
        con.conname::text AS constraint_name,
        (SELECT string_agg(a.attname::text, ',' ORDER BY a.attnum)
           FROM pg_catalog.pg_attribute a
          WHERE a.attrelid = con.conrelid AND a.attnum = ANY(con.conkey)) AS column_name,
        ref.relname::text AS referenced_table,
        (SELECT string_agg(a.attname::text, ',' ORDER BY a.attnum)
           FROM pg_catalog.pg_attribute a
          WHERE a.attrelid = con.confrelid AND a.attnum = ANY(con.confkey)) AS referenced_column,
        CASE con.confupdtype
            WHEN 'c' THEN 'CASCADE' WHEN 'r' THEN 'RESTRICT' WHEN 'n' THEN 'SET NULL'
            WHEN 'd' THEN 'SET DEFAULT' ELSE 'NO ACTION' END AS on_update,
        CASE con.confdeltype
            WHEN 'c' THEN 'CASCADE' WHEN 'r' THEN 'RESTRICT' WHEN 'n' THEN 'SET NULL'
            WHEN 'd' THEN 'SET DEFAULT' ELSE 'NO ACTION' END AS on_delete
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
    JOIN pg_catalog.pg_class ref ON ref.oid = con.confrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = rel.relnamespace
    WHERE con.contype = 'f'
      AND n.nspname = current_schema()
      AND rel.relname = $1
    ORDER BY con.conname
"#;

// ---------------------------------------------------------------------------
// Migration ledger (inside each tenant database)
// ---------------------------------------------------------------------------

pub const CREATE_MIGRATIONS_LEDGER: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        id VARCHAR(255) PRIMARY KEY,
        module VARCHAR(100),
        batch INTEGER NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

pub const LIST_APPLIED_MIGRATIONS: &str = "SELECT id FROM schema_migrations ORDER BY id";

pub const NEXT_MIGRATION_BATCH: &str =
    "SELECT COALESCE(MAX(batch), 0)::int + 1 AS batch FROM schema_migrations";

pub const RECORD_MIGRATION: &str = r#"
    INSERT INTO schema_migrations (id, module, batch, applied_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (id) DO NOTHING
"#;

/// SQL builder for safe identifier quoting
pub struct SqlBuilder;

impl SqlBuilder {
    /// Quote an identifier (table/column name) safely
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quote a string literal safely
    pub fn quote_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Build CREATE DATABASE query with encoding and collation
    pub fn create_database(name: &str, owner: Option<&str>, encoding: &str, collation: &str) -> String {
        let mut sql = format!("CREATE DATABASE {}", Self::quote_ident(name));
        if let Some(owner) = owner {
            sql.push_str(&format!(" OWNER {}", Self::quote_ident(owner)));
        }
        sql.push_str(&format!(
            " ENCODING {} LC_COLLATE {} LC_CTYPE {} TEMPLATE template0",
            Self::quote_literal(encoding),
            Self::quote_literal(collation),
            Self::quote_literal(collation)
        ));
        sql
    }

    /// Build DROP DATABASE query, terminating open sessions
    pub fn drop_database(name: &str) -> String {
        format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", Self::quote_ident(name))
    }

    /// Build CREATE ROLE query for a tenant login
    pub fn create_login_role(name: &str, password: &str) -> String {
        format!(
            "CREATE ROLE {} LOGIN PASSWORD {}",
            Self::quote_ident(name),
            Self::quote_literal(password)
        )
    }

    /// Build a row count query
    pub fn count_rows(table: &str) -> String {
        format!("SELECT COUNT(*) AS total FROM {}", Self::quote_ident(table))
    }
}
