//! Expected schema, live introspection, validation and DDL

pub mod ddl;
pub mod expected;
pub mod introspect;
pub mod report;
pub mod types;
pub mod validator;

pub use ddl::DdlGenerator;
pub use expected::{ColumnDefault, ColumnKind, ColumnSpec, ExpectedSchema, ForeignKeySpec, ReferentialAction, TableSchema};
pub use introspect::{column_exists, get_column_definition, table_exists, LiveForeignKey, LiveTable};
pub use report::{generate_validation_report, ValidationSummary};
pub use types::{compare_column_definitions, normalize_type, CanonicalType, ColumnDefinition, ColumnDiff};
pub use validator::{diff_table, validate_schema, validate_table_schema, SchemaValidationResult};

use once_cell::sync::Lazy;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema definition: {0}")]
    Parse(#[from] serde_json::Error),
}

const HOSPITAL_SCHEMA: &str = include_str!("hospital.json");

static BUILTIN: Lazy<ExpectedSchema> =
    Lazy::new(|| ExpectedSchema::from_json(HOSPITAL_SCHEMA).expect("built-in hospital schema is valid"));

/// The hospital schema compiled into the binary
pub fn builtin_schema() -> &'static ExpectedSchema {
    &BUILTIN
}

/// Load the expected schema from `path`, or the built-in one
pub fn load_expected_schema(path: Option<&Path>) -> Result<ExpectedSchema, SchemaError> {
    let Some(path) = path else {
        return Ok(builtin_schema().clone());
    };

    let json = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let schema = ExpectedSchema::from_json(&json)?;
    info!(path = %path.display(), tables = schema.len(), "📐 Loaded expected schema");
    Ok(schema)
}
