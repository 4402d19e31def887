//! DDL generation from expected table declarations
//!
//! Only additive statements: CREATE TYPE / TABLE, ADD COLUMN, ADD CONSTRAINT.

use super::expected::{ColumnDefault, ColumnKind, ColumnSpec, ForeignKeySpec, TableSchema};
use crate::db::queries::SqlBuilder;

pub struct DdlGenerator;

impl DdlGenerator {
    /// Name of the native enum type backing `table.column`
    pub fn enum_type_name(table: &str, column: &str) -> String {
        format!("{}_{}_enum", table, column)
    }

    fn column_type(table: &str, spec: &ColumnSpec) -> String {
        let identity = if spec.autoincrement {
            " GENERATED BY DEFAULT AS IDENTITY"
        } else {
            ""
        };
        match &spec.kind {
            ColumnKind::BigInteger => format!("BIGINT{}", identity),
            ColumnKind::Integer => format!("INTEGER{}", identity),
            ColumnKind::String { length } => format!("VARCHAR({})", length.unwrap_or(255)),
            ColumnKind::Text => "TEXT".to_string(),
            ColumnKind::Date => "DATE".to_string(),
            ColumnKind::DateTime | ColumnKind::Timestamp => "TIMESTAMP(0) WITHOUT TIME ZONE".to_string(),
            ColumnKind::Boolean => "BOOLEAN".to_string(),
            ColumnKind::Enum { .. } => SqlBuilder::quote_ident(&Self::enum_type_name(table, &spec.name)),
            ColumnKind::Uuid => "UUID".to_string(),
        }
    }

    fn default_literal(default: &ColumnDefault) -> String {
        match default {
            ColumnDefault::Bool(true) => "TRUE".to_string(),
            ColumnDefault::Bool(false) => "FALSE".to_string(),
            ColumnDefault::Integer(n) => n.to_string(),
            ColumnDefault::Float(n) => n.to_string(),
            ColumnDefault::Text(s) => SqlBuilder::quote_literal(s),
            ColumnDefault::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }

    /// Column clause as used in CREATE TABLE and ADD COLUMN
    pub fn column_definition(table: &str, spec: &ColumnSpec) -> String {
        let mut def = format!(
            "{} {}",
            SqlBuilder::quote_ident(&spec.name),
            Self::column_type(table, spec)
        );
        if !spec.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &spec.default {
            def.push_str(&format!(" DEFAULT {}", Self::default_literal(default)));
        }
        def
    }

    /// Idempotent creation of the enum type of an enum column
    pub fn create_enum_type(table: &str, spec: &ColumnSpec) -> Option<String> {
        let ColumnKind::Enum { values } = &spec.kind else {
            return None;
        };
        let labels: Vec<String> = values.iter().map(|v| SqlBuilder::quote_literal(v)).collect();
        Some(format!(
            "DO $$ BEGIN CREATE TYPE {} AS ENUM ({}); EXCEPTION WHEN duplicate_object THEN NULL; END $$",
            SqlBuilder::quote_ident(&Self::enum_type_name(table, &spec.name)),
            labels.join(", ")
        ))
    }

    fn column_comment(table: &str, spec: &ColumnSpec) -> Option<String> {
        spec.comment.as_ref().map(|comment| {
            format!(
                "COMMENT ON COLUMN {}.{} IS {}",
                SqlBuilder::quote_ident(table),
                SqlBuilder::quote_ident(&spec.name),
                SqlBuilder::quote_literal(comment)
            )
        })
    }

    /// Statements creating a table with its enum types, comments and
    /// foreign keys
    pub fn create_table(table: &str, schema: &TableSchema) -> Vec<String> {
        let mut statements: Vec<String> = schema
            .columns
            .iter()
            .filter_map(|c| Self::create_enum_type(table, c))
            .collect();

        let mut clauses: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("    {}", Self::column_definition(table, c)))
            .collect();

        let primary: Vec<String> = schema
            .columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| SqlBuilder::quote_ident(&c.name))
            .collect();
        if !primary.is_empty() {
            clauses.push(format!("    PRIMARY KEY ({})", primary.join(", ")));
        }

        statements.push(format!(
            "CREATE TABLE {} (\n{}\n)",
            SqlBuilder::quote_ident(table),
            clauses.join(",\n")
        ));
        statements.extend(schema.columns.iter().filter_map(|c| Self::column_comment(table, c)));
        statements.extend(schema.foreign_keys.iter().map(|fk| Self::add_foreign_key(table, fk)));
        statements
    }

    /// Statements adding one column to an existing table
    pub fn add_column(table: &str, spec: &ColumnSpec) -> Vec<String> {
        let mut statements: Vec<String> = Self::create_enum_type(table, spec).into_iter().collect();
        statements.push(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            SqlBuilder::quote_ident(table),
            Self::column_definition(table, spec)
        ));
        statements.extend(Self::column_comment(table, spec));
        statements
    }

    pub fn add_foreign_key(table: &str, fk: &ForeignKeySpec) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            SqlBuilder::quote_ident(table),
            SqlBuilder::quote_ident(&fk.name),
            SqlBuilder::quote_ident(&fk.column),
            SqlBuilder::quote_ident(&fk.on),
            SqlBuilder::quote_ident(&fk.references),
            fk.on_update.as_sql(),
            fk.on_delete.as_sql()
        )
    }
}
