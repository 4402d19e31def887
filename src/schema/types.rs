//! Canonical column types and column comparison

use super::expected::{ColumnKind, ColumnSpec};
use serde::{Serialize, Serializer};
use std::fmt;

/// Type vocabulary both sides are normalized into before comparison
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalType {
    BigInt,
    Integer,
    String,
    Text,
    Date,
    DateTime,
    Boolean,
    Enum,
    /// Anything outside the canonical set, kept verbatim
    Other(String),
}

impl CanonicalType {
    pub fn as_str(&self) -> &str {
        match self {
            CanonicalType::BigInt => "bigint",
            CanonicalType::Integer => "integer",
            CanonicalType::String => "string",
            CanonicalType::Text => "text",
            CanonicalType::Date => "date",
            CanonicalType::DateTime => "datetime",
            CanonicalType::Boolean => "boolean",
            CanonicalType::Enum => "enum",
            CanonicalType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CanonicalType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Normalize a declared or introspected type name
pub fn normalize_type(raw: &str) -> CanonicalType {
    let lowered = raw.trim().to_ascii_lowercase();
    // strip a length suffix such as varchar(255)
    let base = lowered.split('(').next().unwrap_or_default().trim();

    match base {
        "bigint" | "int8" | "biginteger" | "bigserial" | "serial8" | "unsignedbiginteger" => CanonicalType::BigInt,
        "integer" | "int" | "int4" | "int2" | "smallint" | "tinyint" | "mediumint" | "serial"
        | "serial4" | "unsignedinteger" => CanonicalType::Integer,
        "string" | "varchar" | "character varying" | "char" | "character" | "bpchar" | "uuid" => {
            CanonicalType::String
        }
        "text" | "longtext" | "mediumtext" | "citext" => CanonicalType::Text,
        "date" => CanonicalType::Date,
        "datetime" | "timestamp" | "timestamptz" | "timestamp without time zone"
        | "timestamp with time zone" => CanonicalType::DateTime,
        "boolean" | "bool" => CanonicalType::Boolean,
        "enum" => CanonicalType::Enum,
        _ => CanonicalType::Other(base.to_string()),
    }
}

impl ColumnKind {
    pub fn canonical(&self) -> CanonicalType {
        match self {
            ColumnKind::BigInteger => CanonicalType::BigInt,
            ColumnKind::Integer => CanonicalType::Integer,
            ColumnKind::String { .. } | ColumnKind::Uuid => CanonicalType::String,
            ColumnKind::Text => CanonicalType::Text,
            ColumnKind::Date => CanonicalType::Date,
            ColumnKind::DateTime | ColumnKind::Timestamp => CanonicalType::DateTime,
            ColumnKind::Boolean => CanonicalType::Boolean,
            ColumnKind::Enum { .. } => CanonicalType::Enum,
        }
    }
}

/// A live column, normalized
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: CanonicalType,
    /// Type name as reported by the server
    pub raw_type: String,
    pub length: Option<u32>,
    pub nullable: bool,
    pub default: Option<String>,
    /// Postgres has no unsigned integers; always false for live columns
    pub unsigned: bool,
    pub autoincrement: bool,
    pub comment: Option<String>,
}

/// Expected and actual value of one diverging attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDiff<T> {
    pub expected: T,
    pub actual: T,
}

/// Field-level differences of one column. Empty when equivalent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnDiff {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<FieldDiff<CanonicalType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<FieldDiff<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<FieldDiff<bool>>,
}

impl ColumnDiff {
    pub fn is_empty(&self) -> bool {
        self.data_type.is_none() && self.length.is_none() && self.nullable.is_none()
    }

    /// One-line rendering, e.g. `type: string -> text; nullable: false -> true`
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(d) = &self.data_type {
            parts.push(format!("type: {} -> {}", d.expected, d.actual));
        }
        if let Some(d) = &self.length {
            parts.push(format!("length: {} -> {}", d.expected, d.actual));
        }
        if let Some(d) = &self.nullable {
            parts.push(format!("nullable: {} -> {}", d.expected, d.actual));
        }
        parts.join("; ")
    }
}

/// Compare an expected column with its live counterpart.
///
/// Types are compared after normalization, length only when both sides
/// declare one, and nullability always.
pub fn compare_column_definitions(expected: &ColumnSpec, actual: &ColumnDefinition) -> ColumnDiff {
    let mut diff = ColumnDiff::default();

    let expected_type = expected.kind.canonical();
    if expected_type != actual.data_type {
        diff.data_type = Some(FieldDiff {
            expected: expected_type,
            actual: actual.data_type.clone(),
        });
    }

    if let (Some(expected_len), Some(actual_len)) = (expected.kind.length(), actual.length) {
        if expected_len != actual_len {
            diff.length = Some(FieldDiff {
                expected: expected_len,
                actual: actual_len,
            });
        }
    }

    if expected.nullable != actual.nullable {
        diff.nullable = Some(FieldDiff {
            expected: expected.nullable,
            actual: actual.nullable,
        });
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn live(name: &str, raw: &str, length: Option<u32>, nullable: bool) -> ColumnDefinition {
        ColumnDefinition {
            name: name.to_string(),
            data_type: normalize_type(raw),
            raw_type: raw.to_string(),
            length,
            nullable,
            default: None,
            unsigned: false,
            autoincrement: false,
            comment: None,
        }
    }

    #[test]
    fn test_normalizes_aliases() {
        assert_eq!(normalize_type("timestamp without time zone"), CanonicalType::DateTime);
        assert_eq!(normalize_type("TIMESTAMP"), CanonicalType::DateTime);
        assert_eq!(normalize_type("uuid"), CanonicalType::String);
        assert_eq!(normalize_type("int4"), CanonicalType::Integer);
        assert_eq!(normalize_type("int8"), CanonicalType::BigInt);
        assert_eq!(normalize_type("character varying(255)"), CanonicalType::String);
        assert_eq!(normalize_type("jsonb"), CanonicalType::Other("jsonb".to_string()));
    }

    #[test]
    fn test_equivalent_columns_produce_empty_diff() {
        let expected = ColumnSpec::new("administered_at", ColumnKind::Timestamp).nullable();
        let actual = live("administered_at", "timestamp without time zone", None, true);
        assert!(compare_column_definitions(&expected, &actual).is_empty());

        let expected = ColumnSpec::new("external_ref", ColumnKind::Uuid);
        let actual = live("external_ref", "character varying", Some(36), false);
        assert!(compare_column_definitions(&expected, &actual).is_empty());
    }

    #[test]
    fn test_length_compared_only_when_both_declare() {
        let unspecified = ColumnSpec::new("name", ColumnKind::String { length: None });
        let actual = live("name", "character varying", Some(100), false);
        assert!(compare_column_definitions(&unspecified, &actual).is_empty());

        let declared = ColumnSpec::new("name", ColumnKind::String { length: Some(255) });
        let diff = compare_column_definitions(&declared, &actual);
        assert_eq!(
            diff.length,
            Some(FieldDiff {
                expected: 255,
                actual: 100
            })
        );
        assert!(diff.data_type.is_none());
    }

    #[test]
    fn test_type_and_nullability_differences() {
        let expected = ColumnSpec::new("notes", ColumnKind::String { length: None });
        let actual = live("notes", "text", None, true);
        let diff = compare_column_definitions(&expected, &actual);

        assert_eq!(diff.describe(), "type: string -> text; nullable: false -> true");
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json["type"]["expected"], "string");
        assert!(json.get("length").is_none());
    }
}
