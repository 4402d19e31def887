//! Declarative expected schema
//!
//! The JSON format keeps table, column and constraint order, so tables are
//! created in declaration order and reports list columns the way they were
//! written:
//!
//! ```json
//! { "patients": {
//!     "columns": { "id": { "type": "bigint", "autoincrement": true } },
//!     "foreign_keys": { "patients_department_id_foreign": {
//!         "column": "department_id", "references": "id", "on": "departments",
//!         "onDelete": "set null" } } } }
//! ```

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

/// Logical column type as declared
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnKind {
    BigInteger,
    Integer,
    String { length: Option<u32> },
    Text,
    Date,
    DateTime,
    Timestamp,
    Boolean,
    Enum { values: Vec<String> },
    Uuid,
}

impl ColumnKind {
    /// Declared length, for kinds that carry one
    pub fn length(&self) -> Option<u32> {
        match self {
            ColumnKind::String { length } => *length,
            _ => None,
        }
    }

    fn parse(type_name: &str, length: Option<u32>, values: Option<Vec<String>>) -> Result<Self, String> {
        let kind = match type_name.trim().to_ascii_lowercase().as_str() {
            "bigint" | "biginteger" | "unsignedbiginteger" | "bigincrements" | "id" => ColumnKind::BigInteger,
            "integer" | "int" | "unsignedinteger" | "smallint" | "tinyint" | "increments" => ColumnKind::Integer,
            "string" | "varchar" | "char" => ColumnKind::String { length },
            "text" | "longtext" | "mediumtext" => ColumnKind::Text,
            "date" => ColumnKind::Date,
            "datetime" => ColumnKind::DateTime,
            "timestamp" | "timestamptz" => ColumnKind::Timestamp,
            "boolean" | "bool" => ColumnKind::Boolean,
            "uuid" => ColumnKind::Uuid,
            "enum" => {
                let values = values.unwrap_or_default();
                if values.is_empty() {
                    return Err("enum column requires a non-empty 'values' list".to_string());
                }
                ColumnKind::Enum { values }
            }
            other => return Err(format!("unsupported column type '{}'", other)),
        };
        Ok(kind)
    }
}

/// Column default as declared
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnDefault {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    CurrentTimestamp,
}

impl ColumnDefault {
    fn from_json(value: serde_json::Value) -> Result<Option<Self>, String> {
        use serde_json::Value;
        Ok(match value {
            Value::Null => None,
            Value::Bool(b) => Some(ColumnDefault::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ColumnDefault::Integer(i)),
                None => Some(ColumnDefault::Float(n.as_f64().unwrap_or_default())),
            },
            Value::String(s) => {
                let lowered = s.trim().to_ascii_lowercase();
                if lowered == "current_timestamp" || lowered == "now()" {
                    Some(ColumnDefault::CurrentTimestamp)
                } else {
                    Some(ColumnDefault::Text(s))
                }
            }
            other => return Err(format!("unsupported default value {}", other)),
        })
    }
}

/// One expected column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub unsigned: bool,
    pub autoincrement: bool,
    /// Part of the primary key; implied by `autoincrement`
    pub primary: bool,
    pub comment: Option<String>,
}

impl ColumnSpec {
    /// A NOT NULL column without default
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
            unsigned: false,
            autoincrement: false,
            primary: false,
            comment: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self.primary = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Whether adding this column to a populated table leaves existing rows
    /// without a value
    pub fn requires_backfill(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.autoincrement
    }
}

/// Referential action of a foreign key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

impl FromStr for ReferentialAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', " ").as_str() {
            "no action" => Ok(ReferentialAction::NoAction),
            "restrict" => Ok(ReferentialAction::Restrict),
            "cascade" => Ok(ReferentialAction::Cascade),
            "set null" => Ok(ReferentialAction::SetNull),
            "set default" => Ok(ReferentialAction::SetDefault),
            other => Err(format!("unknown referential action '{}'", other)),
        }
    }
}

/// One expected foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeySpec {
    pub name: String,
    pub column: String,
    pub references: String,
    pub on: String,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

/// Expected shape of one table
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
    pub foreign_keys: Vec<ForeignKeySpec>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.columns.push(spec);
        self
    }

    pub fn foreign_key(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        on: impl Into<String>,
        references: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKeySpec {
            name: name.into(),
            column: column.into(),
            references: references.into(),
            on: on.into(),
            on_update: ReferentialAction::NoAction,
            on_delete: ReferentialAction::NoAction,
        });
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Expected schema of a tenant database, in declaration order
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "OrderedMap<RawTableSchema>")]
pub struct ExpectedSchema {
    tables: Vec<(String, TableSchema)>,
}

impl ExpectedSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, schema: TableSchema) -> Self {
        let name = name.into();
        self.tables.retain(|(existing, _)| *existing != name);
        self.tables.push((name, schema));
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableSchema)> {
        self.tables.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables whose name satisfies `keep`, order preserved
    pub fn subset<F: Fn(&str) -> bool>(&self, keep: F) -> Self {
        ExpectedSchema {
            tables: self.tables.iter().filter(|(name, _)| keep(name)).cloned().collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Serialize for ExpectedSchema {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.tables.len()))?;
        for (name, table) in &self.tables {
            map.serialize_entry(name, table)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// JSON object decoded into its entries in document order
#[derive(Debug)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        OrderedMap(Vec::new())
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, V)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, V>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[derive(Debug, Deserialize)]
pub struct RawColumnSpec {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    length: Option<u32>,
    #[serde(default)]
    nullable: bool,
    #[serde(default)]
    default: serde_json::Value,
    #[serde(default)]
    unsigned: bool,
    #[serde(default)]
    values: Option<Vec<String>>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    autoincrement: bool,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawForeignKey {
    column: String,
    references: String,
    on: String,
    #[serde(default)]
    on_update: Option<String>,
    #[serde(default)]
    on_delete: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawTableSchema {
    columns: OrderedMap<RawColumnSpec>,
    #[serde(default)]
    foreign_keys: OrderedMap<RawForeignKey>,
}

fn column_from_raw(table: &str, name: String, raw: RawColumnSpec) -> Result<ColumnSpec, String> {
    let context = |e: String| format!("{}.{}: {}", table, name, e);
    let kind = ColumnKind::parse(&raw.kind, raw.length, raw.values).map_err(context)?;
    let default = ColumnDefault::from_json(raw.default).map_err(context)?;
    Ok(ColumnSpec {
        name,
        kind,
        nullable: raw.nullable,
        default,
        unsigned: raw.unsigned,
        autoincrement: raw.autoincrement,
        primary: raw.primary || raw.autoincrement,
        comment: raw.comment,
    })
}

fn foreign_key_from_raw(table: &str, name: String, raw: RawForeignKey) -> Result<ForeignKeySpec, String> {
    let action = |value: Option<String>| -> Result<ReferentialAction, String> {
        value
            .map(|v| v.parse::<ReferentialAction>())
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(|e| format!("{}.{}: {}", table, name, e))
    };
    Ok(ForeignKeySpec {
        on_update: action(raw.on_update)?,
        on_delete: action(raw.on_delete)?,
        name,
        column: raw.column,
        references: raw.references,
        on: raw.on,
    })
}

impl TryFrom<OrderedMap<RawTableSchema>> for ExpectedSchema {
    type Error = String;

    fn try_from(raw: OrderedMap<RawTableSchema>) -> Result<Self, Self::Error> {
        let mut tables = Vec::with_capacity(raw.0.len());
        for (table, raw_table) in raw.0 {
            let columns = raw_table
                .columns
                .0
                .into_iter()
                .map(|(name, spec)| column_from_raw(&table, name, spec))
                .collect::<Result<Vec<_>, _>>()?;
            let foreign_keys = raw_table
                .foreign_keys
                .0
                .into_iter()
                .map(|(name, spec)| foreign_key_from_raw(&table, name, spec))
                .collect::<Result<Vec<_>, _>>()?;

            for fk in &foreign_keys {
                if !columns.iter().any(|c| c.name == fk.column) {
                    return Err(format!(
                        "{}: foreign key '{}' references undeclared column '{}'",
                        table, fk.name, fk.column
                    ));
                }
            }

            tables.push((table, TableSchema { columns, foreign_keys }));
        }
        Ok(ExpectedSchema { tables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "vaccinations": {
            "columns": {
                "id": { "type": "bigint", "autoincrement": true, "unsigned": true },
                "patient_id": { "type": "bigint", "unsigned": true },
                "vaccine_name": { "type": "string", "length": 120 },
                "dose": { "type": "enum", "values": ["first", "second", "booster"] },
                "administered_at": { "type": "timestamp", "nullable": true },
                "verified": { "type": "boolean", "default": false },
                "created_at": { "type": "timestamp", "nullable": true, "default": "CURRENT_TIMESTAMP" }
            },
            "foreign_keys": {
                "vaccinations_patient_id_foreign": {
                    "column": "patient_id", "references": "id", "on": "patients",
                    "onDelete": "cascade"
                }
            }
        }
    }"#;

    #[test]
    fn test_parses_columns_in_declaration_order() {
        let schema = ExpectedSchema::from_json(SAMPLE).unwrap();
        let table = schema.table("vaccinations").unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "patient_id", "vaccine_name", "dose", "administered_at", "verified", "created_at"]
        );
    }

    #[test]
    fn test_parses_kinds_defaults_and_actions() {
        let schema = ExpectedSchema::from_json(SAMPLE).unwrap();
        let table = schema.table("vaccinations").unwrap();

        assert_eq!(table.get_column("vaccine_name").unwrap().kind, ColumnKind::String { length: Some(120) });
        assert_eq!(
            table.get_column("dose").unwrap().kind,
            ColumnKind::Enum {
                values: vec!["first".into(), "second".into(), "booster".into()]
            }
        );
        assert_eq!(table.get_column("verified").unwrap().default, Some(ColumnDefault::Bool(false)));
        assert_eq!(
            table.get_column("created_at").unwrap().default,
            Some(ColumnDefault::CurrentTimestamp)
        );
        assert!(table.get_column("id").unwrap().autoincrement);
        assert!(table.get_column("id").unwrap().primary);
        assert!(!table.get_column("patient_id").unwrap().primary);

        let fk = &table.foreign_keys[0];
        assert_eq!(fk.on, "patients");
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert_eq!(fk.on_update, ReferentialAction::NoAction);
    }

    #[test]
    fn test_rejects_unknown_type_and_empty_enum() {
        let bad_type = r#"{"t": {"columns": {"c": {"type": "geometry"}}}}"#;
        let err = ExpectedSchema::from_json(bad_type).unwrap_err().to_string();
        assert!(err.contains("t.c"), "{}", err);

        let empty_enum = r#"{"t": {"columns": {"c": {"type": "enum"}}}}"#;
        assert!(ExpectedSchema::from_json(empty_enum).is_err());
    }

    #[test]
    fn test_rejects_foreign_key_on_undeclared_column() {
        let json = r#"{"t": {"columns": {"id": {"type": "bigint"}},
            "foreign_keys": {"fk": {"column": "owner_id", "references": "id", "on": "users"}}}}"#;
        assert!(ExpectedSchema::from_json(json).is_err());
    }

    #[test]
    fn test_subset_keeps_order() {
        let schema = ExpectedSchema::new()
            .with_table("users", TableSchema::new())
            .with_table("patients", TableSchema::new())
            .with_table("invoices", TableSchema::new());
        let subset = schema.subset(|t| t != "patients");
        let names: Vec<&str> = subset.tables().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["users", "invoices"]);
    }

    #[test]
    fn test_requires_backfill() {
        assert!(ColumnSpec::new("x", ColumnKind::Text).requires_backfill());
        assert!(!ColumnSpec::new("x", ColumnKind::Text).nullable().requires_backfill());
        assert!(!ColumnSpec::new("x", ColumnKind::Boolean)
            .default_value(ColumnDefault::Bool(true))
            .requires_backfill());
        assert!(!ColumnSpec::new("id", ColumnKind::BigInteger).autoincrement().requires_backfill());
    }
}
