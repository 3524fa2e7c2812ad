//! Schema introspection data models.
//!
//! Cross-engine shapes produced by the per-adapter schema analyzers. Column
//! types are normalized into the shared category vocabulary; raw engine
//! types are preserved alongside where useful.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full snapshot of one database's structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
    pub views: Vec<ViewInfo>,
    pub procedures: Vec<ProcedureInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            row_count: None,
            size_in_bytes: None,
        }
    }

    /// `schema.table` when a schema is known, `table` otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Normalized category (integer, string, text, datetime, ...)
    #[serde(rename = "type")]
    pub data_type: String,
    /// Raw engine type as reported by the catalog (e.g. `varchar(30)`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_type: Option<String>,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            native_type: None,
            nullable,
            default_value: None,
            is_primary_key: false,
            is_auto_increment: false,
            max_length: None,
            precision: None,
            scale: None,
            comment: None,
        }
    }
}

/// Index with its columns in definition order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    /// BTREE, HASH, GIN, GIST, ...
    pub index_type: String,
}

/// Foreign key; `referenced_columns` is parallel to `columns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: ForeignKeyAction,
    pub on_delete: ForeignKeyAction,
}

/// Referential action on the parent side of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// Parse from the catalog's rule string.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            "RESTRICT" => Self::Restrict,
            _ => Self::NoAction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// "function" or "procedure"
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

/// Per-table physical statistics from the engine catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatistics {
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_increment: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Server-level facts about the connected database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    pub table_count: usize,
}

/// Table → distinct referenced tables (FK targets), insertion-ordered.
///
/// PostgreSQL keys are `schema.table`; MySQL keys are bare table names.
pub type RelationshipMap = serde_json::Map<String, serde_json::Value>;

/// Build a relationship map from (table, referenced table) pairs, keeping
/// first-seen order and de-duplicating targets per table.
pub fn relationship_map_from_pairs<I>(pairs: I) -> RelationshipMap
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut map = RelationshipMap::new();
    for (table, referenced) in pairs {
        let entry = map
            .entry(table)
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let serde_json::Value::Array(targets) = entry {
            if !targets.iter().any(|t| t.as_str() == Some(&referenced)) {
                targets.push(serde_json::Value::String(referenced));
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        let mut table = TableInfo::new("orders");
        assert_eq!(table.qualified_name(), "orders");
        table.schema = Some("public".to_string());
        assert_eq!(table.qualified_name(), "public.orders");
    }

    #[test]
    fn test_foreign_key_action_parse() {
        assert_eq!(ForeignKeyAction::parse("CASCADE"), ForeignKeyAction::Cascade);
        assert_eq!(ForeignKeyAction::parse("set null"), ForeignKeyAction::SetNull);
        assert_eq!(ForeignKeyAction::parse("whatever"), ForeignKeyAction::NoAction);
    }

    #[test]
    fn test_relationship_map_dedup_and_order() {
        let map = relationship_map_from_pairs(vec![
            ("orders".to_string(), "users".to_string()),
            ("orders".to_string(), "products".to_string()),
            ("orders".to_string(), "users".to_string()),
            ("reviews".to_string(), "products".to_string()),
        ]);

        let orders = map.get("orders").unwrap().as_array().unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0], "users");
        assert_eq!(orders[1], "products");
        assert!(map.get("reviews").is_some());
    }
}
