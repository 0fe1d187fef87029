//! Schema definition and validation.
//!
//! The schema names the tables that participate in sync and lets a store
//! validate record fields before a batch is written.

use crate::{error::StorageResult, SchemaVersion, StorageError, TableName};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Column types a table can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since the epoch, as an integer
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl FieldType {
    /// Name used in validation errors.
    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Json => "Json",
        }
    }

    fn admits(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int | FieldType::Timestamp => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Json => true,
        }
    }
}

/// The kind of a JSON value, in the same vocabulary as [`FieldType::name`].
fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_f64() => "Float",
        Value::Number(_) => "Int",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// One declared column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// A required column may be neither absent nor null
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, true)
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, false)
    }

    fn new(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
        }
    }

    /// Check this column within a record's fields.
    fn check(&self, fields: &Map<String, Value>) -> StorageResult<()> {
        match fields.get(&self.name).filter(|value| !value.is_null()) {
            None if self.required => Err(StorageError::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(value) if self.field_type.admits(value) => Ok(()),
            Some(value) => Err(StorageError::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.name().to_string(),
                got: kind_of(value).to_string(),
            }),
        }
    }
}

/// Schema for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name
    pub name: TableName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(name: impl Into<TableName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Validate record fields. Undeclared fields are accepted as-is.
    pub fn validate_fields(&self, fields: &Map<String, Value>) -> StorageResult<()> {
        self.fields.iter().try_for_each(|field| field.check(fields))
    }
}

/// Schema for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version for migrations
    pub version: SchemaVersion,
    /// Table schemas by name
    pub tables: HashMap<TableName, TableSchema>,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            tables: HashMap::new(),
        }
    }

    /// Add a table to the schema.
    pub fn add_table(&mut self, table: TableSchema) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.add_table(table);
        self
    }

    /// Get a table schema by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Names of every table, sorted.
    pub fn table_names(&self) -> Vec<TableName> {
        let mut names: Vec<_> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate fields destined for `table`.
    pub fn validate_fields(&self, table: &str, fields: &Map<String, Value>) -> StorageResult<()> {
        self.tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?
            .validate_fields(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_schema() -> Schema {
        Schema::new(1).with_table(TableSchema::new(
            "tasks",
            vec![
                FieldDef::required("title", FieldType::String),
                FieldDef::optional("done", FieldType::Bool),
                FieldDef::optional("estimate", FieldType::Float),
            ],
        ))
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn validate_valid_fields() {
        let schema = test_schema();
        assert!(schema
            .validate_fields("tasks", &fields(json!({"title": "a"})))
            .is_ok());
        assert!(schema
            .validate_fields(
                "tasks",
                &fields(json!({"title": "a", "done": true, "estimate": 2, "extra": [1]}))
            )
            .is_ok());
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = test_schema();
        let result = schema.validate_fields("tasks", &fields(json!({"done": false})));
        assert!(matches!(result, Err(StorageError::MissingRequiredField(f)) if f == "title"));
    }

    #[test]
    fn validate_null_required_field() {
        let schema = test_schema();
        let result = schema.validate_fields("tasks", &fields(json!({"title": null})));
        assert!(matches!(result, Err(StorageError::MissingRequiredField(f)) if f == "title"));
    }

    #[test]
    fn validate_wrong_type() {
        let schema = test_schema();
        let result = schema.validate_fields("tasks", &fields(json!({"title": "a", "done": "no"})));
        assert!(matches!(
            result,
            Err(StorageError::TypeMismatch { field, got, .. }) if field == "done" && got == "String"
        ));
    }

    #[test]
    fn validate_unknown_table() {
        let schema = test_schema();
        let result = schema.validate_fields("projects", &Map::new());
        assert!(matches!(result, Err(StorageError::TableNotFound(t)) if t == "projects"));
    }

    #[test]
    fn table_names_sorted() {
        let schema = test_schema()
            .with_table(TableSchema::new("projects", vec![]))
            .with_table(TableSchema::new("comments", vec![]));
        assert_eq!(schema.table_names(), vec!["comments", "projects", "tasks"]);
    }

    #[test]
    fn mismatch_names_both_kinds() {
        let schema = Schema::new(1).with_table(TableSchema::new(
            "events",
            vec![FieldDef::required("at", FieldType::Timestamp)],
        ));
        let result = schema.validate_fields("events", &fields(json!({"at": 1.5})));
        assert_eq!(
            result,
            Err(StorageError::TypeMismatch {
                field: "at".into(),
                expected: "Timestamp".into(),
                got: "Float".into(),
            })
        );
        assert!(schema
            .validate_fields("events", &fields(json!({"at": 1_700_000_000_000u64})))
            .is_ok());
    }

    #[test]
    fn schema_serialization() {
        let schema = test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
