//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory store and persistent storage.
//! They are designed for deterministic serialization to ensure consistency.

use crate::{error::Result, Error, Record, RecordId, Schema, SchemaVersion, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Point-in-time contents of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    /// Live records by id
    pub records: BTreeMap<RecordId, Record>,
    /// Unacknowledged local deletions, in deletion order
    #[serde(default)]
    pub tombstones: Vec<RecordId>,
}

/// A point-in-time snapshot of the store state.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// Table contents by table name
    pub tables: BTreeMap<TableName, TableSnapshot>,
    /// Local key-value metadata (sync cursors and the like)
    #[serde(default)]
    pub local: BTreeMap<String, String>,
}

impl DatabaseSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            tables: BTreeMap::new(),
            local: BTreeMap::new(),
        }
    }

    /// Add a record to the snapshot.
    pub fn add_record(&mut self, record: Record) {
        self.tables
            .entry(record.table.clone())
            .or_default()
            .records
            .insert(record.id.clone(), record);
    }

    /// Add a tombstone to the snapshot.
    pub fn add_tombstone(&mut self, table: impl Into<TableName>, id: impl Into<RecordId>) {
        let id = id.into();
        let tombstones = &mut self.tables.entry(table.into()).or_default().tombstones;
        if !tombstones.contains(&id) {
            tombstones.push(id);
        }
    }

    /// Get a record from the snapshot.
    pub fn get_record(&self, table: &str, id: &str) -> Option<&Record> {
        self.tables.get(table)?.records.get(id)
    }

    /// Count total records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(|t| t.records.len()).sum()
    }

    /// Count tombstones across all tables.
    pub fn tombstone_count(&self) -> usize {
        self.tables.values().map(|t| t.tombstones.len()).sum()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        for (table_name, table) in &self.tables {
            let table_schema = schema.get_table(table_name).ok_or_else(|| {
                Error::InvalidSnapshot(format!("unknown table: {}", table_name))
            })?;

            for (id, record) in &table.records {
                if record.id != *id || record.table != *table_name {
                    return Err(Error::InvalidSnapshot(format!(
                        "record {}/{} filed under {}/{}",
                        record.table, record.id, table_name, id
                    )));
                }
                table_schema.validate_fields(&record.fields)?;
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
