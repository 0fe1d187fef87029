//! Record types for storing data.

use crate::{RecordId, TableName};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Whether the remote peer's copy of a record is believed current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Exists locally, never acknowledged by the remote peer
    Created,
    /// Known remotely, but carries unacknowledged local edits
    Updated,
    /// Local content matches what the remote peer holds
    Synced,
}

/// A flat field-value snapshot of a record, independent of any live handle.
///
/// Serializes as a single JSON object: `{"id": "...", <field>: <value>, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Table-scoped identifier
    pub id: RecordId,
    /// Field values, excluding the id
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawRecord {
    /// Create a raw record. An `id` key inside `fields` is dropped.
    pub fn new(id: impl Into<RecordId>, mut fields: Map<String, Value>) -> Self {
        fields.remove("id");
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a raw record from a JSON object value.
    ///
    /// Returns `None` if `value` is not an object.
    pub fn from_value(id: impl Into<RecordId>, value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self::new(id, fields)),
            _ => None,
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// A persisted record, as handed out by the storage collaborator.
///
/// Values returned from a query act as the record handles the acknowledger
/// later targets; they are snapshots, so writing them back goes through a
/// storage batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Table this record belongs to
    pub table: TableName,
    /// Unique identifier within the table
    pub id: RecordId,
    /// Sync status
    pub status: SyncStatus,
    /// Fields edited locally since the last acknowledged sync
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub changed: BTreeSet<String>,
    /// Field values
    pub fields: Map<String, Value>,
}

impl Record {
    /// Materialize a record from a raw snapshot, tagged with a sync status.
    pub fn from_raw(table: impl Into<TableName>, raw: RawRecord, status: SyncStatus) -> Self {
        Self {
            table: table.into(),
            id: raw.id,
            status,
            changed: BTreeSet::new(),
            fields: raw.fields,
        }
    }

    /// Replace every field with the raw snapshot's fields and set the status.
    ///
    /// There is no field-level merge: fields absent from `raw` are dropped.
    pub fn apply_raw(&mut self, raw: RawRecord, status: SyncStatus) {
        self.fields = raw.fields;
        self.status = status;
        if status == SyncStatus::Synced {
            self.changed.clear();
        }
    }

    /// Take a raw snapshot of the current field values.
    pub fn raw(&self) -> RawRecord {
        RawRecord {
            id: self.id.clone(),
            fields: self.fields.clone(),
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Apply a local edit to one field.
    ///
    /// A synced record becomes `Updated`; a `Created` record stays `Created`.
    pub fn set_field(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        self.fields.insert(field.clone(), value);
        self.changed.insert(field);
        if self.status == SyncStatus::Synced {
            self.status = SyncStatus::Updated;
        }
    }

    /// Reset sync bookkeeping after the remote peer acknowledged this record.
    pub fn mark_synced(&mut self) {
        self.status = SyncStatus::Synced;
        self.changed.clear();
    }

    /// Reset sync bookkeeping for an acknowledged handle.
    ///
    /// `pushed` is the handle as it was when collected. If this record has
    /// been edited since, only the columns that still differ from `pushed`
    /// stay dirty and the record is left `Updated`.
    pub fn acknowledge(&mut self, pushed: &Record) {
        if self.fields == pushed.fields {
            self.mark_synced();
            return;
        }

        self.changed = self
            .fields
            .keys()
            .chain(pushed.fields.keys())
            .filter(|field| self.fields.get(*field) != pushed.fields.get(*field))
            .cloned()
            .collect();
        self.status = SyncStatus::Updated;
    }

    /// Check if the record has unacknowledged local changes.
    pub fn is_dirty(&self) -> bool {
        self.status != SyncStatus::Synced
    }
}
