//! Change sets exchanged between the local store and the remote peer.
//!
//! These are plain values: built fresh for each sync round and dropped
//! after use. The JSON shape of [`DatabaseChangeSet`] is what a transport
//! encodes and decodes:
//!
//! ```json
//! {
//!   "tasks": {
//!     "created": [{"id": "t3", "title": "x"}],
//!     "updated": [],
//!     "deleted": ["t2"]
//!   }
//! }
//! ```

use crate::{RawRecord, Record, RecordId, SyncStatus, TableName};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What changed in one table since a reference point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChangeSet {
    #[serde(default)]
    pub created: Vec<RawRecord>,
    #[serde(default)]
    pub updated: Vec<RawRecord>,
    #[serde(default)]
    pub deleted: Vec<RecordId>,
}

impl TableChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to add a created record.
    pub fn with_created(mut self, raw: RawRecord) -> Self {
        self.created.push(raw);
        self
    }

    /// Builder-style method to add an updated record.
    pub fn with_updated(mut self, raw: RawRecord) -> Self {
        self.updated.push(raw);
        self
    }

    /// Builder-style method to add a deleted id.
    pub fn with_deleted(mut self, id: impl Into<RecordId>) -> Self {
        self.deleted.push(id.into());
        self
    }

    /// Every id mentioned anywhere in the change set, deduplicated,
    /// in first-seen order.
    pub fn mentioned_ids(&self) -> Vec<RecordId> {
        let mut seen = HashSet::new();
        self.created
            .iter()
            .chain(&self.updated)
            .map(|raw| &raw.id)
            .chain(&self.deleted)
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect()
    }

    /// Number of entries across all three lists.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Change sets for every table participating in sync.
///
/// Iteration order across tables is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseChangeSet {
    tables: HashMap<TableName, TableChangeSet>,
}

impl DatabaseChangeSet {
    /// Create an empty database change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the change set for a table, returning the previous one.
    pub fn insert(
        &mut self,
        table: impl Into<TableName>,
        changes: TableChangeSet,
    ) -> Option<TableChangeSet> {
        self.tables.insert(table.into(), changes)
    }

    /// Builder-style method to set a table's change set.
    pub fn with_table(mut self, table: impl Into<TableName>, changes: TableChangeSet) -> Self {
        self.insert(table, changes);
        self
    }

    /// Get the change set for a table.
    pub fn get(&self, table: &str) -> Option<&TableChangeSet> {
        self.tables.get(table)
    }

    /// Iterate over `(table, changes)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&TableName, &TableChangeSet)> {
        self.tables.iter()
    }

    /// Names of the tables present.
    pub fn table_names(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    /// Number of tables present (including ones with no changes).
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Number of entries across all tables.
    pub fn change_count(&self) -> usize {
        self.tables.values().map(TableChangeSet::len).sum()
    }

    /// Check if no table carries any change.
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableChangeSet::is_empty)
    }
}

impl IntoIterator for DatabaseChangeSet {
    type Item = (TableName, TableChangeSet);
    type IntoIter = std::collections::hash_map::IntoIter<TableName, TableChangeSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}

impl FromIterator<(TableName, TableChangeSet)> for DatabaseChangeSet {
    fn from_iter<I: IntoIterator<Item = (TableName, TableChangeSet)>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().collect(),
        }
    }
}

/// Everything the local store has not yet had acknowledged, plus the record
/// handles it was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChanges {
    /// Outbound change set
    pub changes: DatabaseChangeSet,
    /// The handles that produced `changes.created` and `changes.updated`
    pub affected_records: Vec<Record>,
}

impl LocalChanges {
    /// Assemble a bundle from per-table collection results.
    pub fn from_tables(tables: HashMap<TableName, (TableChangeSet, Vec<Record>)>) -> Self {
        let (changes, affected_records) = split_table_results(tables);
        Self {
            changes,
            affected_records,
        }
    }

    /// Find the handle for a record among the affected records.
    pub fn find_record(&self, table: &str, id: &str) -> Option<&Record> {
        self.affected_records
            .iter()
            .find(|record| record.table == table && record.id == id)
    }

    /// Check if there is nothing to push.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Raw snapshots of the records whose current status is `status`,
/// in encounter order.
pub fn raw_records_with_status(records: &[Record], status: SyncStatus) -> Vec<RawRecord> {
    records
        .iter()
        .filter(|record| record.status == status)
        .map(Record::raw)
        .collect()
}

/// Project per-table `(changes, records)` pairs into the change sets, keyed
/// by table, and one flattened sequence of all records.
pub fn split_table_results(
    tables: HashMap<TableName, (TableChangeSet, Vec<Record>)>,
) -> (DatabaseChangeSet, Vec<Record>) {
    let mut changes = DatabaseChangeSet::new();
    let mut records = Vec::new();
    for (table, (table_changes, table_records)) in tables {
        changes.insert(table, table_changes);
        records.extend(table_records);
    }
    (changes, records)
}
