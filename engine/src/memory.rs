//! In-memory storage collaborator.
//!
//! `MemoryDatabase` holds every table behind one async mutex. A writer owns
//! the lock guard, which gives the single-writer discipline the reconciler
//! relies on: while a [`MemoryWriter`] is alive, every other `action()` waits.

use crate::{
    error::StorageResult,
    snapshot::{DatabaseSnapshot, TableSnapshot},
    storage::{BatchOp, Database, Query, Writer},
    RawRecord, Record, RecordId, Schema, StorageError, SyncStatus, TableName,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One table: live records plus the tombstone set.
#[derive(Debug, Clone, Default)]
struct MemoryTable {
    records: BTreeMap<RecordId, Record>,
    /// Locally deleted ids, in deletion order, without duplicates
    tombstones: Vec<RecordId>,
}

impl MemoryTable {
    fn add_tombstone(&mut self, id: RecordId) {
        if !self.tombstones.contains(&id) {
            self.tombstones.push(id);
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<TableName, MemoryTable>,
    local: BTreeMap<String, String>,
}

impl MemoryState {
    fn table(&self, name: &str) -> StorageResult<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> StorageResult<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }
}

/// A store kept entirely in memory.
///
/// Cloning is cheap and clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    schema: Arc<Schema>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    /// Create an empty store with one table per schema table.
    pub fn new(schema: Schema) -> Self {
        let tables = schema
            .tables
            .keys()
            .map(|name| (name.clone(), MemoryTable::default()))
            .collect();

        Self {
            schema: Arc::new(schema),
            state: Arc::new(Mutex::new(MemoryState {
                tables,
                local: BTreeMap::new(),
            })),
        }
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get a live record by table and id.
    pub async fn get(&self, table: &str, id: &str) -> Option<Record> {
        let state = self.state.lock().await;
        state.tables.get(table)?.records.get(id).cloned()
    }

    /// Get every live record in a table, ordered by id.
    pub async fn records(&self, table: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .tables
            .get(table)
            .map(|t| t.records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the tombstone set of a table.
    pub async fn tombstones(&self, table: &str) -> Vec<RecordId> {
        let state = self.state.lock().await;
        state
            .tables
            .get(table)
            .map(|t| t.tombstones.clone())
            .unwrap_or_default()
    }

    /// Export the current state as a snapshot.
    pub async fn export_snapshot(&self) -> DatabaseSnapshot {
        let state = self.state.lock().await;
        let mut snapshot = DatabaseSnapshot::new(self.schema.version);

        for (name, table) in &state.tables {
            snapshot.tables.insert(
                name.clone(),
                TableSnapshot {
                    records: table.records.clone(),
                    tombstones: table.tombstones.clone(),
                },
            );
        }
        snapshot.local = state.local.clone();

        snapshot
    }

    /// Replace the current state with a snapshot's state.
    ///
    /// The snapshot must match this store's schema.
    pub async fn import_snapshot(&self, snapshot: DatabaseSnapshot) -> crate::Result<()> {
        snapshot.validate(&self.schema)?;

        let mut state = self.state.lock().await;
        for table in state.tables.values_mut() {
            *table = MemoryTable::default();
        }

        for (name, table) in snapshot.tables {
            if let Some(target) = state.tables.get_mut(&name) {
                target.records = table.records;
                for id in table.tombstones {
                    target.add_tombstone(id);
                }
            }
        }
        state.local = snapshot.local;

        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Writer = MemoryWriter;

    fn table_names(&self) -> Vec<TableName> {
        self.schema.table_names()
    }

    async fn action(&self) -> StorageResult<MemoryWriter> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(MemoryWriter {
            schema: Arc::clone(&self.schema),
            state: guard,
        })
    }
}

/// Exclusive writer over a [`MemoryDatabase`].
///
/// Besides the [`Writer`] contract used by the reconciler, it carries the
/// application-side mutations that make records dirty.
#[derive(Debug)]
pub struct MemoryWriter {
    schema: Arc<Schema>,
    state: OwnedMutexGuard<MemoryState>,
}

impl MemoryWriter {
    /// Create a record locally. It starts out `Created`.
    pub fn create(&mut self, table: &str, raw: RawRecord) -> StorageResult<Record> {
        self.schema.validate_fields(table, &raw.fields)?;
        let target = self.state.table_mut(table)?;

        if target.records.contains_key(&raw.id) {
            return Err(StorageError::RecordAlreadyExists {
                table: table.to_string(),
                id: raw.id,
            });
        }

        let record = Record::from_raw(table, raw, SyncStatus::Created);
        target.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Edit fields of a record locally.
    pub fn update(
        &mut self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> StorageResult<Record> {
        let target = self.state.table_mut(table)?;
        let mut record = target
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::RecordNotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;

        for (field, value) in fields {
            record.set_field(field, value);
        }
        self.schema.validate_fields(table, &record.fields)?;

        target.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Delete a record locally: destroy it and remember its id as a tombstone.
    pub fn mark_as_deleted(&mut self, table: &str, id: &str) -> StorageResult<()> {
        let target = self.state.table_mut(table)?;
        if target.records.remove(id).is_none() {
            return Err(StorageError::RecordNotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        target.add_tombstone(id.to_string());
        Ok(())
    }

    /// Get a live record by table and id.
    pub fn get(&self, table: &str, id: &str) -> Option<&Record> {
        self.state.tables.get(table)?.records.get(id)
    }

    fn check_batch(&self, ops: &[BatchOp]) -> StorageResult<()> {
        let mut created: HashSet<(&str, &str)> = HashSet::new();

        for op in ops {
            let table = op.table();
            let id = op.id();
            let exists = self.state.table(table)?.records.contains_key(id)
                || created.contains(&(table.as_str(), id.as_str()));

            match op {
                BatchOp::Create(record) => {
                    if exists {
                        return Err(StorageError::RecordAlreadyExists {
                            table: table.clone(),
                            id: id.clone(),
                        });
                    }
                    self.schema.validate_fields(table, &record.fields)?;
                    created.insert((table.as_str(), id.as_str()));
                }
                BatchOp::Update(record) => {
                    if !exists {
                        return Err(StorageError::RecordNotFound {
                            table: table.clone(),
                            id: id.clone(),
                        });
                    }
                    self.schema.validate_fields(table, &record.fields)?;
                }
                // A record deleted since its handle was taken has nothing left to mark.
                BatchOp::MarkSynced(_) => {}
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Writer for MemoryWriter {
    async fn query(&mut self, table: &str, query: &Query) -> StorageResult<Vec<Record>> {
        let target = self.state.table(table)?;
        Ok(target
            .records
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect())
    }

    async fn destroy_permanently(&mut self, record: &Record) -> StorageResult<()> {
        let target = self.state.table_mut(&record.table)?;
        target
            .records
            .remove(&record.id)
            .map(|_| ())
            .ok_or_else(|| StorageError::RecordNotFound {
                table: record.table.clone(),
                id: record.id.clone(),
            })
    }

    async fn deleted_records(&mut self, table: &str) -> StorageResult<Vec<RecordId>> {
        Ok(self.state.table(table)?.tombstones.clone())
    }

    async fn destroy_deleted_records(
        &mut self,
        table: &str,
        ids: &[RecordId],
    ) -> StorageResult<()> {
        let target = self.state.table_mut(table)?;
        target.tombstones.retain(|id| !ids.contains(id));
        Ok(())
    }

    async fn batch(&mut self, ops: Vec<BatchOp>) -> StorageResult<()> {
        self.check_batch(&ops)?;

        for op in ops {
            match op {
                BatchOp::Create(record) | BatchOp::Update(record) => {
                    let target = self.state.table_mut(&record.table)?;
                    target.records.insert(record.id.clone(), record);
                }
                BatchOp::MarkSynced(record) => {
                    let target = self.state.table_mut(&record.table)?;
                    if let Some(stored) = target.records.get_mut(&record.id) {
                        stored.acknowledge(&record);
                    }
                }
            }
        }

        Ok(())
    }

    async fn get_local(&mut self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.state.local.get(key).cloned())
    }

    async fn set_local(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.state.local.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
