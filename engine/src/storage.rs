//! The storage collaborator contract.
//!
//! The reconciler never touches persistence directly. It asks a [`Database`]
//! for a writer scope ([`Database::action`]) and performs every read and
//! write through that [`Writer`]. Holding the writer is holding the store's
//! single-writer lock, so nothing else can write until it is dropped.
//!
//! Nesting is explicit: [`Writer::sub_action`] borrows the parent writer,
//! so a sub-action shares the parent's serialization by construction.

use crate::{error::StorageResult, Record, RecordId, SyncStatus, TableName};
use async_trait::async_trait;

/// Which records a query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every live record in the table
    All,
    /// Live records whose id is in the list
    IdIn(Vec<RecordId>),
    /// Live records whose status is not `Synced`
    NotSynced,
}

impl Query {
    /// Check whether a record satisfies this query.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Query::All => true,
            Query::IdIn(ids) => ids.contains(&record.id),
            Query::NotSynced => record.status != SyncStatus::Synced,
        }
    }
}

/// A prepared write, applied as part of an atomic [`Writer::batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Insert a new record
    Create(Record),
    /// Replace an existing record
    Update(Record),
    /// Acknowledge a pushed handle: the stored record becomes synced if its
    /// fields still match the handle, otherwise it stays dirty with the
    /// newer columns. A record that no longer exists is skipped.
    MarkSynced(Record),
}

impl BatchOp {
    /// The record this operation carries.
    pub fn record(&self) -> &Record {
        match self {
            BatchOp::Create(record) | BatchOp::Update(record) | BatchOp::MarkSynced(record) => {
                record
            }
        }
    }

    /// Consume the operation, returning its record.
    pub fn into_record(self) -> Record {
        match self {
            BatchOp::Create(record) | BatchOp::Update(record) | BatchOp::MarkSynced(record) => {
                record
            }
        }
    }

    /// Table the operation targets.
    pub fn table(&self) -> &TableName {
        &self.record().table
    }

    /// Record id the operation targets.
    pub fn id(&self) -> &RecordId {
        &self.record().id
    }
}

/// A store the reconciler can sync.
#[async_trait]
pub trait Database: Send + Sync {
    /// The writer scope handed out by [`Database::action`].
    type Writer: Writer;

    /// Every table participating in sync.
    fn table_names(&self) -> Vec<TableName>;

    /// Wait for exclusive write access and return the scope handle.
    async fn action(&self) -> StorageResult<Self::Writer>;
}

/// An exclusive, serialized scope over the store.
#[async_trait]
pub trait Writer: Send {
    /// Fetch the live records of `table` matching `query`.
    async fn query(&mut self, table: &str, query: &Query) -> StorageResult<Vec<Record>>;

    /// Irrevocably remove a record. No tombstone is left behind.
    async fn destroy_permanently(&mut self, record: &Record) -> StorageResult<()>;

    /// Read the tombstone set of `table`.
    async fn deleted_records(&mut self, table: &str) -> StorageResult<Vec<RecordId>>;

    /// Remove ids from the tombstone set of `table`. Unknown ids are ignored.
    async fn destroy_deleted_records(&mut self, table: &str, ids: &[RecordId])
        -> StorageResult<()>;

    /// Apply every operation, or none of them.
    async fn batch(&mut self, ops: Vec<BatchOp>) -> StorageResult<()>;

    /// Read a value from the store's local key-value metadata.
    async fn get_local(&mut self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value to the store's local key-value metadata.
    async fn set_local(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Open a nested unit of work under this writer.
    fn sub_action(&mut self, name: impl Into<String>) -> SubAction<'_, Self>
    where
        Self: Sized,
    {
        SubAction::new(self, name)
    }
}

/// A nested unit of work.
///
/// Borrows its parent writer mutably, so the parent cannot be used and no
/// other writer can exist until the sub-action is dropped.
#[derive(Debug)]
pub struct SubAction<'a, W: Writer> {
    parent: &'a mut W,
    name: String,
}

impl<'a, W: Writer> SubAction<'a, W> {
    fn new(parent: &'a mut W, name: impl Into<String>) -> Self {
        let name = name.into();
        tracing::trace!(sub_action = %name, "entering sub-action");
        Self { parent, name }
    }

    /// Name the sub-action was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<'a, W: Writer> Writer for SubAction<'a, W> {
    async fn query(&mut self, table: &str, query: &Query) -> StorageResult<Vec<Record>> {
        self.parent.query(table, query).await
    }

    async fn destroy_permanently(&mut self, record: &Record) -> StorageResult<()> {
        self.parent.destroy_permanently(record).await
    }

    async fn deleted_records(&mut self, table: &str) -> StorageResult<Vec<RecordId>> {
        self.parent.deleted_records(table).await
    }

    async fn destroy_deleted_records(
        &mut self,
        table: &str,
        ids: &[RecordId],
    ) -> StorageResult<()> {
        self.parent.destroy_deleted_records(table, ids).await
    }

    async fn batch(&mut self, ops: Vec<BatchOp>) -> StorageResult<()> {
        self.parent.batch(ops).await
    }

    async fn get_local(&mut self, key: &str) -> StorageResult<Option<String>> {
        self.parent.get_local(key).await
    }

    async fn set_local(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.parent.set_local(key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawRecord;
    use serde_json::json;

    fn record(id: &str, status: SyncStatus) -> Record {
        Record::from_raw(
            "tasks",
            RawRecord::from_value(id, json!({"title": id})).unwrap(),
            status,
        )
    }

    #[test]
    fn query_matches() {
        let created = record("a", SyncStatus::Created);
        let synced = record("b", SyncStatus::Synced);

        assert!(Query::All.matches(&synced));
        assert!(Query::NotSynced.matches(&created));
        assert!(!Query::NotSynced.matches(&synced));
        assert!(Query::IdIn(vec!["b".into()]).matches(&synced));
        assert!(!Query::IdIn(vec!["b".into()]).matches(&created));
        assert!(!Query::IdIn(vec![]).matches(&created));
    }

    #[test]
    fn batch_op_accessors() {
        let op = BatchOp::MarkSynced(record("a", SyncStatus::Updated));
        assert_eq!(op.table(), "tasks");
        assert_eq!(op.id(), "a");
        assert_eq!(op.into_record().status, SyncStatus::Updated);
    }
}
