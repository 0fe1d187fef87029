//! Merging a remote change set into the local store.
//!
//! # Algorithm
//!
//! For each table, inside its own sub-action:
//!
//! 1. Collect every id the incoming change mentions
//! 2. Load the live local records with those ids, and the table's tombstones
//! 3. Plan deletions first, then creations, then updates, using [`resolve`]
//! 4. Destroy records and forget tombstones, one awaited call at a time
//! 5. Write every creation and update in a single atomic batch
//!
//! An id listed in `deleted` is never recreated by the same change set.
//! Deletions are durable before the batch commits; if the batch fails they
//! stay applied.

use crate::{
    resolve::{resolve, ChangeKind, LocalState, Resolution},
    storage::{BatchOp, Query, Writer},
    DatabaseChangeSet, Error, RawRecord, Record, RecordId, Result, SyncConfig, SyncStatus,
    TableChangeSet,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Apply every table of `changes` under `writer`, one sub-action per table.
///
/// Tables are processed in no particular order. A failure stops the loop;
/// tables already processed stay applied.
pub(crate) async fn apply_changes<W: Writer>(
    writer: &mut W,
    changes: DatabaseChangeSet,
    config: &SyncConfig,
) -> Result<()> {
    for (table, table_changes) in changes {
        let mut sub = writer.sub_action(table.as_str());
        apply_to_table(&mut sub, &table, table_changes, config).await?;
    }
    Ok(())
}

/// Apply one table's incoming changes.
pub(crate) async fn apply_to_table<W: Writer>(
    writer: &mut W,
    table: &str,
    changes: TableChangeSet,
    config: &SyncConfig,
) -> Result<()> {
    let mentioned = changes.mentioned_ids();
    if mentioned.is_empty() {
        return Ok(());
    }

    let local = writer.query(table, &Query::IdIn(mentioned)).await?;
    let tombstones = writer.deleted_records(table).await?;

    let TableChangeSet {
        created,
        updated,
        deleted,
    } = changes;

    let mut plan = TablePlan::new(table, local, tombstones, &deleted);
    for id in deleted {
        plan.add(Incoming::Delete(id), config)?;
    }
    for raw in created {
        plan.add(Incoming::Create(raw), config)?;
    }
    for raw in updated {
        plan.add(Incoming::Update(raw), config)?;
    }

    debug!(
        table,
        destroyed = plan.destroy.len(),
        forgotten_tombstones = plan.forget_tombstones.len(),
        upserts = plan.ops.len(),
        skipped = plan.skipped,
        "applying remote changes"
    );

    for record in &plan.destroy {
        writer.destroy_permanently(record).await?;
    }
    if !plan.forget_tombstones.is_empty() {
        writer
            .destroy_deleted_records(table, &plan.forget_tombstones)
            .await?;
    }
    if !plan.ops.is_empty() {
        writer.batch(plan.ops).await?;
    }

    Ok(())
}

/// One entry of an incoming table change set.
#[derive(Debug)]
enum Incoming {
    Create(RawRecord),
    Update(RawRecord),
    Delete(RecordId),
}

impl Incoming {
    fn id(&self) -> &RecordId {
        match self {
            Incoming::Create(raw) | Incoming::Update(raw) => &raw.id,
            Incoming::Delete(id) => id,
        }
    }

    fn kind(&self) -> ChangeKind {
        match self {
            Incoming::Create(_) => ChangeKind::Create,
            Incoming::Update(_) => ChangeKind::Update,
            Incoming::Delete(_) => ChangeKind::Delete,
        }
    }
}

/// In-memory plan for one table. Nothing touches storage while planning.
struct TablePlan<'a> {
    table: &'a str,
    local: HashMap<RecordId, Record>,
    tombstones: HashSet<RecordId>,
    /// Ids the remote deleted; creates and updates for them are dropped
    doomed: HashSet<RecordId>,
    destroy: Vec<Record>,
    forget_tombstones: Vec<RecordId>,
    ops: Vec<BatchOp>,
    /// Index into `ops` per id, so repeated ids collapse into one write
    slots: HashMap<RecordId, usize>,
    skipped: usize,
}

impl<'a> TablePlan<'a> {
    fn new(
        table: &'a str,
        local: Vec<Record>,
        tombstones: Vec<RecordId>,
        deleted: &[RecordId],
    ) -> Self {
        Self {
            table,
            local: local
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
            tombstones: tombstones.into_iter().collect(),
            doomed: deleted.iter().cloned().collect(),
            destroy: Vec::new(),
            forget_tombstones: Vec::new(),
            ops: Vec::new(),
            slots: HashMap::new(),
            skipped: 0,
        }
    }

    fn state_of(&self, id: &str) -> LocalState {
        if self.local.contains_key(id) {
            LocalState::Present
        } else if self.tombstones.contains(id) {
            LocalState::Tombstoned
        } else {
            LocalState::Absent
        }
    }

    fn add(&mut self, incoming: Incoming, config: &SyncConfig) -> Result<()> {
        let id = incoming.id().clone();
        if incoming.kind() != ChangeKind::Delete && self.doomed.contains(&id) {
            self.skipped += 1;
            return Ok(());
        }

        match (resolve(self.state_of(&id), incoming.kind()), incoming) {
            (Resolution::Destroy, _) => {
                if let Some(record) = self.local.remove(&id) {
                    self.destroy.push(record);
                }
                self.forget_tombstone(&id);
            }
            (Resolution::UpsertSynced, Incoming::Create(raw)) => {
                if self.already_applied(&raw) {
                    self.skipped += 1;
                    return Ok(());
                }
                if config.strict_creates {
                    return Err(Error::ProtocolViolation(format!(
                        "remote created {}/{} which already exists locally",
                        self.table, raw.id
                    )));
                }
                warn!(
                    table = self.table,
                    id = %id,
                    "remote created a record that already exists locally; applying as update"
                );
                self.upsert(id, raw);
            }
            (Resolution::UpsertSynced, Incoming::Update(raw)) => self.upsert(id, raw),
            (Resolution::Materialize, Incoming::Create(raw) | Incoming::Update(raw)) => {
                self.forget_tombstone(&id);
                let record = Record::from_raw(self.table, raw, SyncStatus::Synced);
                self.local.insert(id, record.clone());
                self.push(BatchOp::Create(record));
            }
            _ => self.skipped += 1,
        }

        Ok(())
    }

    /// A synced local copy identical to the incoming create: a replayed change set.
    fn already_applied(&self, raw: &RawRecord) -> bool {
        self.local.get(&raw.id).is_some_and(|record| {
            record.status == SyncStatus::Synced && record.fields == raw.fields
        })
    }

    fn upsert(&mut self, id: RecordId, raw: RawRecord) {
        if let Some(mut record) = self.local.remove(&id) {
            record.apply_raw(raw, SyncStatus::Synced);
            self.local.insert(id, record.clone());
            self.push(BatchOp::Update(record));
        }
    }

    fn forget_tombstone(&mut self, id: &RecordId) {
        if self.tombstones.remove(id) {
            self.forget_tombstones.push(id.clone());
        }
    }

    /// Queue a write, folding it into an earlier write for the same id.
    fn push(&mut self, op: BatchOp) {
        match self.slots.get(op.id()) {
            Some(&slot) => {
                self.ops[slot] = match self.ops[slot] {
                    BatchOp::Create(_) => BatchOp::Create(op.into_record()),
                    _ => op,
                };
            }
            None => {
                self.slots.insert(op.id().clone(), self.ops.len());
                self.ops.push(op);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType, Schema, TableSchema};
    use crate::storage::Database;
    use crate::{MemoryDatabase, StorageError};
    use serde_json::{json, Value};

    fn test_db() -> MemoryDatabase {
        MemoryDatabase::new(Schema::new(1).with_table(TableSchema::new(
            "tasks",
            vec![FieldDef::optional("title", FieldType::String)],
        )))
    }

    fn raw(id: &str, value: Value) -> RawRecord {
        RawRecord::from_value(id, value).unwrap()
    }

    async fn apply(db: &MemoryDatabase, changes: TableChangeSet, config: &SyncConfig) -> Result<()> {
        let mut writer = db.action().await?;
        apply_to_table(&mut writer, "tasks", changes, config).await
    }

    async fn seed_synced(db: &MemoryDatabase, id: &str, title: &str) {
        let mut writer = db.action().await.unwrap();
        writer
            .batch(vec![BatchOp::Create(Record::from_raw(
                "tasks",
                raw(id, json!({ "title": title })),
                SyncStatus::Synced,
            ))])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_materializes_synced_record() {
        let db = test_db();
        let changes = TableChangeSet::new().with_created(raw("t1", json!({"title": "x"})));

        apply(&db, changes, &SyncConfig::default()).await.unwrap();

        let record = db.get("tasks", "t1").await.unwrap();
        assert_eq!(record.status, SyncStatus::Synced);
        assert_eq!(record.get("title"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn remote_delete_beats_local_edit() {
        let db = test_db();
        seed_synced(&db, "t1", "a").await;
        {
            let mut writer = db.action().await.unwrap();
            let mut edit = serde_json::Map::new();
            edit.insert("title".into(), json!("local edit"));
            writer.update("tasks", "t1", edit).unwrap();
        }

        let changes = TableChangeSet::new().with_deleted("t1");
        apply(&db, changes, &SyncConfig::default()).await.unwrap();

        assert!(db.get("tasks", "t1").await.is_none());
        assert!(db.tombstones("tasks").await.is_empty());
    }

    #[tokio::test]
    async fn remote_delete_confirms_local_tombstone() {
        let db = test_db();
        {
            let mut writer = db.action().await.unwrap();
            writer.create("tasks", raw("t1", json!({}))).unwrap();
            writer.mark_as_deleted("tasks", "t1").unwrap();
        }

        apply(
            &db,
            TableChangeSet::new().with_deleted("t1"),
            &SyncConfig::default(),
        )
        .await
        .unwrap();

        assert!(db.tombstones("tasks").await.is_empty());
    }

    #[tokio::test]
    async fn remote_delete_of_unknown_id_is_ignored() {
        let db = test_db();
        apply(
            &db,
            TableChangeSet::new().with_deleted("ghost"),
            &SyncConfig::default(),
        )
        .await
        .unwrap();
        assert!(db.records("tasks").await.is_empty());
    }

    #[tokio::test]
    async fn update_overwrites_local_edits() {
        let db = test_db();
        seed_synced(&db, "t1", "a").await;
        {
            let mut writer = db.action().await.unwrap();
            let mut edit = serde_json::Map::new();
            edit.insert("title".into(), json!("mine"));
            writer.update("tasks", "t1", edit).unwrap();
        }

        let changes = TableChangeSet::new().with_updated(raw("t1", json!({"title": "theirs"})));
        apply(&db, changes, &SyncConfig::default()).await.unwrap();

        let record = db.get("tasks", "t1").await.unwrap();
        assert_eq!(record.status, SyncStatus::Synced);
        assert!(record.changed.is_empty());
        assert_eq!(record.get("title"), Some(&json!("theirs")));
    }

    #[tokio::test]
    async fn created_and_updated_in_one_change_set() {
        let db = test_db();
        let changes = TableChangeSet::new()
            .with_created(raw("t1", json!({"title": "first"})))
            .with_updated(raw("t1", json!({"title": "second"})));

        apply(&db, changes, &SyncConfig::default()).await.unwrap();

        let record = db.get("tasks", "t1").await.unwrap();
        assert_eq!(record.get("title"), Some(&json!("second")));
        assert_eq!(db.records("tasks").await.len(), 1);
    }

    #[tokio::test]
    async fn strict_creates_reject_collision_without_writing() {
        let db = test_db();
        seed_synced(&db, "t1", "a").await;

        let changes = TableChangeSet::new()
            .with_created(raw("t2", json!({"title": "new"})))
            .with_created(raw("t1", json!({"title": "clash"})));
        let config = SyncConfig::default().with_strict_creates(true);

        let result = apply(&db, changes, &config).await;

        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
        assert!(db.get("tasks", "t2").await.is_none());
        assert_eq!(
            db.get("tasks", "t1").await.unwrap().get("title"),
            Some(&json!("a"))
        );
    }

    #[tokio::test]
    async fn strict_creates_accept_a_replayed_change_set() {
        let db = test_db();
        let config = SyncConfig::default().with_strict_creates(true);
        let changes = TableChangeSet::new()
            .with_created(raw("t1", json!({"title": "x"})))
            .with_created(raw("t2", json!({"title": "y"})));

        apply(&db, changes.clone(), &config).await.unwrap();
        apply(&db, changes, &config).await.unwrap();

        assert_eq!(db.records("tasks").await.len(), 2);
        assert_eq!(
            db.get("tasks", "t1").await.unwrap().status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn strict_creates_reject_collision_with_dirty_record() {
        let db = test_db();
        {
            let mut writer = db.action().await.unwrap();
            writer.create("tasks", raw("t1", json!({"title": "x"}))).unwrap();
        }
        let config = SyncConfig::default().with_strict_creates(true);

        let result = apply(
            &db,
            TableChangeSet::new().with_created(raw("t1", json!({"title": "x"}))),
            &config,
        )
        .await;

        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
        assert_eq!(
            db.get("tasks", "t1").await.unwrap().status,
            SyncStatus::Created
        );
    }

    #[test]
    fn plan_skips_replayed_create() {
        let config = SyncConfig::default();
        let local = Record::from_raw("tasks", raw("t1", json!({"title": "x"})), SyncStatus::Synced);
        let mut plan = TablePlan::new("tasks", vec![local], vec![], &[]);

        plan.add(Incoming::Create(raw("t1", json!({"title": "x"}))), &config)
            .unwrap();

        assert!(plan.ops.is_empty());
        assert_eq!(plan.skipped, 1);
    }

    #[tokio::test]
    async fn unknown_table_is_a_storage_error() {
        let db = test_db();
        let mut writer = db.action().await.unwrap();

        let result = apply_to_table(
            &mut writer,
            "comments",
            TableChangeSet::new().with_deleted("c1"),
            &SyncConfig::default(),
        )
        .await;

        assert_eq!(
            result,
            Err(Error::Storage(StorageError::TableNotFound("comments".into())))
        );
    }

    #[tokio::test]
    async fn empty_change_set_touches_nothing() {
        let db = test_db();
        let mut writer = db.action().await.unwrap();

        // An unknown table with no changes never reaches storage.
        apply_to_table(
            &mut writer,
            "comments",
            TableChangeSet::new(),
            &SyncConfig::default(),
        )
        .await
        .unwrap();
    }

    #[test]
    fn plan_collapses_repeated_ids() {
        let config = SyncConfig::default();
        let mut plan = TablePlan::new("tasks", vec![], vec![], &[]);

        plan.add(Incoming::Update(raw("t1", json!({"title": "a"}))), &config)
            .unwrap();
        plan.add(Incoming::Update(raw("t1", json!({"title": "b"}))), &config)
            .unwrap();

        assert_eq!(plan.ops.len(), 1);
        match &plan.ops[0] {
            BatchOp::Create(record) => assert_eq!(record.get("title"), Some(&json!("b"))),
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[test]
    fn plan_drops_writes_for_deleted_ids() {
        let config = SyncConfig::default();
        let deleted = vec!["t1".to_string()];
        let mut plan = TablePlan::new("tasks", vec![], vec!["t1".into()], &deleted);

        plan.add(Incoming::Delete("t1".into()), &config).unwrap();
        plan.add(Incoming::Create(raw("t1", json!({}))), &config)
            .unwrap();
        plan.add(Incoming::Update(raw("t1", json!({}))), &config)
            .unwrap();

        assert!(plan.ops.is_empty());
        assert_eq!(plan.forget_tombstones, vec!["t1"]);
        assert_eq!(plan.skipped, 2);
    }
}
