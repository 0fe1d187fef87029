//! # Carry Sync
//!
//! The reconciliation core of a local-first sync protocol.
//!
//! A local store tracks, per record, whether the remote peer has seen its
//! latest state, and remembers locally deleted ids as tombstones until the
//! deletion is acknowledged. This crate merges remote change sets into that
//! store, collects what the store still owes the peer, and acknowledges a
//! delivered bundle. Transport is somebody else's job; see [`SyncPeer`] for
//! the seam.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a flat map of fields plus a [`SyncStatus`]:
//! - `Created` - created locally, never pushed
//! - `Updated` - pushed at some point, edited locally since
//! - `Synced` - the peer's copy is believed current
//!
//! ### Change sets
//!
//! A [`TableChangeSet`] lists `created` and `updated` raw records and
//! `deleted` ids. A [`DatabaseChangeSet`] maps table names to those. The
//! JSON shape of both is the wire contract with the peer.
//!
//! ### Storage
//!
//! The reconciler only talks to a [`Database`] through an exclusive
//! [`Writer`] scope. [`MemoryDatabase`] is the reference implementation.
//!
//! ### Conflict resolution
//!
//! Remote deletions always win. Remote content replaces local content
//! wholesale. A local tombstone survives a remote update but not a remote
//! re-creation. The full table lives in [`resolve`].
//!
//! ## Quick Start
//!
//! ```rust
//! use carry_sync::{
//!     fetch_local_changes, mark_local_changes_as_synced, apply_remote_changes,
//!     Database, DatabaseChangeSet, FieldDef, FieldType, MemoryDatabase, RawRecord,
//!     Schema, SyncStatus, TableChangeSet, TableSchema,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> carry_sync::Result<()> {
//! // 1. Define a schema and open a store
//! let schema = Schema::new(1).with_table(TableSchema::new(
//!     "tasks",
//!     vec![FieldDef::required("title", FieldType::String)],
//! ));
//! let db = MemoryDatabase::new(schema);
//!
//! // 2. Make a local edit
//! {
//!     let mut writer = db.action().await?;
//!     let raw = RawRecord::from_value("t1", json!({"title": "write docs"})).unwrap();
//!     writer.create("tasks", raw)?;
//! }
//!
//! // 3. Merge what the peer sent
//! let remote = DatabaseChangeSet::new().with_table(
//!     "tasks",
//!     TableChangeSet::new()
//!         .with_created(RawRecord::from_value("t2", json!({"title": "review"})).unwrap()),
//! );
//! apply_remote_changes(&db, remote).await?;
//!
//! // 4. Push local changes, then acknowledge them
//! let bundle = fetch_local_changes(&db).await?;
//! assert_eq!(bundle.changes.get("tasks").unwrap().created.len(), 1);
//! mark_local_changes_as_synced(&db, &bundle).await?;
//!
//! assert_eq!(db.get("tasks", "t1").await.unwrap().status, SyncStatus::Synced);
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber.
//!
//! ## Persistence
//!
//! Use [`MemoryDatabase::export_snapshot`] and [`MemoryDatabase::import_snapshot`]
//! with [`DatabaseSnapshot`]. Snapshots serialize to JSON with deterministic ordering.

mod apply;
pub mod changes;
pub mod config;
pub mod error;
mod fetch;
mod mark;
pub mod memory;
pub mod reconciler;
pub mod record;
pub mod resolve;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod sync;

// Re-export main types at crate root
pub use changes::{DatabaseChangeSet, LocalChanges, TableChangeSet};
pub use config::{ConfigError, SyncConfig};
pub use error::{Error, Result, StorageError, StorageResult};
pub use memory::{MemoryDatabase, MemoryWriter};
pub use reconciler::{
    apply_remote_changes, fetch_local_changes, mark_local_changes_as_synced, Reconciler,
};
pub use record::{RawRecord, Record, SyncStatus};
pub use resolve::{ChangeKind, LocalState, Resolution};
pub use schema::{FieldDef, FieldType, Schema, TableSchema};
pub use snapshot::{DatabaseSnapshot, TableSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use storage::{BatchOp, Database, Query, SubAction, Writer};
pub use sync::{PullResult, SyncPeer, SyncSummary, LAST_PULLED_AT_KEY};

/// Type aliases for clarity
pub type RecordId = String;
pub type TableName = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
