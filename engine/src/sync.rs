//! One full sync round against a remote peer.
//!
//! A round pulls remote changes, applies them, then pushes whatever the
//! local store still owes the peer and acknowledges it once delivered.
//! No writer scope is held while the peer is being called, so local edits
//! can keep landing in between; anything that lands after the fetch simply
//! waits for the next round.

use crate::{
    apply::apply_changes,
    fetch::fetch_changes,
    mark::mark_synced,
    storage::{Database, Writer},
    DatabaseChangeSet, Error, Result, SyncConfig, Timestamp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Local metadata key holding the timestamp of the last successful pull.
pub const LAST_PULLED_AT_KEY: &str = "lastPulledAt";

/// What a peer returns from a pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    /// Everything that changed remotely since the requested timestamp
    pub changes: DatabaseChangeSet,
    /// Server time the change set is current as of; sent back on the next pull
    pub timestamp: Timestamp,
}

/// Record counts moved by one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub pulled: usize,
    pub pushed: usize,
}

/// The transport side of a sync round.
///
/// Implementations report network or protocol failures as
/// [`Error::Transport`].
#[async_trait]
pub trait SyncPeer: Send + Sync {
    /// Fetch remote changes since `last_pulled_at` (everything when `None`).
    async fn pull(&self, last_pulled_at: Option<Timestamp>) -> Result<PullResult>;

    /// Deliver local changes. Returning `Ok` means the peer has recorded them.
    async fn push(&self, changes: &DatabaseChangeSet) -> Result<()>;
}

/// Read the last pull timestamp from local metadata.
pub(crate) async fn last_pulled_at<W: Writer>(writer: &mut W) -> Result<Option<Timestamp>> {
    match writer.get_local(LAST_PULLED_AT_KEY).await? {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| {
            Error::CorruptMetadata(format!("{LAST_PULLED_AT_KEY} is not a timestamp: '{value}'"))
        }),
    }
}

pub(crate) async fn run_round<D, P>(db: &D, config: &SyncConfig, peer: &P) -> Result<SyncSummary>
where
    D: Database,
    P: SyncPeer + ?Sized,
{
    let since = {
        let mut writer = db.action().await?;
        last_pulled_at(&mut writer).await?
    };

    debug!(?since, "pulling remote changes");
    let PullResult { changes, timestamp } = peer.pull(since).await?;
    let pulled = changes.change_count();

    {
        let mut writer = db.action().await?;
        apply_changes(&mut writer, changes, config).await?;
        writer
            .set_local(LAST_PULLED_AT_KEY, &timestamp.to_string())
            .await?;
    }

    let bundle = {
        let mut writer = db.action().await?;
        fetch_changes(&mut writer, &db.table_names(), config).await?
    };

    let pushed = bundle.changes.change_count();
    if !bundle.is_empty() {
        debug!(pushed, "pushing local changes");
        peer.push(&bundle.changes).await?;

        let mut writer = db.action().await?;
        mark_synced(&mut writer, &bundle).await?;
    }

    info!(pulled, pushed, timestamp, "sync round complete");
    Ok(SyncSummary { pulled, pushed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, TableSchema};
    use crate::MemoryDatabase;

    fn test_db() -> MemoryDatabase {
        MemoryDatabase::new(Schema::new(1).with_table(TableSchema::new("tasks", vec![])))
    }

    #[tokio::test]
    async fn missing_timestamp_reads_as_none() {
        let db = test_db();
        let mut writer = db.action().await.unwrap();
        assert_eq!(last_pulled_at(&mut writer).await, Ok(None));

        writer.set_local(LAST_PULLED_AT_KEY, "1500").await.unwrap();
        assert_eq!(last_pulled_at(&mut writer).await, Ok(Some(1500)));
    }

    #[tokio::test]
    async fn garbage_timestamp_is_corrupt_metadata() {
        let db = test_db();
        let mut writer = db.action().await.unwrap();
        writer.set_local(LAST_PULLED_AT_KEY, "yesterday").await.unwrap();

        assert!(matches!(
            last_pulled_at(&mut writer).await,
            Err(Error::CorruptMetadata(_))
        ));
    }

    #[test]
    fn pull_result_wire_format() {
        let json = r#"{"changes":{"tasks":{"created":[],"updated":[],"deleted":["t1"]}},"timestamp":42}"#;
        let parsed: PullResult = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.timestamp, 42);
        assert_eq!(parsed.changes.get("tasks").unwrap().deleted, vec!["t1"]);
    }
}
