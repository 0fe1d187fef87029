//! The public entry points.
//!
//! Every operation takes exactly one writer scope from the database and
//! runs all of its tables under it as sub-actions. A failure stops at the
//! first error; tables already finished in that call stay committed.

use crate::{
    apply::apply_changes,
    fetch::{fetch_changes, has_unsynced},
    mark::mark_synced,
    storage::Database,
    sync::{run_round, SyncPeer, SyncSummary},
    DatabaseChangeSet, LocalChanges, Result, SyncConfig,
};

/// Binds a database to a [`SyncConfig`].
#[derive(Debug)]
pub struct Reconciler<'a, D: Database> {
    db: &'a D,
    config: SyncConfig,
}

impl<'a, D: Database> Reconciler<'a, D> {
    /// Create a reconciler with the default configuration.
    pub fn new(db: &'a D) -> Self {
        Self {
            db,
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Merge a change set received from the remote peer.
    pub async fn apply_remote_changes(&self, changes: DatabaseChangeSet) -> Result<()> {
        let mut writer = self.db.action().await?;
        apply_changes(&mut writer, changes, &self.config).await
    }

    /// Collect every unsynced record and tombstone as one consistent bundle.
    pub async fn fetch_local_changes(&self) -> Result<LocalChanges> {
        let mut writer = self.db.action().await?;
        fetch_changes(&mut writer, &self.db.table_names(), &self.config).await
    }

    /// Acknowledge a bundle the peer has accepted.
    ///
    /// Records are marked through the handles stored in the bundle, so an
    /// id whose handle is missing is skipped rather than re-read.
    pub async fn mark_local_changes_as_synced(&self, bundle: &LocalChanges) -> Result<()> {
        let mut writer = self.db.action().await?;
        mark_synced(&mut writer, bundle).await
    }

    /// Check whether a push would carry anything.
    pub async fn has_unsynced_changes(&self) -> Result<bool> {
        let mut writer = self.db.action().await?;
        has_unsynced(&mut writer, &self.db.table_names(), &self.config).await
    }

    /// Run one pull, apply, push, acknowledge round against `peer`.
    pub async fn synchronize<P: SyncPeer + ?Sized>(&self, peer: &P) -> Result<SyncSummary> {
        run_round(self.db, &self.config, peer).await
    }
}

/// [`Reconciler::apply_remote_changes`] with the default configuration.
pub async fn apply_remote_changes<D: Database>(db: &D, changes: DatabaseChangeSet) -> Result<()> {
    Reconciler::new(db).apply_remote_changes(changes).await
}

/// [`Reconciler::fetch_local_changes`] with the default configuration.
pub async fn fetch_local_changes<D: Database>(db: &D) -> Result<LocalChanges> {
    Reconciler::new(db).fetch_local_changes().await
}

/// [`Reconciler::mark_local_changes_as_synced`] with the default configuration.
pub async fn mark_local_changes_as_synced<D: Database>(
    db: &D,
    bundle: &LocalChanges,
) -> Result<()> {
    Reconciler::new(db).mark_local_changes_as_synced(bundle).await
}
