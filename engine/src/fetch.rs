//! Collecting what the local store has not yet pushed.

use crate::{
    changes::raw_records_with_status,
    storage::{Query, Writer},
    LocalChanges, Result, SyncConfig, SyncStatus, TableChangeSet, TableName,
};
use std::collections::HashMap;
use tracing::debug;

/// Build the outbound bundle for `tables` under one writer scope.
///
/// Every included table appears in the change set, even when it has nothing
/// to report. Excluded tables are left out entirely.
pub(crate) async fn fetch_changes<W: Writer>(
    writer: &mut W,
    tables: &[TableName],
    config: &SyncConfig,
) -> Result<LocalChanges> {
    let mut results = HashMap::new();

    for table in tables.iter().filter(|table| config.includes(table)) {
        let records = writer.query(table, &Query::NotSynced).await?;
        let deleted = writer.deleted_records(table).await?;

        let changes = TableChangeSet {
            created: raw_records_with_status(&records, SyncStatus::Created),
            updated: raw_records_with_status(&records, SyncStatus::Updated),
            deleted,
        };

        debug!(
            table = %table,
            created = changes.created.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "collected local changes"
        );

        results.insert(table.clone(), (changes, records));
    }

    Ok(LocalChanges::from_tables(results))
}

/// Check whether any included table has a dirty record or a tombstone.
pub(crate) async fn has_unsynced<W: Writer>(
    writer: &mut W,
    tables: &[TableName],
    config: &SyncConfig,
) -> Result<bool> {
    for table in tables.iter().filter(|table| config.includes(table)) {
        if !writer.deleted_records(table).await?.is_empty() {
            return Ok(true);
        }
        if !writer.query(table, &Query::NotSynced).await?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}
