//! Acknowledging a pushed bundle.

use crate::{
    storage::{BatchOp, Writer},
    LocalChanges, Result, TableChangeSet,
};
use tracing::{debug, trace};

/// Acknowledge everything in `bundle`, one sub-action per table. Records
/// edited since the fetch stay dirty.
pub(crate) async fn mark_synced<W: Writer>(writer: &mut W, bundle: &LocalChanges) -> Result<()> {
    for (table, changes) in bundle.changes.iter() {
        let mut sub = writer.sub_action(table.as_str());
        mark_table(&mut sub, table, changes, bundle).await?;
    }
    Ok(())
}

async fn mark_table<W: Writer>(
    writer: &mut W,
    table: &str,
    changes: &TableChangeSet,
    bundle: &LocalChanges,
) -> Result<()> {
    if !changes.deleted.is_empty() {
        writer.destroy_deleted_records(table, &changes.deleted).await?;
    }

    let mut ops = Vec::with_capacity(changes.created.len() + changes.updated.len());
    for raw in changes.created.iter().chain(&changes.updated) {
        // Handles are looked up in the bundle, never re-read from storage.
        match bundle.find_record(table, &raw.id) {
            Some(record) => ops.push(BatchOp::MarkSynced(record.clone())),
            None => trace!(table, id = %raw.id, "no handle for pushed record, skipping"),
        }
    }

    debug!(
        table,
        tombstones = changes.deleted.len(),
        marked = ops.len(),
        "acknowledging pushed changes"
    );

    if !ops.is_empty() {
        writer.batch(ops).await?;
    }
    Ok(())
}
