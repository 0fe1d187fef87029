//! Per-record conflict resolution for incoming remote changes.
//!
//! The decision depends only on what the local side holds for an id and
//! what kind of change arrived for it, so it is a pure function over two
//! small enums. Remote content wins whenever a record is written; a local
//! tombstone wins only against a remote update.
//!
//! | local \ incoming | Create        | Update        | Delete  |
//! |------------------|---------------|---------------|---------|
//! | Absent           | Materialize   | Materialize   | Skip    |
//! | Tombstoned       | Materialize   | Skip          | Destroy |
//! | Present          | UpsertSynced  | UpsertSynced  | Destroy |

use serde::{Deserialize, Serialize};

/// What the local store holds for a record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocalState {
    /// No live record and no tombstone
    Absent,
    /// Deleted locally; the deletion has not been acknowledged
    Tombstoned,
    /// A live record exists
    Present,
}

/// Which list of the incoming change set an id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// The action to take for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Remove every local trace of the id: the live record or the tombstone
    Destroy,
    /// Overwrite the live record with the incoming fields, mark it synced
    UpsertSynced,
    /// Build a new synced record from the incoming fields, dropping any tombstone
    Materialize,
    /// Leave local state as it is
    Skip,
}

/// Decide what to do with one incoming change.
pub fn resolve(local: LocalState, incoming: ChangeKind) -> Resolution {
    match (local, incoming) {
        (LocalState::Present, ChangeKind::Delete) => Resolution::Destroy,
        (LocalState::Tombstoned, ChangeKind::Delete) => Resolution::Destroy,
        (LocalState::Absent, ChangeKind::Delete) => Resolution::Skip,

        // Local copy of an id the remote calls new: treat as a correction.
        (LocalState::Present, ChangeKind::Create) => Resolution::UpsertSynced,
        // Remote re-creation beats the local deletion.
        (LocalState::Tombstoned, ChangeKind::Create) => Resolution::Materialize,
        (LocalState::Absent, ChangeKind::Create) => Resolution::Materialize,

        (LocalState::Present, ChangeKind::Update) => Resolution::UpsertSynced,
        // Local deletion is kept and pushed on a later round.
        (LocalState::Tombstoned, ChangeKind::Update) => Resolution::Skip,
        // Missing locally: self-heal.
        (LocalState::Absent, ChangeKind::Update) => Resolution::Materialize,
    }
}
