//! Events emitted by storage-core components (§6).
//!
//! These are informational only — nothing in this crate subscribes to its
//! own events. A host application passes an `emit: Option<&(dyn Fn(&StoreEvent)
//! + Send + Sync)>` callback into the operation that produces the event (e.g.
//! `discovery::run_discovery`), which calls it once per event as that pass
//! completes. There is no stateful registration step; the callback only
//! applies to the call it was passed into.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted while notes and folders change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    /// A note was newly discovered or created in a folder.
    NoteCreated {
        /// Storage Directory the note lives in.
        sd_id: Uuid,
        /// The note's id.
        note_id: Uuid,
        /// Folder the note was created in.
        folder_id: Uuid,
    },

    /// A folder's contents changed (note added, removed, or moved within
    /// it).
    FolderUpdated {
        /// Storage Directory the folder lives in.
        sd_id: Uuid,
    },
}
