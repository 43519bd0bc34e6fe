//! Storage core for NoteCove.
//!
//! A Sync Directory (SD) is a filesystem tree holding per-note CRDT logs,
//! snapshots, deletion tombstones, activity logs, and media blobs. This
//! crate is everything needed to make that tree a correct, crash-safe,
//! multi-instance data store: layout and marker lifecycle, the binary log
//! and snapshot codec, the note catalog, the note-discovery reconciler,
//! the cross-SD move engine, orphan-image GC, and default-note bootstrap.
//!
//! The CRDT merge algorithm itself, the editor, the IPC surface, and
//! transport-level sync are out of scope — [`crdt`] only loads/unloads
//! documents and exposes the two views the rest of the crate needs.
#![warn(missing_docs)]

/// Runtime configuration: grace periods, dev/prod marker behavior, GC
/// tuning.
pub mod config;

/// Typed error taxonomy shared by every component.
pub mod error;

/// Filesystem abstraction; the sole dependency on the host OS.
pub mod fs;

/// Binary log/snapshot codec, including the inspector's offset-tracking
/// parsers.
pub mod codec;

/// Sync Directory layout and dev/prod marker lifecycle.
pub mod sd;

/// Persistent catalog of notes, folders, storage directories, images, and
/// move records.
pub mod index;

/// CRDT document loading/unloading facade.
pub mod crdt;

/// Finds notes present on disk but absent from the catalog.
pub mod discovery;

/// Cross-SD atomic note moves.
pub mod moves;

/// Orphan-image mark-and-sweep GC.
pub mod gc;

/// First-run default-note seeding with cross-instance sync probing.
pub mod bootstrap;

/// Current time in milliseconds since the Unix epoch, for callers that
/// don't already have a timestamp on hand (components themselves always
/// take `now_millis` as a parameter, to stay deterministic under test).
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
