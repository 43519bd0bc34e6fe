//! Persistent catalog: notes, folders, storage directories, images,
//! move records, and a small state table.
//!
//! Built around the same shape as a `SqliteStorage` (`crdt/sqlite_storage.rs`):
//! a `Mutex<rusqlite::Connection>`, a schema created once at open, and a
//! `transaction` helper that relies on `rusqlite::Transaction`'s `Drop`
//! rolling back on early return rather than a hand-rolled two-phase
//! commit. The schema itself has nothing to do with CRDT persistence —
//! it mirrors the catalog rows in the data model instead.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// A catalog row for a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRow {
    pub id: Uuid,
    pub title: String,
    pub sd_id: Uuid,
    pub folder_id: Uuid,
    pub created: i64,
    pub modified: i64,
    pub deleted: bool,
    pub pinned: bool,
    pub content_preview: String,
    pub content_text: String,
}

/// A catalog row for an (active) folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRow {
    pub id: Uuid,
    pub sd_id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
}

/// A catalog row for a registered Storage Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDirRow {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub is_active: bool,
}

/// A catalog row for a media image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRow {
    pub image_id: Uuid,
    pub sd_id: Uuid,
    pub filename: String,
    pub created_at: i64,
    pub size_bytes: i64,
}

/// States of the move-engine state machine (§4.7). Stored as TEXT in the
/// catalog via [`FromStr`]/`Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveState {
    Initiated,
    Copying,
    FilesCopied,
    DbUpdated,
    Cleaning,
    Completed,
    Cancelled,
    RolledBack,
}

impl MoveState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MoveState::Completed | MoveState::Cancelled | MoveState::RolledBack
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            MoveState::Initiated => "initiated",
            MoveState::Copying => "copying",
            MoveState::FilesCopied => "files_copied",
            MoveState::DbUpdated => "db_updated",
            MoveState::Cleaning => "cleaning",
            MoveState::Completed => "completed",
            MoveState::Cancelled => "cancelled",
            MoveState::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for MoveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MoveState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "initiated" => MoveState::Initiated,
            "copying" => MoveState::Copying,
            "files_copied" => MoveState::FilesCopied,
            "db_updated" => MoveState::DbUpdated,
            "cleaning" => MoveState::Cleaning,
            "completed" => MoveState::Completed,
            "cancelled" => MoveState::Cancelled,
            "rolled_back" => MoveState::RolledBack,
            other => {
                return Err(StoreError::InvariantViolation(format!(
                    "unknown move state '{other}' in catalog"
                )))
            }
        })
    }
}

/// A catalog row for a cross-SD move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRow {
    pub id: Uuid,
    pub note_id: Uuid,
    pub source_sd_uuid: Uuid,
    pub target_sd_uuid: Uuid,
    pub target_folder_id: Uuid,
    pub state: MoveState,
    pub initiated_by: String,
    pub initiated_at: i64,
    pub last_modified: i64,
    pub source_sd_path: PathBuf,
    pub target_sd_path: PathBuf,
    pub error: Option<String>,
}

fn uuid_param(id: Uuid) -> String {
    id.to_string()
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvariantViolation(format!("bad uuid '{s}': {e}")))
}

/// SQLite-backed catalog. Every component above this layer talks to the catalog
/// only through this struct.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (or create) a catalog file on disk.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let index = SqliteIndex {
            conn: Mutex::new(conn),
        };
        index.init_schema()?;
        Ok(index)
    }

    /// An in-memory catalog, exercising the exact same SQL path as
    /// production rather than a separate hand-rolled store, so the
    /// transactional behavior under test is the behavior that ships.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let index = SqliteIndex {
            conn: Mutex::new(conn),
        };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                sd_id TEXT NOT NULL,
                folder_id TEXT NOT NULL,
                created INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                pinned INTEGER NOT NULL DEFAULT 0,
                content_preview TEXT NOT NULL DEFAULT '',
                content_text TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_notes_sd ON notes(sd_id);

            CREATE TABLE IF NOT EXISTS folders (
                id TEXT PRIMARY KEY,
                sd_id TEXT NOT NULL,
                name TEXT NOT NULL,
                parent_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_folders_sd ON folders(sd_id);

            CREATE TABLE IF NOT EXISTS storage_dirs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS images (
                image_id TEXT PRIMARY KEY,
                sd_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_images_sd ON images(sd_id);

            CREATE TABLE IF NOT EXISTS note_moves (
                id TEXT PRIMARY KEY,
                note_id TEXT NOT NULL,
                source_sd_uuid TEXT NOT NULL,
                target_sd_uuid TEXT NOT NULL,
                target_folder_id TEXT NOT NULL,
                state TEXT NOT NULL,
                initiated_by TEXT NOT NULL,
                initiated_at INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                source_sd_path TEXT NOT NULL,
                target_sd_path TEXT NOT NULL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_moves_note ON note_moves(note_id);

            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Run `f` inside a transaction. `f`'s `Err` (or an early return)
    /// leaves `txn` unconsumed, which rolls it back on drop; `Ok` commits.
    pub fn transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction) -> StoreResult<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        let txn = conn.transaction()?;
        let result = f(&txn)?;
        txn.commit()?;
        Ok(result)
    }

    // --- notes ---

    pub fn upsert_note(&self, note: &NoteRow) -> StoreResult<()> {
        self.transaction(|txn| upsert_note_txn(txn, note))
    }

    pub fn get_note(&self, id: Uuid) -> StoreResult<Option<NoteRow>> {
        let conn = self.conn.lock().unwrap();
        get_note_txn(&conn, id)
    }

    pub fn delete_note(&self, id: Uuid) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM notes WHERE id = ?1", params![uuid_param(id)])?;
        Ok(())
    }

    pub fn list_notes_by_sd(&self, sd_id: Uuid) -> StoreResult<Vec<NoteRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM notes WHERE sd_id = ?1")?;
        let rows = stmt
            .query_map(params![uuid_param(sd_id)], row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    // --- folders ---

    pub fn upsert_folder(&self, folder: &FolderRow) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO folders (id, sd_id, name, parent_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET sd_id = excluded.sd_id, name = excluded.name, parent_id = excluded.parent_id",
            params![
                uuid_param(folder.id),
                uuid_param(folder.sd_id),
                folder.name,
                folder.parent_id.map(uuid_param),
            ],
        )?;
        Ok(())
    }

    pub fn list_folders_by_sd(&self, sd_id: Uuid) -> StoreResult<Vec<FolderRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, sd_id, name, parent_id FROM folders WHERE sd_id = ?1")?;
        let rows = stmt
            .query_map(params![uuid_param(sd_id)], |row| {
                let id: String = row.get(0)?;
                let sd_id: String = row.get(1)?;
                let name: String = row.get(2)?;
                let parent_id: Option<String> = row.get(3)?;
                Ok((id, sd_id, name, parent_id))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, sd_id, name, parent_id)| {
                Ok(FolderRow {
                    id: parse_uuid(&id)?,
                    sd_id: parse_uuid(&sd_id)?,
                    name,
                    parent_id: parent_id.map(|p| parse_uuid(&p)).transpose()?,
                })
            })
            .collect()
    }

    // --- storage dirs ---

    pub fn upsert_storage_dir(&self, sd: &StorageDirRow) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO storage_dirs (id, name, path, is_active) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, path = excluded.path, is_active = excluded.is_active",
            params![
                uuid_param(sd.id),
                sd.name,
                sd.path.to_string_lossy().to_string(),
                sd.is_active as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_storage_dir(&self, id: Uuid) -> StoreResult<Option<StorageDirRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, path, is_active FROM storage_dirs WHERE id = ?1",
            params![uuid_param(id)],
            row_to_storage_dir,
        )
        .optional()?
        .transpose()
    }

    pub fn list_storage_dirs(&self) -> StoreResult<Vec<StorageDirRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, path, is_active FROM storage_dirs")?;
        let rows = stmt
            .query_map([], row_to_storage_dir)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    // --- images ---

    pub fn upsert_image(&self, image: &ImageRow) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO images (image_id, sd_id, filename, created_at, size_bytes) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(image_id) DO UPDATE SET sd_id = excluded.sd_id, filename = excluded.filename,
                created_at = excluded.created_at, size_bytes = excluded.size_bytes",
            params![
                uuid_param(image.image_id),
                uuid_param(image.sd_id),
                image.filename,
                image.created_at,
                image.size_bytes,
            ],
        )?;
        Ok(())
    }

    pub fn delete_image(&self, image_id: Uuid) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM images WHERE image_id = ?1",
            params![uuid_param(image_id)],
        )?;
        Ok(())
    }

    pub fn list_images_by_sd(&self, sd_id: Uuid) -> StoreResult<Vec<ImageRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT image_id, sd_id, filename, created_at, size_bytes FROM images WHERE sd_id = ?1")?;
        let rows = stmt
            .query_map(params![uuid_param(sd_id)], |row| {
                let image_id: String = row.get(0)?;
                let sd_id: String = row.get(1)?;
                let filename: String = row.get(2)?;
                let created_at: i64 = row.get(3)?;
                let size_bytes: i64 = row.get(4)?;
                Ok((image_id, sd_id, filename, created_at, size_bytes))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(image_id, sd_id, filename, created_at, size_bytes)| {
                Ok(ImageRow {
                    image_id: parse_uuid(&image_id)?,
                    sd_id: parse_uuid(&sd_id)?,
                    filename,
                    created_at,
                    size_bytes,
                })
            })
            .collect()
    }

    /// Whether the `images` table exists — older catalogs predate image
    /// GC treats their absence as a no-op rather than an error.
    pub fn has_images_table(&self) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'images'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // --- move records ---

    pub fn create_move(&self, mv: &MoveRow) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        insert_move(&conn, mv)
    }

    pub fn get_move(&self, id: Uuid) -> StoreResult<Option<MoveRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM note_moves WHERE id = ?1",
            params![uuid_param(id)],
            row_to_move,
        )
        .optional()?
        .transpose()
    }

    /// Transition a move to `to`. The caller (moves.rs) is responsible for
    /// validating `to` against the state machine graph before calling
    /// this — the catalog only persists, it does not decide legality.
    pub fn update_move_state(
        &self,
        id: Uuid,
        to: MoveState,
        error: Option<&str>,
        now_millis: i64,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE note_moves SET state = ?2, error = ?3, last_modified = ?4 WHERE id = ?1",
            params![uuid_param(id), to.as_str(), error, now_millis],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "move",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Every move record regardless of state, newest first. Used by the
    /// inspector; runtime callers want one of the filtered queries below.
    pub fn list_all_moves(&self) -> StoreResult<Vec<MoveRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM note_moves ORDER BY initiated_at DESC")?;
        let rows = stmt
            .query_map([], row_to_move)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn list_non_terminal_moves_by_instance(&self, instance_id: &str) -> StoreResult<Vec<MoveRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM note_moves WHERE initiated_by = ?1
             AND state NOT IN ('completed', 'cancelled', 'rolled_back')",
        )?;
        let rows = stmt
            .query_map(params![instance_id], row_to_move)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn list_stale_non_terminal_moves(
        &self,
        exclude_instance_id: &str,
        older_than_millis: i64,
    ) -> StoreResult<Vec<MoveRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM note_moves WHERE initiated_by != ?1
             AND state NOT IN ('completed', 'cancelled', 'rolled_back')
             AND last_modified < ?2",
        )?;
        let rows = stmt
            .query_map(params![exclude_instance_id, older_than_millis], row_to_move)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Delete terminal move records older than `older_than_millis`.
    pub fn delete_terminal_moves_older_than(&self, older_than_millis: i64) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM note_moves WHERE state IN ('completed', 'cancelled', 'rolled_back')
             AND last_modified < ?1",
            params![older_than_millis],
        )?;
        Ok(changed)
    }

    // --- state table ---

    pub fn get_state(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(StoreError::from)
    }

    pub fn set_state(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn upsert_note_txn(txn: &Transaction, note: &NoteRow) -> StoreResult<()> {
    txn.execute(
        "INSERT INTO notes (id, title, sd_id, folder_id, created, modified, deleted, pinned, content_preview, content_text)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET title = excluded.title, sd_id = excluded.sd_id,
            folder_id = excluded.folder_id, created = excluded.created, modified = excluded.modified,
            deleted = excluded.deleted, pinned = excluded.pinned, content_preview = excluded.content_preview,
            content_text = excluded.content_text",
        params![
            uuid_param(note.id),
            note.title,
            uuid_param(note.sd_id),
            uuid_param(note.folder_id),
            note.created,
            note.modified,
            note.deleted as i64,
            note.pinned as i64,
            note.content_preview,
            note.content_text,
        ],
    )?;
    Ok(())
}

fn get_note_txn(conn: &Connection, id: Uuid) -> StoreResult<Option<NoteRow>> {
    conn.query_row(
        "SELECT * FROM notes WHERE id = ?1",
        params![uuid_param(id)],
        row_to_note,
    )
    .optional()?
    .transpose()
}

fn row_to_note(row: &rusqlite::Row) -> rusqlite::Result<StoreResult<NoteRow>> {
    let id: String = row.get("id")?;
    let title: String = row.get("title")?;
    let sd_id: String = row.get("sd_id")?;
    let folder_id: String = row.get("folder_id")?;
    let created: i64 = row.get("created")?;
    let modified: i64 = row.get("modified")?;
    let deleted: i64 = row.get("deleted")?;
    let pinned: i64 = row.get("pinned")?;
    let content_preview: String = row.get("content_preview")?;
    let content_text: String = row.get("content_text")?;
    Ok((|| {
        Ok(NoteRow {
            id: parse_uuid(&id)?,
            title,
            sd_id: parse_uuid(&sd_id)?,
            folder_id: parse_uuid(&folder_id)?,
            created,
            modified,
            deleted: deleted != 0,
            pinned: pinned != 0,
            content_preview,
            content_text,
        })
    })())
}

fn row_to_storage_dir(row: &rusqlite::Row) -> rusqlite::Result<StoreResult<StorageDirRow>> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let path: String = row.get(2)?;
    let is_active: i64 = row.get(3)?;
    Ok((|| {
        Ok(StorageDirRow {
            id: parse_uuid(&id)?,
            name,
            path: PathBuf::from(path),
            is_active: is_active != 0,
        })
    })())
}

fn insert_move(conn: &Connection, mv: &MoveRow) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO note_moves (id, note_id, source_sd_uuid, target_sd_uuid, target_folder_id,
            state, initiated_by, initiated_at, last_modified, source_sd_path, target_sd_path, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            uuid_param(mv.id),
            uuid_param(mv.note_id),
            uuid_param(mv.source_sd_uuid),
            uuid_param(mv.target_sd_uuid),
            uuid_param(mv.target_folder_id),
            mv.state.as_str(),
            mv.initiated_by,
            mv.initiated_at,
            mv.last_modified,
            mv.source_sd_path.to_string_lossy().to_string(),
            mv.target_sd_path.to_string_lossy().to_string(),
            mv.error,
        ],
    )?;
    Ok(())
}

fn row_to_move(row: &rusqlite::Row) -> rusqlite::Result<StoreResult<MoveRow>> {
    let id: String = row.get("id")?;
    let note_id: String = row.get("note_id")?;
    let source_sd_uuid: String = row.get("source_sd_uuid")?;
    let target_sd_uuid: String = row.get("target_sd_uuid")?;
    let target_folder_id: String = row.get("target_folder_id")?;
    let state: String = row.get("state")?;
    let initiated_by: String = row.get("initiated_by")?;
    let initiated_at: i64 = row.get("initiated_at")?;
    let last_modified: i64 = row.get("last_modified")?;
    let source_sd_path: String = row.get("source_sd_path")?;
    let target_sd_path: String = row.get("target_sd_path")?;
    let error: Option<String> = row.get("error")?;
    Ok((|| {
        Ok(MoveRow {
            id: parse_uuid(&id)?,
            note_id: parse_uuid(&note_id)?,
            source_sd_uuid: parse_uuid(&source_sd_uuid)?,
            target_sd_uuid: parse_uuid(&target_sd_uuid)?,
            target_folder_id: parse_uuid(&target_folder_id)?,
            state: MoveState::from_str(&state)?,
            initiated_by,
            initiated_at,
            last_modified,
            source_sd_path: PathBuf::from(source_sd_path),
            target_sd_path: PathBuf::from(target_sd_path),
            error,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note(id: Uuid, sd_id: Uuid) -> NoteRow {
        NoteRow {
            id,
            title: "Untitled".to_string(),
            sd_id,
            folder_id: Uuid::new_v4(),
            created: 1,
            modified: 1,
            deleted: false,
            pinned: false,
            content_preview: String::new(),
            content_text: String::new(),
        }
    }

    #[test]
    fn upsert_note_then_get_roundtrips() {
        let index = SqliteIndex::in_memory().unwrap();
        let sd_id = Uuid::new_v4();
        let note = sample_note(Uuid::new_v4(), sd_id);
        index.upsert_note(&note).unwrap();
        let fetched = index.get_note(note.id).unwrap().unwrap();
        assert_eq!(fetched, note);
    }

    #[test]
    fn notes_id_is_globally_unique_even_across_sd_move() {
        let index = SqliteIndex::in_memory().unwrap();
        let note_id = Uuid::new_v4();
        let sd1 = Uuid::new_v4();
        let sd2 = Uuid::new_v4();
        index.upsert_note(&sample_note(note_id, sd1)).unwrap();

        // Simulate the move engine's delete-then-insert inside one txn.
        index
            .transaction(|txn| {
                txn.execute("DELETE FROM notes WHERE id = ?1", params![uuid_param(note_id)])?;
                upsert_note_txn(txn, &sample_note(note_id, sd2))
            })
            .unwrap();

        let fetched = index.get_note(note_id).unwrap().unwrap();
        assert_eq!(fetched.sd_id, sd2);

        let conn = index.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM notes WHERE id = ?1", params![uuid_param(note_id)], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let index = SqliteIndex::in_memory().unwrap();
        let note = sample_note(Uuid::new_v4(), Uuid::new_v4());
        let result: StoreResult<()> = index.transaction(|txn| {
            upsert_note_txn(txn, &note)?;
            Err(StoreError::InvariantViolation("forced failure".to_string()))
        });
        assert!(result.is_err());
        assert!(index.get_note(note.id).unwrap().is_none());
    }

    #[test]
    fn move_state_round_trips_through_storage() {
        let index = SqliteIndex::in_memory().unwrap();
        let mv = MoveRow {
            id: Uuid::new_v4(),
            note_id: Uuid::new_v4(),
            source_sd_uuid: Uuid::new_v4(),
            target_sd_uuid: Uuid::new_v4(),
            target_folder_id: Uuid::new_v4(),
            state: MoveState::Initiated,
            initiated_by: "instance-a".to_string(),
            initiated_at: 1,
            last_modified: 1,
            source_sd_path: PathBuf::from("/sd1"),
            target_sd_path: PathBuf::from("/sd2"),
            error: None,
        };
        index.create_move(&mv).unwrap();
        index
            .update_move_state(mv.id, MoveState::Copying, None, 2)
            .unwrap();
        let fetched = index.get_move(mv.id).unwrap().unwrap();
        assert_eq!(fetched.state, MoveState::Copying);
    }

    #[test]
    fn has_images_table_is_true_for_fresh_catalog() {
        let index = SqliteIndex::in_memory().unwrap();
        assert!(index.has_images_table().unwrap());
    }

    #[test]
    fn state_table_set_and_get() {
        let index = SqliteIndex::in_memory().unwrap();
        assert_eq!(index.get_state("defaultNoteDeleted").unwrap(), None);
        index.set_state("defaultNoteDeleted", "true").unwrap();
        assert_eq!(
            index.get_state("defaultNoteDeleted").unwrap(),
            Some("true".to_string())
        );
    }
}
