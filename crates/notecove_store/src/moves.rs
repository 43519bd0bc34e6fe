//! Move Engine: a persistent state machine moving a note's files and
//! catalog row between two storage directories atomically against crashes.
//!
//! ```text
//! initiated -> copying -> files_copied -> db_updated -> cleaning -> completed
//!    |            |             |              |            |
//!    +----------- rolled_back (reachable from any non-terminal state) ------+
//!    |
//!    +-> cancelled
//! ```
//!
//! Every transition is persisted before the next physical action begins
//! (§5): the only state that survives a crash is the one sitting in the
//! catalog, which is what makes `recover_incomplete_moves` possible.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::fs::FileSystem;
use crate::index::{MoveRow, MoveState, SqliteIndex};

const STALE_MOVE_THRESHOLD_MILLIS: i64 = 5 * 60 * 1000;
const TERMINAL_RECORD_RETENTION_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

fn note_dir(sd_path: &Path, note_id: Uuid) -> PathBuf {
    sd_path.join("notes").join(note_id.to_string())
}

fn staging_dir(sd_path: &Path, note_id: Uuid) -> PathBuf {
    sd_path.join("notes").join(format!(".moving-{note_id}"))
}

fn is_valid_transition(from: MoveState, to: MoveState) -> bool {
    use MoveState::*;
    matches!(
        (from, to),
        (Initiated, Copying)
            | (Initiated, Cancelled)
            | (Copying, FilesCopied)
            | (FilesCopied, DbUpdated)
            | (DbUpdated, Cleaning)
            | (Cleaning, Completed)
    ) || (!from.is_terminal() && to == RolledBack)
}

/// Drives move records through the state machine above.
pub struct MoveEngine<F> {
    fs: Arc<F>,
    index: Arc<SqliteIndex>,
    instance_id: String,
}

impl<F: FileSystem> MoveEngine<F> {
    pub fn new(fs: Arc<F>, index: Arc<SqliteIndex>, instance_id: impl Into<String>) -> Self {
        MoveEngine {
            fs,
            index,
            instance_id: instance_id.into(),
        }
    }

    /// Create a new move record in `initiated` state. Refuses a second
    /// in-flight move for the same note (§9: enforced here rather than at
    /// copy time, since only one move record per note can exist in flight).
    pub fn initiate_move(
        &self,
        note_id: Uuid,
        source_sd_uuid: Uuid,
        target_sd_uuid: Uuid,
        target_folder_id: Uuid,
        now_millis: i64,
    ) -> StoreResult<Uuid> {
        let in_flight = self
            .index
            .list_non_terminal_moves_by_instance(&self.instance_id)?
            .into_iter()
            .any(|m| m.note_id == note_id);
        if in_flight {
            return Err(StoreError::InvariantViolation(format!(
                "note {note_id} already has an in-flight move"
            )));
        }

        let source = self
            .index
            .get_storage_dir(source_sd_uuid)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "storage_dir",
                id: source_sd_uuid.to_string(),
            })?;
        let target = self
            .index
            .get_storage_dir(target_sd_uuid)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "storage_dir",
                id: target_sd_uuid.to_string(),
            })?;

        let mv = MoveRow {
            id: Uuid::new_v4(),
            note_id,
            source_sd_uuid,
            target_sd_uuid,
            target_folder_id,
            state: MoveState::Initiated,
            initiated_by: self.instance_id.clone(),
            initiated_at: now_millis,
            last_modified: now_millis,
            source_sd_path: source.path,
            target_sd_path: target.path,
            error: None,
        };
        self.index.create_move(&mv)?;
        Ok(mv.id)
    }

    /// Run a move to completion. Refuses unless the record is still
    /// `initiated` (step 1 of the happy-path execution).
    pub fn execute_move(&self, move_id: Uuid, now_millis: i64) -> StoreResult<()> {
        let mut mv = self.start_execution(move_id)?;
        self.advance_or_rollback(&mut mv, None, now_millis)
    }

    /// Test hook: run until the record reaches `stop_at` without going
    /// past it, to simulate a crash at a precise point.
    pub fn execute_move_to_state(
        &self,
        move_id: Uuid,
        stop_at: MoveState,
        now_millis: i64,
    ) -> StoreResult<()> {
        let mut mv = self.start_execution(move_id)?;
        self.advance_or_rollback(&mut mv, Some(stop_at), now_millis)
    }

    fn start_execution(&self, move_id: Uuid) -> StoreResult<MoveRow> {
        let mv = self
            .index
            .get_move(move_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "move",
                id: move_id.to_string(),
            })?;
        if mv.state != MoveState::Initiated {
            return Err(StoreError::InvalidTransition {
                move_id,
                from: mv.state.to_string(),
                to: MoveState::Copying.to_string(),
            });
        }
        Ok(mv)
    }

    /// Resume every non-terminal move this instance initiated. Moves whose
    /// source or target SD isn't currently mounted are left alone for a
    /// future boot. Returns the ids of moves that reached a terminal state.
    pub fn recover_incomplete_moves(&self, now_millis: i64) -> StoreResult<Vec<Uuid>> {
        let mut recovered = Vec::new();
        for mut mv in self
            .index
            .list_non_terminal_moves_by_instance(&self.instance_id)?
        {
            let source_sd = self.index.get_storage_dir(mv.source_sd_uuid)?;
            let target_sd = self.index.get_storage_dir(mv.target_sd_uuid)?;
            let (source_sd, target_sd) = match (source_sd, target_sd) {
                (Some(s), Some(t)) if s.is_active && t.is_active => (s, t),
                _ => {
                    log::info!(
                        "move {} is waiting on an unmounted storage dir; retrying on a future boot",
                        mv.id
                    );
                    continue;
                }
            };
            mv.source_sd_path = source_sd.path;
            mv.target_sd_path = target_sd.path;

            if mv.state == MoveState::DbUpdated {
                match self.index.get_note(mv.note_id) {
                    Ok(Some(row)) if row.sd_id == mv.target_sd_uuid => {}
                    Ok(_) => {
                        self.rollback(
                            &mv,
                            "note not present in target SD after db_updated",
                            now_millis,
                        );
                        continue;
                    }
                    Err(e) => {
                        self.rollback(
                            &mv,
                            &format!("failed to verify catalog state during recovery: {e}"),
                            now_millis,
                        );
                        continue;
                    }
                }
            }

            if mv.state == MoveState::Cleaning {
                let staging = staging_dir(&mv.target_sd_path, mv.note_id);
                let final_dir = note_dir(&mv.target_sd_path, mv.note_id);
                if self.fs.exists(&staging) && !self.fs.exists(&final_dir) {
                    if let Err(e) = self.fs.rename(&staging, &final_dir) {
                        self.rollback(
                            &mv,
                            &format!("failed to finish rename during recovery: {e}"),
                            now_millis,
                        );
                        continue;
                    }
                }
            }

            match self.advance_or_rollback(&mut mv, None, now_millis) {
                Ok(()) => recovered.push(mv.id),
                Err(e) => log::warn!("move {} rolled back during recovery: {e}", mv.id),
            }
        }
        Ok(recovered)
    }

    /// Non-terminal moves initiated by other instances whose last state
    /// advance is older than 5 minutes. Reported only — the initiating
    /// instance owns resuming them.
    pub fn list_stale_moves(&self, now_millis: i64) -> StoreResult<Vec<MoveRow>> {
        self.index
            .list_stale_non_terminal_moves(&self.instance_id, now_millis - STALE_MOVE_THRESHOLD_MILLIS)
    }

    /// Delete terminal move records older than 30 days.
    pub fn cleanup_terminal_moves(&self, now_millis: i64) -> StoreResult<usize> {
        self.index
            .delete_terminal_moves_older_than(now_millis - TERMINAL_RECORD_RETENTION_MILLIS)
    }

    fn advance_or_rollback(
        &self,
        mv: &mut MoveRow,
        stop_at: Option<MoveState>,
        now_millis: i64,
    ) -> StoreResult<()> {
        match self.advance(mv, stop_at, now_millis) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.rollback(mv, &e.to_string(), now_millis);
                Err(e)
            }
        }
    }

    fn advance(
        &self,
        mv: &mut MoveRow,
        stop_at: Option<MoveState>,
        now_millis: i64,
    ) -> StoreResult<()> {
        loop {
            if stop_at == Some(mv.state) {
                return Ok(());
            }
            match mv.state {
                MoveState::Initiated => {
                    self.transition(mv, MoveState::Copying, now_millis)?;
                }
                MoveState::Copying => {
                    self.do_copy(mv)?;
                    self.transition(mv, MoveState::FilesCopied, now_millis)?;
                }
                MoveState::FilesCopied => {
                    self.update_catalog_for_move(mv)?;
                    self.transition(mv, MoveState::DbUpdated, now_millis)?;
                }
                MoveState::DbUpdated => {
                    self.do_rename(mv)?;
                    self.transition(mv, MoveState::Cleaning, now_millis)?;
                }
                MoveState::Cleaning => {
                    self.do_delete_source(mv)?;
                    self.transition(mv, MoveState::Completed, now_millis)?;
                    return Ok(());
                }
                MoveState::Completed | MoveState::Cancelled | MoveState::RolledBack => {
                    return Err(StoreError::InvariantViolation(format!(
                        "move {} is already terminal ({})",
                        mv.id, mv.state
                    )));
                }
            }
        }
    }

    fn transition(&self, mv: &mut MoveRow, to: MoveState, now_millis: i64) -> StoreResult<()> {
        if !is_valid_transition(mv.state, to) {
            return Err(StoreError::InvalidTransition {
                move_id: mv.id,
                from: mv.state.to_string(),
                to: to.to_string(),
            });
        }
        self.index.update_move_state(mv.id, to, None, now_millis)?;
        mv.state = to;
        mv.last_modified = now_millis;
        Ok(())
    }

    fn do_copy(&self, mv: &MoveRow) -> StoreResult<()> {
        let staging = staging_dir(&mv.target_sd_path, mv.note_id);
        if self.fs.exists(&staging) {
            self.fs.remove_dir_all(&staging)?;
        }
        let source = note_dir(&mv.source_sd_path, mv.note_id);
        self.fs.copy_tree(&source, &staging)
    }

    fn do_rename(&self, mv: &MoveRow) -> StoreResult<()> {
        let staging = staging_dir(&mv.target_sd_path, mv.note_id);
        let final_dir = note_dir(&mv.target_sd_path, mv.note_id);
        self.fs.rename(&staging, &final_dir)
    }

    fn do_delete_source(&self, mv: &MoveRow) -> StoreResult<()> {
        let source = note_dir(&mv.source_sd_path, mv.note_id);
        self.fs.remove_dir_all(&source)
    }

    /// Step 5: delete-then-insert inside one transaction, so `notes.id`
    /// is never briefly duplicated across two SDs. Updates in place if a
    /// row from a prior failed attempt is already sitting in the target.
    fn update_catalog_for_move(&self, mv: &MoveRow) -> StoreResult<()> {
        let original = self
            .index
            .get_note(mv.note_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "note",
                id: mv.note_id.to_string(),
            })?;
        self.index.transaction(|txn| {
            txn.execute(
                "DELETE FROM notes WHERE id = ?1 AND sd_id = ?2",
                params![mv.note_id.to_string(), mv.source_sd_uuid.to_string()],
            )?;
            let existing_in_target: Option<String> = txn
                .query_row(
                    "SELECT sd_id FROM notes WHERE id = ?1",
                    params![mv.note_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if existing_in_target.is_some() {
                txn.execute(
                    "UPDATE notes SET title = ?2, folder_id = ?3, created = ?4, modified = ?5,
                        deleted = ?6, pinned = ?7, content_preview = ?8, content_text = ?9, sd_id = ?10
                     WHERE id = ?1",
                    params![
                        mv.note_id.to_string(),
                        original.title,
                        mv.target_folder_id.to_string(),
                        original.created,
                        original.modified,
                        original.deleted as i64,
                        original.pinned as i64,
                        original.content_preview,
                        original.content_text,
                        mv.target_sd_uuid.to_string(),
                    ],
                )?;
            } else {
                txn.execute(
                    "INSERT INTO notes (id, title, sd_id, folder_id, created, modified, deleted, pinned, content_preview, content_text)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        mv.note_id.to_string(),
                        original.title,
                        mv.target_sd_uuid.to_string(),
                        mv.target_folder_id.to_string(),
                        original.created,
                        original.modified,
                        original.deleted as i64,
                        original.pinned as i64,
                        original.content_preview,
                        original.content_text,
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn revert_catalog_sd(&self, mv: &MoveRow) -> StoreResult<()> {
        self.index.transaction(|txn| {
            txn.execute(
                "UPDATE notes SET sd_id = ?2 WHERE id = ?1 AND sd_id = ?3",
                params![
                    mv.note_id.to_string(),
                    mv.source_sd_uuid.to_string(),
                    mv.target_sd_uuid.to_string()
                ],
            )?;
            Ok(())
        })
    }

    /// Remove the staging dir, revert the catalog row to source if it was
    /// already moved, and record a composite error. A rollback failure
    /// still ends in `rolled_back` rather than retrying.
    fn rollback(&self, mv: &MoveRow, reason: &str, now_millis: i64) {
        let mut problems = Vec::new();

        let staging = staging_dir(&mv.target_sd_path, mv.note_id);
        if self.fs.exists(&staging) {
            if let Err(e) = self.fs.remove_dir_all(&staging) {
                problems.push(format!("failed to remove staging dir: {e}"));
            }
        }

        if let Err(e) = self.revert_catalog_sd(mv) {
            problems.push(format!("failed to revert catalog sd_id: {e}"));
        }

        let mut composite = reason.to_string();
        if !problems.is_empty() {
            composite.push_str("; rollback errors: ");
            composite.push_str(&problems.join(", "));
        }

        if let Err(e) =
            self.index
                .update_move_state(mv.id, MoveState::RolledBack, Some(&composite), now_millis)
        {
            log::error!("failed to persist rollback for move {}: {e}", mv.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use crate::index::{NoteRow, StorageDirRow};

    fn setup(fs: &InMemoryFileSystem, index: &SqliteIndex) -> (Uuid, Uuid, Uuid) {
        let sd1 = Uuid::new_v4();
        let sd2 = Uuid::new_v4();
        let sd1_path = PathBuf::from("/sd1");
        let sd2_path = PathBuf::from("/sd2");
        index
            .upsert_storage_dir(&StorageDirRow {
                id: sd1,
                name: "sd1".to_string(),
                path: sd1_path.clone(),
                is_active: true,
            })
            .unwrap();
        index
            .upsert_storage_dir(&StorageDirRow {
                id: sd2,
                name: "sd2".to_string(),
                path: sd2_path,
                is_active: true,
            })
            .unwrap();

        let note_id = Uuid::new_v4();
        let folder_id = Uuid::new_v4();
        fs.write(&note_dir(&sd1_path, note_id).join("snapshot.yjs"), b"data")
            .unwrap();
        index
            .upsert_note(&NoteRow {
                id: note_id,
                title: "Grocery list".to_string(),
                sd_id: sd1,
                folder_id,
                created: 1,
                modified: 1,
                deleted: false,
                pinned: false,
                content_preview: String::new(),
                content_text: String::new(),
            })
            .unwrap();

        (sd1, sd2, note_id)
    }

    #[test]
    fn happy_path_move_completes() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let index = Arc::new(SqliteIndex::in_memory().unwrap());
        let (sd1, sd2, note_id) = setup(&fs, &index);
        let engine = MoveEngine::new(fs.clone(), index.clone(), "instance-a");

        let target_folder = Uuid::new_v4();
        let move_id = engine
            .initiate_move(note_id, sd1, sd2, target_folder, 1000)
            .unwrap();
        engine.execute_move(move_id, 1001).unwrap();

        let mv = index.get_move(move_id).unwrap().unwrap();
        assert_eq!(mv.state, MoveState::Completed);

        let note = index.get_note(note_id).unwrap().unwrap();
        assert_eq!(note.sd_id, sd2);
        assert_eq!(note.folder_id, target_folder);

        assert!(fs.exists(&note_dir(&PathBuf::from("/sd2"), note_id).join("snapshot.yjs")));
        assert!(!fs.exists(&note_dir(&PathBuf::from("/sd1"), note_id)));
    }

    #[test]
    fn crash_at_files_copied_then_recovery_completes() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let index = Arc::new(SqliteIndex::in_memory().unwrap());
        let (sd1, sd2, note_id) = setup(&fs, &index);
        let engine = MoveEngine::new(fs.clone(), index.clone(), "instance-a");

        let move_id = engine
            .initiate_move(note_id, sd1, sd2, Uuid::new_v4(), 1000)
            .unwrap();
        engine
            .execute_move_to_state(move_id, MoveState::FilesCopied, 1001)
            .unwrap();

        // Mid-state: staging exists in sd2, note still cataloged under sd1,
        // sd1's on-disk note directory is untouched.
        assert!(fs.exists(&staging_dir(&PathBuf::from("/sd2"), note_id)));
        assert_eq!(
            index.get_note(note_id).unwrap().unwrap().sd_id,
            sd1
        );
        assert!(fs.exists(&note_dir(&PathBuf::from("/sd1"), note_id)));

        let recovered = engine.recover_incomplete_moves(2000).unwrap();
        assert_eq!(recovered, vec![move_id]);

        let mv = index.get_move(move_id).unwrap().unwrap();
        assert_eq!(mv.state, MoveState::Completed);
        assert_eq!(index.get_note(note_id).unwrap().unwrap().sd_id, sd2);
        assert!(fs.exists(&note_dir(&PathBuf::from("/sd2"), note_id)));
        assert!(!fs.exists(&note_dir(&PathBuf::from("/sd1"), note_id)));
    }

    #[test]
    fn initiate_move_refuses_second_in_flight_move_for_same_note() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let index = Arc::new(SqliteIndex::in_memory().unwrap());
        let (sd1, sd2, note_id) = setup(&fs, &index);
        let engine = MoveEngine::new(fs, index, "instance-a");

        engine
            .initiate_move(note_id, sd1, sd2, Uuid::new_v4(), 1000)
            .unwrap();
        let second = engine.initiate_move(note_id, sd1, sd2, Uuid::new_v4(), 1001);
        assert!(second.is_err());
    }

    #[test]
    fn catalog_update_failure_rolls_back_and_cleans_staging() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let index = Arc::new(SqliteIndex::in_memory().unwrap());
        let (sd1, sd2, note_id) = setup(&fs, &index);

        let engine = MoveEngine::new(fs.clone(), index.clone(), "instance-a");
        let move_id = engine
            .initiate_move(note_id, sd1, sd2, Uuid::new_v4(), 1000)
            .unwrap();
        // Simulate external corruption: the note row disappears between
        // initiation and execution, so the db-update step fails after the
        // file copy has already happened.
        index.delete_note(note_id).unwrap();

        let result = engine.execute_move(move_id, 1001);
        assert!(result.is_err());

        let mv = index.get_move(move_id).unwrap().unwrap();
        assert_eq!(mv.state, MoveState::RolledBack);
        assert!(!fs.exists(&staging_dir(&PathBuf::from("/sd2"), note_id)));
        assert!(fs.exists(&note_dir(&PathBuf::from("/sd1"), note_id)));
    }

    #[test]
    fn cleanup_terminal_moves_deletes_only_old_terminal_records() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let index = Arc::new(SqliteIndex::in_memory().unwrap());
        let (sd1, sd2, note_id) = setup(&fs, &index);
        let engine = MoveEngine::new(fs, index.clone(), "instance-a");

        let move_id = engine
            .initiate_move(note_id, sd1, sd2, Uuid::new_v4(), 1000)
            .unwrap();
        engine.execute_move(move_id, 1001).unwrap();

        let thirty_one_days_millis = 31 * 24 * 60 * 60 * 1000;
        let deleted = engine
            .cleanup_terminal_moves(1001 + thirty_one_days_millis)
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(index.get_move(move_id).unwrap().is_none());
    }

    #[test]
    fn stale_moves_from_other_instances_are_reported_not_touched() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let index = Arc::new(SqliteIndex::in_memory().unwrap());
        let (sd1, sd2, note_id) = setup(&fs, &index);
        let other = MoveEngine::new(fs, index.clone(), "instance-b");
        let move_id = other
            .initiate_move(note_id, sd1, sd2, Uuid::new_v4(), 1000)
            .unwrap();

        let six_minutes_millis = 6 * 60 * 1000;
        let stale = index
            .list_stale_non_terminal_moves("instance-a", 1000 + six_minutes_millis)
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, move_id);

        // Still initiated: nothing acted on it.
        assert_eq!(
            index.get_move(move_id).unwrap().unwrap().state,
            MoveState::Initiated
        );
    }
}
