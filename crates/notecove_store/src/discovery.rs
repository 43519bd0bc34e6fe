//! Note-Discovery Reconciler.
//!
//! Walks `<sd>/notes/`, skips tombstoned ids, and imports anything
//! missing from the catalog. Runs serially; its only external effects are
//! a catalog upsert per note and an event emission (§5).

use std::collections::HashSet;
use std::path::Path;

use uuid::Uuid;

use crate::crdt::CrdtManager;
use crate::error::StoreResult;
use crate::fs::{FileSystem, StoreEvent};
use crate::index::{FolderRow, NoteRow, SqliteIndex};

/// Derive a title the way the external title extractor would: strip
/// angle-bracket markup, default to `"Untitled"` on empty input.
fn derive_title(text: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    let trimmed = out.lines().next().unwrap_or("").trim();
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

fn derive_content_preview(text: &str) -> String {
    let after_first_line = match text.find('\n') {
        Some(idx) => &text[idx + 1..],
        None => "",
    };
    after_first_line.chars().take(200).collect()
}

/// Build the tombstone set: every noteId named on the first `|`-delimited
/// field of any line in any `<sd>/deletions/*.log` file.
fn build_tombstone_set(fs: &dyn FileSystem, sd_path: &Path) -> HashSet<Uuid> {
    let mut tombstones = HashSet::new();
    let deletions_dir = sd_path.join("deletions");
    let entries = match fs.list_dir(&deletions_dir) {
        Ok(entries) => entries,
        Err(_) => return tombstones,
    };
    for path in entries {
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let contents = match fs.read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("skipping unreadable deletions file {path:?}: {e}");
                continue;
            }
        };
        for line in contents.lines() {
            if let Some((id_str, _rest)) = line.split_once('|') {
                if let Ok(id) = Uuid::parse_str(id_str) {
                    tombstones.insert(id);
                }
            }
        }
    }
    tombstones
}

fn candidate_note_ids(fs: &dyn FileSystem, sd_path: &Path) -> Vec<Uuid> {
    let notes_dir = sd_path.join("notes");
    let entries = fs.list_dir(&notes_dir).unwrap_or_default();
    entries
        .into_iter()
        .filter(|p| fs.is_dir(p))
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).and_then(|n| Uuid::parse_str(n).ok()))
        .collect()
}

/// Run one discovery pass over `sd_id`/`sd_path`. Returns the set of
/// newly imported note ids.
pub fn run_discovery<C: CrdtManager>(
    fs: &dyn FileSystem,
    index: &SqliteIndex,
    crdt: &C,
    sd_id: Uuid,
    sd_path: &Path,
    emit: Option<&(dyn Fn(&StoreEvent) + Send + Sync)>,
) -> StoreResult<HashSet<Uuid>> {
    let tombstones = build_tombstone_set(fs, sd_path);
    let mut imported = HashSet::new();

    for note_id in candidate_note_ids(fs, sd_path) {
        if tombstones.contains(&note_id) {
            continue;
        }
        if index.get_note(note_id)?.is_some() {
            continue;
        }

        match import_one_note(index, crdt, sd_id, note_id) {
            Ok(true) => {
                imported.insert(note_id);
                if let Some(emit) = emit {
                    emit(&StoreEvent::NoteCreated {
                        sd_id,
                        note_id,
                        folder_id: index
                            .get_note(note_id)?
                            .map(|n| n.folder_id)
                            .unwrap_or_default(),
                    });
                }
            }
            Ok(false) => {
                // Not finished syncing yet; retried on the next cycle.
            }
            Err(e) => {
                log::warn!("discovery: skipping note {note_id}: {e}");
            }
        }
    }

    if !imported.is_empty() {
        reload_folders(index, crdt, sd_id)?;
        if let Some(emit) = emit {
            emit(&StoreEvent::FolderUpdated { sd_id });
        }
    }

    Ok(imported)
}

/// Returns `Ok(true)` if the note was imported, `Ok(false)` if it should
/// be retried later (content not yet synced).
fn import_one_note<C: CrdtManager>(
    index: &SqliteIndex,
    crdt: &C,
    sd_id: Uuid,
    note_id: Uuid,
) -> StoreResult<bool> {
    crdt.load_note(note_id, sd_id)?;
    // Guaranteed release even on the early-return paths below.
    let result = (|| -> StoreResult<bool> {
        let doc = match crdt.get_document(note_id) {
            Some(d) => d,
            None => return Ok(false),
        };
        let content = doc.content_fragment();
        if content.is_empty() {
            return Ok(false);
        }
        let text = content.to_text();
        let title = derive_title(&text);
        let content_preview = derive_content_preview(&text);
        let metadata = doc.metadata();

        index.upsert_note(&NoteRow {
            id: note_id,
            title,
            sd_id,
            folder_id: metadata.folder_id,
            created: metadata.created,
            modified: metadata.modified,
            deleted: metadata.deleted,
            pinned: metadata.pinned,
            content_preview,
            content_text: text,
        })?;
        Ok(true)
    })();
    crdt.unload_note(note_id);
    result
}

/// Reload the folder tree for `sd_id` from its CRDT and upsert every
/// folder it names into the catalog.
fn reload_folders<C: CrdtManager>(index: &SqliteIndex, crdt: &C, sd_id: Uuid) -> StoreResult<()> {
    let tree = crdt.load_folder_tree(sd_id)?;
    let mut entries = Vec::new();
    tree.collect_folder_entries(&mut entries);
    for (id, name, parent_id) in entries {
        index.upsert_folder(&FolderRow {
            id,
            sd_id,
            name,
            parent_id,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{NoteMetadata, TestCrdtManager, XmlNode};
    use crate::fs::InMemoryFileSystem;
    use std::path::PathBuf;

    fn note_dir(sd: &Path, id: Uuid) -> PathBuf {
        sd.join("notes").join(id.to_string())
    }

    #[test]
    fn discovery_skips_tombstones() {
        let fs = InMemoryFileSystem::new();
        let index = SqliteIndex::in_memory().unwrap();
        let crdt = TestCrdtManager::new();
        let sd_path = PathBuf::from("/sd1");
        let sd_id = Uuid::new_v4();

        let ghost = Uuid::new_v4();
        let live = Uuid::new_v4();
        fs.create_dir_all(&note_dir(&sd_path, ghost)).unwrap();
        fs.create_dir_all(&note_dir(&sd_path, live)).unwrap();
        fs.write(
            &sd_path.join("deletions").join("x.log"),
            format!("{ghost}|deleted\n").as_bytes(),
        )
        .unwrap();

        crdt.seed(
            ghost,
            XmlNode::Text("should never be read".to_string()),
            NoteMetadata::default(),
        );
        crdt.seed(live, XmlNode::Text("hello world".to_string()), NoteMetadata::default());

        let mut events = Vec::new();
        let emit = |e: &StoreEvent| events.push(format!("{e:?}"));
        let imported = run_discovery(&fs, &index, &crdt, sd_id, &sd_path, Some(&emit)).unwrap();

        assert_eq!(imported, HashSet::from([live]));
        assert!(index.get_note(ghost).unwrap().is_none());
        assert!(index.get_note(live).unwrap().is_some());
        assert_eq!(events.iter().filter(|e| e.contains("NoteCreated")).count(), 1);
    }

    #[test]
    fn discovery_is_idempotent_once_caught_up() {
        let fs = InMemoryFileSystem::new();
        let index = SqliteIndex::in_memory().unwrap();
        let crdt = TestCrdtManager::new();
        let sd_path = PathBuf::from("/sd1");
        let sd_id = Uuid::new_v4();

        let note_id = Uuid::new_v4();
        fs.create_dir_all(&note_dir(&sd_path, note_id)).unwrap();
        crdt.seed(note_id, XmlNode::Text("content".to_string()), NoteMetadata::default());

        let first = run_discovery(&fs, &index, &crdt, sd_id, &sd_path, None).unwrap();
        assert_eq!(first.len(), 1);
        let second = run_discovery(&fs, &index, &crdt, sd_id, &sd_path, None).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn empty_content_fragment_is_skipped_and_retried_later() {
        let fs = InMemoryFileSystem::new();
        let index = SqliteIndex::in_memory().unwrap();
        let crdt = TestCrdtManager::new();
        let sd_path = PathBuf::from("/sd1");
        let sd_id = Uuid::new_v4();

        let note_id = Uuid::new_v4();
        fs.create_dir_all(&note_dir(&sd_path, note_id)).unwrap();
        crdt.seed(note_id, XmlNode::Text(String::new()), NoteMetadata::default());

        let first = run_discovery(&fs, &index, &crdt, sd_id, &sd_path, None).unwrap();
        assert!(first.is_empty());
        assert!(index.get_note(note_id).unwrap().is_none());

        crdt.update_content(note_id, XmlNode::Text("now synced".to_string()));
        let second = run_discovery(&fs, &index, &crdt, sd_id, &sd_path, None).unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn importing_a_note_reloads_folders_and_emits_folder_updated() {
        use std::collections::HashMap as StdHashMap;

        let fs = InMemoryFileSystem::new();
        let index = SqliteIndex::in_memory().unwrap();
        let crdt = TestCrdtManager::new();
        let sd_path = PathBuf::from("/sd1");
        let sd_id = Uuid::new_v4();

        let note_id = Uuid::new_v4();
        fs.create_dir_all(&note_dir(&sd_path, note_id)).unwrap();
        crdt.seed(note_id, XmlNode::Text("hello".to_string()), NoteMetadata::default());

        let folder_id = Uuid::new_v4();
        let sub_folder_id = Uuid::new_v4();
        crdt.seed_folder_tree(
            sd_id,
            XmlNode::Element {
                name: String::new(),
                attrs: StdHashMap::new(),
                children: vec![
                    XmlNode::Element {
                        name: "folder".to_string(),
                        attrs: StdHashMap::from([
                            ("id".to_string(), folder_id.to_string()),
                            ("name".to_string(), "Recipes".to_string()),
                        ]),
                        children: vec![],
                    },
                    XmlNode::Element {
                        name: "folder".to_string(),
                        attrs: StdHashMap::from([
                            ("id".to_string(), sub_folder_id.to_string()),
                            ("name".to_string(), "Desserts".to_string()),
                            ("parentId".to_string(), folder_id.to_string()),
                        ]),
                        children: vec![],
                    },
                ],
            },
        );

        let mut events = Vec::new();
        let emit = |e: &StoreEvent| events.push(format!("{e:?}"));
        run_discovery(&fs, &index, &crdt, sd_id, &sd_path, Some(&emit)).unwrap();

        assert_eq!(events.iter().filter(|e| e.contains("FolderUpdated")).count(), 1);
        let folders = index.list_folders_by_sd(sd_id).unwrap();
        assert_eq!(folders.len(), 2);
        let recipes = folders.iter().find(|f| f.id == folder_id).unwrap();
        assert_eq!(recipes.name, "Recipes");
        assert_eq!(recipes.parent_id, None);
        let desserts = folders.iter().find(|f| f.id == sub_folder_id).unwrap();
        assert_eq!(desserts.name, "Desserts");
        assert_eq!(desserts.parent_id, Some(folder_id));
    }
}
