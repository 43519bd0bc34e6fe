//! Production [`CrdtManager`], backed by `yrs` — the CRDT
//! dependency. `load_note` applies a note's snapshot then its ordered
//! update log the same way a `BodyDoc::load` applies stored
//! state then incremental updates (`Update::decode_v1` + `apply_update`
//! per update, in order).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use uuid::Uuid;
use yrs::{Doc, GetString, Map, MapRef, ReadTxn, Transact, Update, XmlFragment, XmlOut};

use super::{CrdtManager, NoteDocument, NoteMetadata, XmlNode};
use crate::error::{StoreError, StoreResult};
use crate::codec;
use crate::fs::FileSystem;

const CONTENT_FRAGMENT: &str = "content";
const METADATA_MAP: &str = "metadata";
const FOLDERS_FRAGMENT: &str = "folders";

struct YrsNoteDocument {
    doc: Doc,
}

fn any_to_string(value: &yrs::Any) -> Option<String> {
    match value {
        yrs::Any::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn any_to_i64(value: &yrs::Any) -> Option<i64> {
    match value {
        yrs::Any::BigInt(n) => Some(*n),
        yrs::Any::Number(n) => Some(*n as i64),
        _ => None,
    }
}

fn any_to_bool(value: &yrs::Any) -> Option<bool> {
    match value {
        yrs::Any::Bool(b) => Some(*b),
        _ => None,
    }
}

fn map_get_any(map: &MapRef, txn: &impl ReadTxn, key: &str) -> Option<yrs::Any> {
    match map.get(txn, key)? {
        yrs::Out::Any(any) => Some(any),
        _ => None,
    }
}

fn convert_xml(node: XmlOut, txn: &impl ReadTxn) -> XmlNode {
    match node {
        XmlOut::Text(text) => XmlNode::Text(text.get_string(txn)),
        XmlOut::Element(el) => {
            let name = el.tag().to_string();
            let mut attrs = HashMap::new();
            for (key, value) in el.attributes(txn) {
                attrs.insert(key.to_string(), value);
            }
            let children = el.iter(txn).map(|child| convert_xml(child, txn)).collect();
            XmlNode::Element {
                name,
                attrs,
                children,
            }
        }
        XmlOut::Fragment(fragment) => {
            let children = fragment
                .iter(txn)
                .map(|child| convert_xml(child, txn))
                .collect();
            XmlNode::Element {
                name: String::new(),
                attrs: HashMap::new(),
                children,
            }
        }
    }
}

impl NoteDocument for YrsNoteDocument {
    fn content_fragment(&self) -> XmlNode {
        let txn = self.doc.transact();
        let fragment = self.doc.get_or_insert_xml_fragment(CONTENT_FRAGMENT);
        let children = fragment.iter(&txn).map(|c| convert_xml(c, &txn)).collect();
        XmlNode::Element {
            name: String::new(),
            attrs: HashMap::new(),
            children,
        }
    }

    fn metadata(&self) -> NoteMetadata {
        let txn = self.doc.transact();
        let map = self.doc.get_or_insert_map(METADATA_MAP);
        let mut meta = NoteMetadata::default();
        if let Some(any) = map_get_any(&map, &txn, "folderId") {
            if let Some(s) = any_to_string(&any) {
                if let Ok(id) = Uuid::parse_str(&s) {
                    meta.folder_id = id;
                }
            }
        }
        if let Some(any) = map_get_any(&map, &txn, "created") {
            if let Some(v) = any_to_i64(&any) {
                meta.created = v;
            }
        }
        if let Some(any) = map_get_any(&map, &txn, "modified") {
            if let Some(v) = any_to_i64(&any) {
                meta.modified = v;
            }
        }
        if let Some(any) = map_get_any(&map, &txn, "deleted") {
            if let Some(v) = any_to_bool(&any) {
                meta.deleted = v;
            }
        }
        if let Some(any) = map_get_any(&map, &txn, "pinned") {
            if let Some(v) = any_to_bool(&any) {
                meta.pinned = v;
            }
        }
        meta
    }
}

/// `yrs`-backed [`CrdtManager`].
pub struct YrsCrdtManager<F> {
    fs: Arc<F>,
    sd_paths: Mutex<HashMap<Uuid, PathBuf>>,
    loaded: Mutex<HashMap<Uuid, Arc<YrsNoteDocument>>>,
}

impl<F: FileSystem> YrsCrdtManager<F> {
    pub fn new(fs: Arc<F>) -> Self {
        YrsCrdtManager {
            fs,
            sd_paths: Mutex::new(HashMap::new()),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Tell the manager where an SD's root lives, so `load_note` can find
    /// `<sd>/notes/<noteId>/`. Called by whichever component (discovery,
    /// move engine, GC) already knows the SD's current path from the
    /// catalog.
    pub fn register_sd(&self, sd_id: Uuid, path: PathBuf) {
        self.sd_paths.lock().unwrap().insert(sd_id, path);
    }

    fn sd_path(&self, sd_id: Uuid) -> StoreResult<PathBuf> {
        self.sd_paths
            .lock()
            .unwrap()
            .get(&sd_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "storage_dir",
                id: sd_id.to_string(),
            })
    }

    fn note_dir(&self, note_id: Uuid, sd_id: Uuid) -> StoreResult<PathBuf> {
        Ok(self.sd_path(sd_id)?.join("notes").join(note_id.to_string()))
    }

    fn apply_update_bytes(doc: &Doc, bytes: &[u8]) -> StoreResult<()> {
        let update = Update::decode_v1(bytes)
            .map_err(|e| StoreError::Format {
                offset: 0,
                reason: format!("invalid CRDT update: {e}"),
            })?;
        let mut txn = doc.transact_mut();
        txn.apply_update(update).map_err(|e| StoreError::Format {
            offset: 0,
            reason: format!("failed to apply CRDT update: {e}"),
        })?;
        Ok(())
    }

    fn sorted_entries(&self, dir: &Path) -> StoreResult<Vec<PathBuf>> {
        let mut entries = self.fs.list_dir(dir)?;
        entries.sort();
        Ok(entries)
    }
}

impl<F: FileSystem + 'static> CrdtManager for YrsCrdtManager<F> {
    fn load_note(&self, note_id: Uuid, sd_id: Uuid) -> StoreResult<()> {
        let note_dir = self.note_dir(note_id, sd_id)?;
        let doc = Doc::new();

        let snapshot_path = note_dir.join("snapshot.yjs");
        if self.fs.exists(&snapshot_path) {
            let bytes = self.fs.read(&snapshot_path)?;
            let parsed = codec::parse_snapshot_fields(&bytes);
            match parsed.error {
                None => Self::apply_update_bytes(&doc, &parsed.document_state)?,
                Some(reason) => {
                    log::warn!("skipping malformed snapshot for note {note_id}: {reason}");
                }
            }
        }

        let updates_dir = note_dir.join("updates");
        for path in self.sorted_entries(&updates_dir)? {
            if self.fs.is_dir(&path) {
                continue;
            }
            let bytes = self.fs.read(&path)?;
            Self::apply_update_bytes(&doc, &bytes)?;
        }

        let logs_dir = note_dir.join("logs");
        for path in self.sorted_entries(&logs_dir)? {
            if self.fs.is_dir(&path) {
                continue;
            }
            let bytes = self.fs.read(&path)?;
            let parsed = codec::parse_log_fields(&bytes);
            if let Some(reason) = &parsed.error {
                log::warn!("log {path:?} for note {note_id} truncated: {reason}");
            }
            for record in &parsed.records {
                Self::apply_update_bytes(&doc, &record.data)?;
            }
        }

        self.loaded
            .lock()
            .unwrap()
            .insert(note_id, Arc::new(YrsNoteDocument { doc }));
        Ok(())
    }

    fn get_document(&self, note_id: Uuid) -> Option<Arc<dyn NoteDocument>> {
        self.loaded
            .lock()
            .unwrap()
            .get(&note_id)
            .cloned()
            .map(|d| d as Arc<dyn NoteDocument>)
    }

    fn unload_note(&self, note_id: Uuid) {
        self.loaded.lock().unwrap().remove(&note_id);
    }

    fn load_folder_tree(&self, sd_id: Uuid) -> StoreResult<XmlNode> {
        let logs_dir = self.sd_path(sd_id)?.join("folders").join("logs");
        let doc = Doc::new();

        for path in self.sorted_entries(&logs_dir)? {
            if self.fs.is_dir(&path) {
                continue;
            }
            let bytes = self.fs.read(&path)?;
            let parsed = codec::parse_log_fields(&bytes);
            if let Some(reason) = &parsed.error {
                log::warn!("folder log {path:?} for sd {sd_id} truncated: {reason}");
            }
            for record in &parsed.records {
                Self::apply_update_bytes(&doc, &record.data)?;
            }
        }

        let txn = doc.transact();
        let fragment = doc.get_or_insert_xml_fragment(FOLDERS_FRAGMENT);
        let children = fragment.iter(&txn).map(|c| convert_xml(c, &txn)).collect();
        Ok(XmlNode::Element {
            name: String::new(),
            attrs: HashMap::new(),
            children,
        })
    }
}

/// Every distinct `imageId` a note's content fragment references.
/// GC's mark-phase helper: called once per note, unioned across an SD.
pub fn referenced_image_ids(content: &XmlNode) -> HashSet<Uuid> {
    let mut ids = Vec::new();
    content.collect_image_ids(&mut ids);
    ids.into_iter().collect()
}
