//! CRDT Manager facade.
//!
//! Contract only — merge semantics live in the CRDT library (`yrs`); this
//! module's job is loading/unloading documents and exposing the two views
//! the rest of the storage core needs: the `content` XML fragment (for
//! discovery's text extraction and image GC's reference scan) and the
//! note's metadata map.

mod test_manager;
mod yrs_manager;

pub use test_manager::TestCrdtManager;
pub use yrs_manager::{referenced_image_ids, YrsCrdtManager};

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::StoreResult;

/// Per-note metadata view (§4.5). Defensive defaults throughout: a
/// document missing a field never causes a panic or an error, it just
/// reads as the default for that field, so a partially-synced document
/// is never a reason to throw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteMetadata {
    pub folder_id: Uuid,
    pub created: i64,
    pub modified: i64,
    pub deleted: bool,
    pub pinned: bool,
}

impl Default for NoteMetadata {
    fn default() -> Self {
        NoteMetadata {
            folder_id: Uuid::nil(),
            created: 0,
            modified: 0,
            deleted: false,
            pinned: false,
        }
    }
}

/// A polymorphic CRDT XML node (§9 "dynamic traversal over CRDT nodes").
/// Image extraction and discovery's text walk both fold over
/// this rather than matching on a CRDT-library-specific type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Text(String),
    Element {
        name: String,
        attrs: HashMap<String, String>,
        children: Vec<XmlNode>,
    },
}

impl XmlNode {
    /// Depth-first text walk: `XmlText` leaves as-is, recurse into
    /// elements, siblings joined by newline (§4.6 step c).
    pub fn to_text(&self) -> String {
        match self {
            XmlNode::Text(s) => s.clone(),
            XmlNode::Element { children, .. } => children
                .iter()
                .map(|c| c.to_text())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether this node carries no content at all — used by discovery to
    /// decide a note hasn't finished syncing yet.
    pub fn is_empty(&self) -> bool {
        match self {
            XmlNode::Text(s) => s.is_empty(),
            XmlNode::Element { children, .. } => children.is_empty(),
        }
    }

    /// Fold over every `notecoveImage` element's `imageId` attribute,
    /// depth-first (GC's mark phase).
    pub fn collect_image_ids(&self, out: &mut Vec<Uuid>) {
        if let XmlNode::Element {
            name,
            attrs,
            children,
        } = self
        {
            if name == "notecoveImage" {
                if let Some(id) = attrs.get("imageId").and_then(|s| Uuid::parse_str(s).ok()) {
                    out.push(id);
                }
            }
            for child in children {
                child.collect_image_ids(out);
            }
        }
    }

    /// Fold over every `folder` element, collecting `(id, name, parentId)`.
    /// The tree shape is carried by each element's `parentId` attribute
    /// rather than by XML nesting, mirroring the catalog's own flat
    /// `parent_id` column — a folder element with no `parentId` attribute
    /// is a root folder.
    pub fn collect_folder_entries(&self, out: &mut Vec<(Uuid, String, Option<Uuid>)>) {
        if let XmlNode::Element {
            name,
            attrs,
            children,
        } = self
        {
            if name == "folder" {
                if let Some(id) = attrs.get("id").and_then(|s| Uuid::parse_str(s).ok()) {
                    let name = attrs.get("name").cloned().unwrap_or_default();
                    let parent_id = attrs.get("parentId").and_then(|s| Uuid::parse_str(s).ok());
                    out.push((id, name, parent_id));
                }
            }
            for child in children {
                child.collect_folder_entries(out);
            }
        }
    }
}

/// A loaded note document: the two views the storage core needs.
pub trait NoteDocument: Send + Sync {
    /// The `content` XML fragment (§4.5: `doc.getXmlFragment("content")`).
    fn content_fragment(&self) -> XmlNode;

    /// The note's metadata view.
    fn metadata(&self) -> NoteMetadata;
}

/// Loads/unloads note CRDT documents. Implementations: [`YrsCrdtManager`]
/// for production, [`TestCrdtManager`] for fixture-backed unit tests that
/// don't need a real `yrs::Doc`.
pub trait CrdtManager: Send + Sync {
    /// Materialize a note's document: applies its snapshot (if present)
    /// then its ordered update log.
    fn load_note(&self, note_id: Uuid, sd_id: Uuid) -> StoreResult<()>;

    /// The currently loaded document for `note_id`, if `load_note`
    /// succeeded and it hasn't been unloaded since.
    fn get_document(&self, note_id: Uuid) -> Option<Arc<dyn NoteDocument>>;

    /// Release resources associated with a loaded note.
    fn unload_note(&self, note_id: Uuid);

    /// Materialize the SD-wide folder tree: a single document per SD (not
    /// per-note), applied the same way as a note's log — ordered updates,
    /// no snapshot. Returns the document's root fragment as an [`XmlNode`]
    /// for [`XmlNode::collect_folder_entries`] to fold over.
    fn load_folder_tree(&self, sd_id: Uuid) -> StoreResult<XmlNode>;

    /// Load, call `f`, and unload — even if `f` returns `Err` or `load_note`
    /// leaves nothing to read. This is the scoped-acquisition pattern §5
    /// requires of every CRDT load ("must be paired with an unload,
    /// including on the error path").
    fn with_note<F, T>(&self, note_id: Uuid, sd_id: Uuid, f: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn NoteDocument) -> StoreResult<T>,
        Self: Sized,
    {
        let result = self.load_note(note_id, sd_id).and_then(|()| {
            let doc = self.get_document(note_id).ok_or_else(|| {
                crate::error::StoreError::NotFound {
                    entity: "note document",
                    id: note_id.to_string(),
                }
            })?;
            f(doc.as_ref())
        });
        self.unload_note(note_id);
        result
    }
}
