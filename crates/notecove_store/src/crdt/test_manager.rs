//! In-memory [`CrdtManager`] for fixtures. Used by the discovery
//! reconciler, move engine, and image GC unit tests so they can drive
//! scenarios without a real `yrs::Doc` per test.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::{CrdtManager, NoteDocument, NoteMetadata, XmlNode};
use crate::error::StoreResult;

struct FixtureDocument {
    content: XmlNode,
    metadata: NoteMetadata,
}

impl NoteDocument for FixtureDocument {
    fn content_fragment(&self) -> XmlNode {
        self.content.clone()
    }

    fn metadata(&self) -> NoteMetadata {
        self.metadata.clone()
    }
}

/// Pre-seeded, in-memory stand-in for [`YrsCrdtManager`](super::YrsCrdtManager).
#[derive(Default)]
pub struct TestCrdtManager {
    fixtures: Mutex<HashMap<Uuid, FixtureDocument>>,
    loaded: Mutex<HashMap<Uuid, Arc<dyn NoteDocument>>>,
    folder_trees: Mutex<HashMap<Uuid, XmlNode>>,
}

impl TestCrdtManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a note's content and metadata ahead of a test exercising
    /// discovery, the move engine, or GC against it.
    pub fn seed(&self, note_id: Uuid, content: XmlNode, metadata: NoteMetadata) {
        self.fixtures.lock().unwrap().insert(
            note_id,
            FixtureDocument {
                content,
                metadata,
            },
        );
    }

    /// Mutate a previously seeded fixture's content in place — used to
    /// simulate content arriving mid-test (e.g. the bootstrap foreign-sync
    /// scenario).
    pub fn update_content(&self, note_id: Uuid, content: XmlNode) {
        if let Some(doc) = self.fixtures.lock().unwrap().get_mut(&note_id) {
            doc.content = content;
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().unwrap().len()
    }

    /// Register an SD's folder tree ahead of a test exercising discovery's
    /// folder reload. Unseeded SDs read back as an empty tree.
    pub fn seed_folder_tree(&self, sd_id: Uuid, tree: XmlNode) {
        self.folder_trees.lock().unwrap().insert(sd_id, tree);
    }
}

impl CrdtManager for TestCrdtManager {
    fn load_note(&self, note_id: Uuid, _sd_id: Uuid) -> StoreResult<()> {
        let fixtures = self.fixtures.lock().unwrap();
        let doc = match fixtures.get(&note_id) {
            Some(d) => d,
            None => return Ok(()),
        };
        let snapshot: Arc<dyn NoteDocument> = Arc::new(FixtureDocument {
            content: doc.content.clone(),
            metadata: doc.metadata.clone(),
        });
        self.loaded.lock().unwrap().insert(note_id, snapshot);
        Ok(())
    }

    fn get_document(&self, note_id: Uuid) -> Option<Arc<dyn NoteDocument>> {
        self.loaded.lock().unwrap().get(&note_id).cloned()
    }

    fn unload_note(&self, note_id: Uuid) {
        self.loaded.lock().unwrap().remove(&note_id);
    }

    fn load_folder_tree(&self, sd_id: Uuid) -> StoreResult<XmlNode> {
        Ok(self
            .folder_trees
            .lock()
            .unwrap()
            .get(&sd_id)
            .cloned()
            .unwrap_or_else(|| XmlNode::Element {
                name: String::new(),
                attrs: HashMap::new(),
                children: Vec::new(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reflects_current_fixture_state() {
        let manager = TestCrdtManager::new();
        let note_id = Uuid::new_v4();
        manager.seed(note_id, XmlNode::Text(String::new()), NoteMetadata::default());

        manager.load_note(note_id, Uuid::new_v4()).unwrap();
        let doc = manager.get_document(note_id).unwrap();
        assert!(doc.content_fragment().is_empty());

        manager.update_content(note_id, XmlNode::Text("hello".to_string()));
        manager.load_note(note_id, Uuid::new_v4()).unwrap();
        let doc = manager.get_document(note_id).unwrap();
        assert_eq!(doc.content_fragment().to_text(), "hello");
    }

    #[test]
    fn unload_releases_the_document() {
        let manager = TestCrdtManager::new();
        let note_id = Uuid::new_v4();
        manager.seed(note_id, XmlNode::Text("x".to_string()), NoteMetadata::default());
        manager.load_note(note_id, Uuid::new_v4()).unwrap();
        assert_eq!(manager.loaded_count(), 1);
        manager.unload_note(note_id);
        assert_eq!(manager.loaded_count(), 0);
        assert!(manager.get_document(note_id).is_none());
    }
}
