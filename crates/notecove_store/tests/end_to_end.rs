//! Exercises discovery, the move engine, and image GC together against a
//! real temp-directory filesystem, rather than each component's own
//! `InMemoryFileSystem` unit tests in isolation.

use std::collections::HashMap;
use std::sync::Arc;

use notecove_store::crdt::{NoteMetadata, TestCrdtManager, XmlNode};
use notecove_store::discovery::run_discovery;
use notecove_store::fs::{FileSystem, RealFileSystem};
use notecove_store::gc::{run_gc, GcOptions};
use notecove_store::index::{ImageRow, SqliteIndex, StorageDirRow};
use notecove_store::moves::MoveEngine;
use uuid::Uuid;

fn note_text_with_image(heading: &str, image_id: Uuid) -> XmlNode {
    XmlNode::Element {
        name: "content".to_string(),
        attrs: HashMap::new(),
        children: vec![
            XmlNode::Text(heading.to_string()),
            XmlNode::Element {
                name: "notecoveImage".to_string(),
                attrs: HashMap::from([("imageId".to_string(), image_id.to_string())]),
                children: vec![],
            },
        ],
    }
}

#[test]
fn note_discovered_then_moved_then_orphan_image_collected() {
    let fs = RealFileSystem;
    let tmp = tempfile::tempdir().unwrap();
    let index = Arc::new(SqliteIndex::in_memory().unwrap());

    let sd1 = Uuid::new_v4();
    let sd2 = Uuid::new_v4();
    let sd1_path = tmp.path().join("sd1");
    let sd2_path = tmp.path().join("sd2");
    fs.create_dir_all(&sd1_path).unwrap();
    fs.create_dir_all(&sd2_path).unwrap();

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
            path: sd2_path.clone(),
            is_active: true,
        })
        .unwrap();

    // Seed a note's on-disk footprint and CRDT fixture content, referencing
    // one image.
    let note_id = Uuid::new_v4();
    let image_id = Uuid::new_v4();
    fs.write(
        &sd1_path
            .join("notes")
            .join(note_id.to_string())
            .join("snapshot.crdtsnap"),
        b"placeholder",
    )
    .unwrap();

    let crdt = TestCrdtManager::new();
    let folder_id = Uuid::new_v4();
    crdt.seed(
        note_id,
        note_text_with_image("Grocery list", image_id),
        NoteMetadata {
            folder_id,
            created: 1_000,
            modified: 1_000,
            deleted: false,
            pinned: false,
        },
    );

    // Discovery should pick the note up and catalog it under sd1.
    let imported = run_discovery(&fs, &index, &crdt, sd1, &sd1_path, None).unwrap();
    assert_eq!(imported, [note_id].into_iter().collect());
    let cataloged = index.get_note(note_id).unwrap().expect("note cataloged");
    assert_eq!(cataloged.sd_id, sd1);
    assert_eq!(cataloged.title, "Grocery list");

    // Register the image in the catalog as if it had synced down alongside
    // the note, aged well past the default grace period.
    let thumbnail_root = tmp.path().join("thumbnails");
    index
        .upsert_image(&ImageRow {
            image_id,
            sd_id: sd1,
            filename: format!("{image_id}.jpg"),
            created_at: 0,
            size_bytes: 16,
        })
        .unwrap();
    fs.write(&sd1_path.join("media").join(format!("{image_id}.jpg")), b"fake-jpeg-bytes")
        .unwrap();

    let thirty_days_millis = 30 * 24 * 60 * 60 * 1000;

    // GC must not touch it yet: the note still references it.
    let stats = run_gc(
        &fs,
        &index,
        &crdt,
        sd1,
        &sd1_path,
        &thumbnail_root,
        thirty_days_millis,
        GcOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.referenced, 1);

    // Move the note from sd1 to sd2.
    let engine = MoveEngine::new(Arc::new(fs), Arc::clone(&index), "instance-a");
    let move_id = engine.initiate_move(note_id, sd1, sd2, folder_id, 0).unwrap();
    engine.execute_move(move_id, 1_000).unwrap();

    let moved = index.get_note(note_id).unwrap().expect("note still cataloged");
    assert_eq!(moved.sd_id, sd2);
    assert!(!RealFileSystem.exists(&sd1_path.join("notes").join(note_id.to_string())));
    assert!(RealFileSystem.exists(&sd2_path.join("notes").join(note_id.to_string())));

    // Now that the note lives in sd2, the image it references is orphaned
    // in sd1 and past the grace period, so a GC pass over sd1 reclaims it.
    let stats = run_gc(
        &RealFileSystem,
        &index,
        &crdt,
        sd1,
        &sd1_path,
        &thumbnail_root,
        thirty_days_millis,
        GcOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.bytes_reclaimed, 16);
    assert!(index.list_images_by_sd(sd1).unwrap().is_empty());
}
