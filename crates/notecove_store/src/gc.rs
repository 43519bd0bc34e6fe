//! Image GC: mark-and-sweep over every note's CRDT content and the
//! `images` catalog, reclaiming blobs no note references once a grace
//! period has passed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::crdt::{referenced_image_ids, CrdtManager};
use crate::error::StoreResult;
use crate::fs::FileSystem;
use crate::index::{ImageRow, SqliteIndex};

/// Tuning knobs recognized by the core (§6).
#[derive(Debug, Clone, Copy)]
pub struct GcOptions {
    pub grace_period_days: u32,
    pub dry_run: bool,
}

impl Default for GcOptions {
    fn default() -> Self {
        GcOptions {
            grace_period_days: 14,
            dry_run: false,
        }
    }
}

/// Per-SD outcome of one GC pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub total: usize,
    pub referenced: usize,
    pub orphaned: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub thumbnails_deleted: usize,
    pub bytes_reclaimed: u64,
    /// Only populated under `dry_run`: filenames that would have been
    /// deleted.
    pub would_delete: Vec<String>,
}

fn media_path(sd_path: &Path, filename: &str) -> PathBuf {
    sd_path.join("media").join(filename)
}

fn thumbnail_path(thumbnail_root: &Path, sd_id: Uuid, image_id: Uuid) -> PathBuf {
    thumbnail_root.join(sd_id.to_string()).join(format!("{image_id}.jpg"))
}

/// Walk every note in `sd_id` via `crdt`, returning the union of every
/// `imageId` its content fragment references.
fn mark_referenced<C: CrdtManager>(
    index: &SqliteIndex,
    crdt: &C,
    sd_id: Uuid,
) -> StoreResult<HashSet<Uuid>> {
    let mut referenced = HashSet::new();
    for note in index.list_notes_by_sd(sd_id)? {
        crdt.load_note(note.id, sd_id)?;
        let ids = crdt
            .get_document(note.id)
            .map(|doc| referenced_image_ids(&doc.content_fragment()))
            .unwrap_or_default();
        crdt.unload_note(note.id);
        referenced.extend(ids);
    }
    Ok(referenced)
}

/// Run one GC pass over `sd_id`. `now_millis` and `thumbnail_root` are
/// supplied by the caller so grace-period math and thumbnail paths stay
/// independent of the host clock/layout.
pub fn run_gc<F: FileSystem, C: CrdtManager>(
    fs: &F,
    index: &SqliteIndex,
    crdt: &C,
    sd_id: Uuid,
    sd_path: &Path,
    thumbnail_root: &Path,
    now_millis: i64,
    options: GcOptions,
) -> StoreResult<CleanupStats> {
    if !index.has_images_table()? {
        return Ok(CleanupStats::default());
    }

    let referenced = mark_referenced(index, crdt, sd_id)?;
    let images = index.list_images_by_sd(sd_id)?;
    let mut stats = CleanupStats {
        total: images.len(),
        referenced: 0,
        ..Default::default()
    };

    let grace_period_millis = i64::from(options.grace_period_days) * 24 * 60 * 60 * 1000;

    for image in images {
        if referenced.contains(&image.image_id) {
            stats.referenced += 1;
            continue;
        }
        stats.orphaned += 1;

        let age_millis = now_millis - image.created_at;
        if age_millis <= grace_period_millis {
            stats.skipped += 1;
            continue;
        }

        if options.dry_run {
            stats.would_delete.push(image.filename.clone());
            continue;
        }

        delete_one_image(fs, index, sd_path, thumbnail_root, &image, &mut stats)?;
    }

    Ok(stats)
}

fn delete_one_image<F: FileSystem>(
    fs: &F,
    index: &SqliteIndex,
    sd_path: &Path,
    thumbnail_root: &Path,
    image: &ImageRow,
    stats: &mut CleanupStats,
) -> StoreResult<()> {
    let media = media_path(sd_path, &image.filename);
    if fs.exists(&media) {
        if let Ok(meta) = fs.stat(&media) {
            stats.bytes_reclaimed += meta.size;
        }
        fs.remove_file(&media)?;
    }

    let thumbnail = thumbnail_path(thumbnail_root, image.sd_id, image.image_id);
    if fs.exists(&thumbnail) {
        fs.remove_file(&thumbnail)?;
        stats.thumbnails_deleted += 1;
    }

    index.delete_image(image.image_id)?;
    stats.deleted += 1;
    Ok(())
}
