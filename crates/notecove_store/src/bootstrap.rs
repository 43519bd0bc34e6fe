//! Default-Note Bootstrap: decide whether a fresh SD should be seeded
//! with welcome content, or should instead wait for content arriving from
//! another instance that's already syncing into it.

use std::path::Path;
use std::time::Duration;

use uuid::Uuid;

use crate::crdt::{CrdtManager, XmlNode};
use crate::error::StoreResult;
use crate::fs::FileSystem;
use crate::index::SqliteIndex;

const DEFAULT_NOTE_ID: &str = "default-note";
const DEFAULT_NOTE_DELETED_KEY: &str = "defaultNoteDeleted";
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const POLL_TIMEOUT: Duration = Duration::from_secs(2);

const WELCOME_HEADING: &str = "Welcome to NoteCove";
const WELCOME_BODY: &str = "Your notes, beautifully organized and always in sync.";

/// What bootstrap decided to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The user previously deleted the default note; never recreated.
    Suppressed,
    /// A note already existed; nothing written.
    AlreadyPresent,
    /// Foreign-instance content arrived before the timeout.
    AdoptedForeignContent,
    /// No foreign evidence (or the wait timed out); this is the content
    /// the caller should install as the default note.
    WroteWelcomeContent(XmlNode),
}

fn other_activity_files_exist<F: FileSystem>(fs: &F, sd_path: &Path, instance_id: &str) -> bool {
    let activity_dir = sd_path.join("activity");
    fs.list_dir(&activity_dir)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(|s| s.to_string()))
        .any(|name| {
            name.strip_suffix(".log")
                .map(|id| id != instance_id)
                .unwrap_or(false)
        })
}

fn other_crdt_logs_exist<F: FileSystem>(fs: &F, sd_path: &Path, instance_id: &str) -> bool {
    let logs_dir = sd_path.join("notes").join(DEFAULT_NOTE_ID).join("logs");
    fs.list_dir(&logs_dir)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(|s| s.to_string()))
        .any(|name| {
            name.strip_suffix(".crdtlog")
                .and_then(|stem| stem.split('_').next())
                .map(|id| id != instance_id)
                .unwrap_or(false)
        })
}

fn has_foreign_evidence<F: FileSystem>(fs: &F, sd_path: &Path, instance_id: &str) -> bool {
    other_activity_files_exist(fs, sd_path, instance_id) || other_crdt_logs_exist(fs, sd_path, instance_id)
}

/// Parse `welcome.md` via the caller-supplied transform, falling back to
/// the fixed document if it's missing or unreadable. Kept generic over the
/// transform so the storage core doesn't depend on a markdown parser
/// directly (§6: "Markdown -> document transform" is an external
/// collaborator).
fn welcome_content<F: FileSystem>(
    fs: &F,
    welcome_md_path: Option<&Path>,
    parse_markdown: impl Fn(&str) -> XmlNode,
) -> XmlNode {
    if let Some(path) = welcome_md_path {
        if let Ok(text) = fs.read_to_string(path) {
            return parse_markdown(&text);
        }
    }
    XmlNode::Element {
        name: String::new(),
        attrs: Default::default(),
        children: vec![
            XmlNode::Text(WELCOME_HEADING.to_string()),
            XmlNode::Text(WELCOME_BODY.to_string()),
        ],
    }
}

/// Run bootstrap for `sd_id`/`sd_path`. `poll_content` is called on the
/// interval described in §4.9 to observe the default note's CRDT content
/// fragment as it (possibly) arrives from another instance; it's a
/// closure rather than a direct CRDT call so tests can simulate content
/// appearing mid-wait without a real clock.
pub fn run_bootstrap<F: FileSystem>(
    fs: &F,
    index: &SqliteIndex,
    sd_id: Uuid,
    sd_path: &Path,
    instance_id: &str,
    welcome_md_path: Option<&Path>,
    parse_markdown: impl Fn(&str) -> XmlNode,
    mut poll_content: impl FnMut() -> StoreResult<XmlNode>,
    mut sleep: impl FnMut(Duration),
) -> StoreResult<BootstrapOutcome> {
    let _ = sd_id;

    if index.get_state(DEFAULT_NOTE_DELETED_KEY)?.as_deref() == Some("true") {
        return Ok(BootstrapOutcome::Suppressed);
    }

    let current = poll_content()?;
    if !current.is_empty() {
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    if has_foreign_evidence(fs, sd_path, instance_id) {
        let mut waited = Duration::ZERO;
        while waited < POLL_TIMEOUT {
            sleep(POLL_INTERVAL);
            waited += POLL_INTERVAL;
            let observed = poll_content()?;
            if !observed.is_empty() {
                return Ok(BootstrapOutcome::AdoptedForeignContent);
            }
        }
    }

    let content = welcome_content(fs, welcome_md_path, parse_markdown);
    Ok(BootstrapOutcome::WroteWelcomeContent(content))
}

/// Record that the user deleted the default note, so it's never
/// recreated on a future launch.
pub fn mark_default_note_deleted(index: &SqliteIndex) -> StoreResult<()> {
    index.set_state(DEFAULT_NOTE_DELETED_KEY, "true")
}

/// Use the CRDT manager directly to materialize current content — the
/// production `poll_content` closure passed to `run_bootstrap`.
pub fn crdt_poll<C: CrdtManager>(crdt: &C, note_id: Uuid, sd_id: Uuid) -> StoreResult<XmlNode> {
    crdt.load_note(note_id, sd_id)?;
    let content = crdt
        .get_document(note_id)
        .map(|doc| doc.content_fragment())
        .unwrap_or(XmlNode::Text(String::new()));
    crdt.unload_note(note_id);
    Ok(content)
}
