//! `notecove-inspect`: a thin CLI over the storage core's offset-tracking
//! codec parsers and catalog, for debugging Sync Directories by hand.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use notecove_store::codec::{self, Field, FieldValue};
use notecove_store::index::{FolderRow, ImageRow, MoveRow, NoteRow, SqliteIndex, StorageDirRow};

#[derive(Parser)]
#[command(name = "notecove-inspect")]
#[command(version)]
#[command(about = "Inspect NoteCove Sync Directory logs, snapshots, and catalogs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump every field of a `.crdtlog` file, with byte offsets
    InspectLog {
        /// Path to the log file
        path: PathBuf,
    },

    /// Dump every field of a `.crdtsnap` file, with byte offsets
    InspectSnapshot {
        /// Path to the snapshot file
        path: PathBuf,
    },

    /// Query a catalog database (store.sqlite) directly
    Catalog {
        /// Path to the catalog's SQLite file
        db_path: PathBuf,

        #[command(subcommand)]
        what: CatalogTarget,
    },
}

#[derive(Subcommand)]
enum CatalogTarget {
    /// List notes, optionally restricted to one Storage Directory
    Notes {
        #[arg(long)]
        sd: Option<Uuid>,
    },
    /// List registered Storage Directories
    StorageDirs,
    /// List folders, optionally restricted to one Storage Directory
    Folders {
        #[arg(long)]
        sd: Option<Uuid>,
    },
    /// List catalog image rows, optionally restricted to one Storage Directory
    Images {
        #[arg(long)]
        sd: Option<Uuid>,
    },
    /// List move records, in any state
    Moves,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::InspectLog { path } => inspect_log(&path),
        Commands::InspectSnapshot { path } => inspect_snapshot(&path),
        Commands::Catalog { db_path, what } => inspect_catalog(&db_path, what),
    }
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("reading {}: {e}", path.display()))
}

fn inspect_log(path: &PathBuf) -> Result<(), String> {
    let buf = read_file(path)?;
    let result = codec::parse_log_fields(&buf);

    println!("{} ({} bytes)", path.display(), buf.len());
    for field in &result.fields {
        print_field(field);
    }
    println!();
    println!("{} record(s) parsed", result.records.len());
    for (i, record) in result.records.iter().enumerate() {
        println!(
            "  [{i}] seq={} ts={} data_len={} bytes=[{}..{})",
            record.sequence,
            record.timestamp,
            record.data.len(),
            record.start_offset,
            record.end_offset
        );
    }
    if let Some(error) = &result.error {
        println!();
        println!("parse stopped: {error}");
    }
    Ok(())
}

fn inspect_snapshot(path: &PathBuf) -> Result<(), String> {
    let buf = read_file(path)?;
    let result = codec::parse_snapshot_fields(&buf);

    println!("{} ({} bytes)", path.display(), buf.len());
    for field in &result.fields {
        print_field(field);
    }
    println!();
    println!("complete: {}", result.complete);
    println!("vector clock ({} entries):", result.vector_clock.len());
    for entry in &result.vector_clock {
        println!(
            "  {} seq={} offset={} file={}",
            entry.instance_id, entry.sequence, entry.offset, entry.filename
        );
    }
    println!("document state: {} byte(s)", result.document_state.len());
    if let Some(error) = &result.error {
        println!();
        println!("parse stopped: {error}");
    }
    Ok(())
}

fn print_field(field: &Field) {
    let value = match &field.value {
        FieldValue::UInt(v) => v.to_string(),
        FieldValue::Bytes(b) => hex(b),
        FieldValue::Text(t) => t.clone(),
        FieldValue::None => "-".to_string(),
    };
    println!(
        "  [{:>6}..{:<6}) {:<12} {}",
        field.start_offset, field.end_offset, field.name, value
    );
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn inspect_catalog(db_path: &PathBuf, what: CatalogTarget) -> Result<(), String> {
    let index = SqliteIndex::open(db_path).map_err(|e| format!("opening catalog: {e}"))?;
    match what {
        CatalogTarget::Notes { sd } => print_notes(&index, sd),
        CatalogTarget::StorageDirs => print_storage_dirs(&index),
        CatalogTarget::Folders { sd } => print_folders(&index, sd),
        CatalogTarget::Images { sd } => print_images(&index, sd),
        CatalogTarget::Moves => print_moves(&index),
    }
}

fn sds_to_scan(index: &SqliteIndex, sd: Option<Uuid>) -> Result<Vec<Uuid>, String> {
    match sd {
        Some(id) => Ok(vec![id]),
        None => {
            let dirs = index
                .list_storage_dirs()
                .map_err(|e| format!("listing storage dirs: {e}"))?;
            Ok(dirs.into_iter().map(|d| d.id).collect())
        }
    }
}

fn print_notes(index: &SqliteIndex, sd: Option<Uuid>) -> Result<(), String> {
    for sd_id in sds_to_scan(index, sd)? {
        let notes = index
            .list_notes_by_sd(sd_id)
            .map_err(|e| format!("listing notes for {sd_id}: {e}"))?;
        for note in notes {
            print_note(&note);
        }
    }
    Ok(())
}

fn print_note(note: &NoteRow) {
    println!(
        "{}  sd={}  folder={}  {}{}  \"{}\"",
        note.id,
        note.sd_id,
        note.folder_id,
        if note.deleted { "deleted " } else { "" },
        if note.pinned { "pinned " } else { "" },
        note.title
    );
}

fn print_storage_dirs(index: &SqliteIndex) -> Result<(), String> {
    let dirs = index
        .list_storage_dirs()
        .map_err(|e| format!("listing storage dirs: {e}"))?;
    for sd in dirs {
        print_storage_dir(&sd);
    }
    Ok(())
}

fn print_storage_dir(sd: &StorageDirRow) {
    println!(
        "{}  {}  {}  active={}",
        sd.id,
        sd.name,
        sd.path.display(),
        sd.is_active
    );
}

fn print_folders(index: &SqliteIndex, sd: Option<Uuid>) -> Result<(), String> {
    for sd_id in sds_to_scan(index, sd)? {
        let folders = index
            .list_folders_by_sd(sd_id)
            .map_err(|e| format!("listing folders for {sd_id}: {e}"))?;
        for folder in folders {
            print_folder(&folder);
        }
    }
    Ok(())
}

fn print_folder(folder: &FolderRow) {
    println!(
        "{}  sd={}  parent={}  \"{}\"",
        folder.id,
        folder.sd_id,
        folder
            .parent_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        folder.name
    );
}

fn print_images(index: &SqliteIndex, sd: Option<Uuid>) -> Result<(), String> {
    if !index
        .has_images_table()
        .map_err(|e| format!("checking images table: {e}"))?
    {
        println!("no images table in this catalog");
        return Ok(());
    }
    for sd_id in sds_to_scan(index, sd)? {
        let images = index
            .list_images_by_sd(sd_id)
            .map_err(|e| format!("listing images for {sd_id}: {e}"))?;
        for image in images {
            print_image(&image);
        }
    }
    Ok(())
}

fn print_image(image: &ImageRow) {
    println!(
        "{}  sd={}  {}  {} byte(s)  created={}",
        image.image_id, image.sd_id, image.filename, image.size_bytes, image.created_at
    );
}

fn print_moves(index: &SqliteIndex) -> Result<(), String> {
    let moves = index.list_all_moves().map_err(|e| format!("listing moves: {e}"))?;
    for mv in moves {
        print_move(&mv);
    }
    Ok(())
}

fn print_move(mv: &MoveRow) {
    println!(
        "{}  note={}  {} -> {}  state={}  by={}{}",
        mv.id,
        mv.note_id,
        mv.source_sd_uuid,
        mv.target_sd_uuid,
        mv.state,
        mv.initiated_by,
        mv.error
            .as_ref()
            .map(|e| format!("  error={e}"))
            .unwrap_or_default()
    );
}
