use walkdir::{WalkDir, DirEntry};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use crossbeam::channel::Sender;
use anyhow::Result;
use tracing::debug;

use crate::ingest::mimetype::is_cover_candidate;

/// A folder that holds at least one image and is not cataloged yet.
#[derive(Debug, Clone)]
pub struct FolderJob {
    pub folder: PathBuf,
    pub title: String,
    pub cover_path: PathBuf,
    pub record_time: i64,
}

impl FolderJob {
    pub fn cover_fname(&self) -> String {
        self.cover_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Walks `root` and sends every image folder not already in `known`.
///
/// Folders are visited in file-name order, so repeated imports of the same
/// tree assign ids in the same order.
pub fn scan_directory(root: &Path, known: &HashSet<String>, tx: Sender<FolderJob>) -> Result<()> {
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();

    for entry in walker.filter_entry(|e| !is_hidden(e)) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let folder = entry.path();
        let folder_path = folder.to_string_lossy().to_string();
        if known.contains(&folder_path) {
            debug!("Skipping cataloged folder {:?}", folder);
            continue;
        }
        let Some(cover_path) = find_cover(folder)? else {
            continue;
        };

        let job = FolderJob {
            folder: folder.to_path_buf(),
            title: entry.file_name().to_string_lossy().to_string(),
            record_time: modified_secs(&cover_path),
            cover_path,
        };
        // The receiver only goes away when the pipeline is shutting down.
        if tx.send(job).is_err() {
            break;
        }
    }
    Ok(())
}

/// First image directly inside `dir`, by file name.
pub fn find_cover(dir: &Path) -> Result<Option<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files.into_iter().find(|p| is_cover_candidate(p)))
}

fn modified_secs(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name()
         .to_str()
         .map(|s| s.starts_with('.') && entry.depth() > 0)
         .unwrap_or(false)
}
