use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::database::repo::{insert_cover, insert_folder, max_fid, Catalog};
use crate::database::schema::{CoverRecord, FolderRecord};
use crate::ingest::scanner::{self, FolderJob};
use crate::ingest::thumbnail::{generate_thumbnail, placeholder_thumbnail};

/// A scanned folder with its cover thumbnail, ready to insert.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub job: FolderJob,
    pub thumb_base64: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
}

/// Buffers import records and writes them in batches, one transaction per
/// batch. New folders get consecutive ids after the current maximum.
pub struct ImportWriter {
    catalog: Catalog,
    buffer: Vec<ImportRecord>,
    buffer_limit: usize,
    written: usize,
}

impl ImportWriter {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            buffer: Vec::new(),
            buffer_limit: 1000,
            written: 0,
        }
    }

    pub fn add(&mut self, record: ImportRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.buffer_limit {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        // workers finish out of order; ids follow folder path within a batch
        self.buffer.sort_by(|a, b| a.job.folder.cmp(&b.job.folder));
        let buffer = &self.buffer;
        self.catalog
            .run_in_transaction(|tx| {
                let mut next_fid = max_fid(tx)? + 1;
                for record in buffer {
                    let fid = next_fid;
                    next_fid += 1;
                    insert_folder(
                        tx,
                        &FolderRecord {
                            fid,
                            folder_path: record.job.folder.to_string_lossy().to_string(),
                            title: record.job.title.clone(),
                            record_time: record.job.record_time,
                            eh_gid: String::new(),
                        },
                    )?;
                    insert_cover(
                        tx,
                        &CoverRecord {
                            fid,
                            cover_fname: record.job.cover_fname(),
                            cover_base64: record.thumb_base64.clone(),
                        },
                    )?;
                }
                Ok(true)
            })
            .context("Failed to write import batch")?;

        self.written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

/// Cover thumbnail for `folder`, or the placeholder image when there is no
/// usable cover.
pub(crate) fn thumbnail_or_placeholder(folder: &Path, cover: Option<&Path>) -> String {
    let thumb = match cover {
        Some(cover) => generate_thumbnail(cover),
        None => Err(anyhow!("no cover image")),
    };
    match thumb {
        Ok(thumb) => thumb,
        Err(e) => {
            warn!("Using placeholder cover for {:?}: {:#}", folder, e);
            placeholder_thumbnail().unwrap_or_else(|e| {
                error!("Failed to build placeholder thumbnail: {:#}", e);
                String::new()
            })
        }
    }
}

/// Imports every new image folder below `root` into the catalog at `db_path`.
///
/// Scanning, thumbnailing and writing run on separate threads connected by
/// bounded channels; only the writer thread touches the database.
pub fn import_dir(db_path: &Path, root: &Path, num_workers: usize) -> Result<ImportSummary> {
    let root = fs::canonicalize(root)
        .with_context(|| format!("Failed to resolve import root {:?}", root))?;
    let known = Catalog::open(db_path)?.list_all_folders()?;
    info!("Importing from {:?}, {} folders already cataloged", root, known.len());

    let (scan_tx, scan_rx) = bounded::<FolderJob>(256);
    let (thumb_tx, thumb_rx) = bounded::<ImportRecord>(256);

    // 1. Scanner Thread
    let scan_root: PathBuf = root.clone();
    let scanner_handle = thread::spawn(move || {
        info!("Scanner started");
        let result = scanner::scan_directory(&scan_root, &known, scan_tx);
        info!("Scanner finished");
        result
    });

    // 2. Thumbnail Workers
    let mut worker_handles = Vec::new();
    for i in 0..num_workers.max(1) {
        let rx = scan_rx.clone();
        let tx = thumb_tx.clone();
        worker_handles.push(thread::spawn(move || {
            for job in rx {
                let thumb_base64 = thumbnail_or_placeholder(&job.folder, Some(&job.cover_path));
                if tx.send(ImportRecord { job, thumb_base64 }).is_err() {
                    break;
                }
            }
            info!("Thumbnail worker {} finished", i);
        }));
    }
    drop(scan_rx);
    drop(thumb_tx);

    // 3. DB Writer Thread
    let db_path = db_path.to_path_buf();
    let writer_handle = thread::spawn(move || -> Result<usize> {
        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::with_template("{spinner} {pos} folders imported: {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let mut writer = ImportWriter::new(Catalog::open(&db_path)?);
        for record in thumb_rx {
            progress.set_message(record.job.title.clone());
            writer.add(record)?;
            progress.inc(1);
        }
        writer.flush()?;
        progress.finish_with_message("done");
        Ok(writer.written())
    });

    let scan_result = scanner_handle
        .join()
        .map_err(|_| anyhow!("Scanner thread panicked"))?;
    for h in worker_handles {
        h.join().map_err(|_| anyhow!("Thumbnail worker panicked"))?;
    }
    let imported = writer_handle
        .join()
        .map_err(|_| anyhow!("DB writer thread panicked"))??;
    scan_result.context("Folder scan failed")?;

    info!("Import complete: {} new folders imported", imported);
    Ok(ImportSummary { imported })
}
