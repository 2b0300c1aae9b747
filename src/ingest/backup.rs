use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::{Connection, OpenFlags, Row};
use tracing::{debug, error, info, warn};

use crate::database::error::StoreError;
use crate::database::repo::{
    external_metadata_exists, insert_cover, insert_folder, max_fid, replace_external_metadata,
    Catalog,
};
use crate::database::row::{collect_rows, column, FromRow};
use crate::database::schema::{CoverRecord, ExternalMetadata, FolderRecord};
use crate::ingest::importer::{thumbnail_or_placeholder, ImportSummary};
use crate::ingest::scanner::find_cover;
use crate::metadata::gallery::Category;

const BACKUP_SQL: &str = "
    SELECT d.gid AS gid, d.token AS token, d.title AS title, d.title_jpn AS title_jpn,
           d.thumb AS thumb, d.category AS category, d.posted AS posted,
           d.uploader AS uploader, d.rating AS rating, n.dirname AS dirname
      FROM downloads AS d LEFT JOIN download_dirname AS n ON d.gid = n.gid
";

/// EhViewer stores one category per bit, lowest bit first.
const CATEGORY_BITS: [Category; 10] = [
    Category::Misc,
    Category::Doujinshi,
    Category::Manga,
    Category::ArtistCg,
    Category::GameCg,
    Category::ImageSet,
    Category::Cosplay,
    Category::AsianPorn,
    Category::NonH,
    Category::Western,
];

const POSTED_FORMAT: &str = "%Y-%m-%d %H:%M";

/// One downloaded gallery from an EhViewer backup database.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub gid: i64,
    pub token: String,
    pub title: String,
    pub title_jpn: String,
    pub thumb: String,
    pub category: Category,
    /// `2008-08-10 03:29`, as EhViewer shows it.
    pub posted: String,
    pub uploader: String,
    pub rating: f64,
    /// Folder name below the EhViewer download directory.
    pub dirname: String,
}

impl BackupEntry {
    /// The Japanese title when there is one.
    pub fn folder_title(&self) -> &str {
        if self.title_jpn.is_empty() {
            &self.title
        } else {
            &self.title_jpn
        }
    }

    pub fn metadata(&self) -> ExternalMetadata {
        ExternalMetadata {
            gid: self.gid.to_string(),
            token: self.token.clone(),
            title: self.title.clone(),
            title_jpn: self.title_jpn.clone(),
            category: self.category,
            thumb: self.thumb.clone(),
            uploader: self.uploader.clone(),
            posted: ehviewer_time_to_stamp(&self.posted),
            filecount: 0,
            filesize: 0,
            expunged: false,
            rating: self.rating,
            meta_updated: 0,
        }
    }
}

impl FromRow for BackupEntry {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError> {
        // EhViewer leaves optional columns NULL
        let text = |name: &'static str| -> Result<String, StoreError> {
            Ok(column::<Option<String>>(row, name)?.unwrap_or_default())
        };
        let category = column::<Option<i64>>(row, "category")?
            .and_then(category_from_ehviewer)
            .unwrap_or(Category::Unknown);
        Ok(Self {
            gid: column(row, "gid")?,
            token: text("token")?,
            title: text("title")?,
            title_jpn: text("title_jpn")?,
            thumb: text("thumb")?,
            category,
            posted: text("posted")?,
            uploader: text("uploader")?,
            rating: column::<Option<f64>>(row, "rating")?.unwrap_or_default(),
            dirname: text("dirname")?,
        })
    }
}

/// Decodes an EhViewer category bit field. Only the lowest set bit is used.
pub fn category_from_ehviewer(value: i64) -> Option<Category> {
    if value <= 0 {
        return None;
    }
    let bit = value.trailing_zeros();
    if value >> bit != 1 {
        warn!("Lossy conversion from EhViewer category value {}", value);
    }
    CATEGORY_BITS.get(bit as usize).copied()
}

/// Unix seconds for an EhViewer `posted` value, -1 when it does not parse.
pub fn ehviewer_time_to_stamp(posted: &str) -> i64 {
    match NaiveDateTime::parse_from_str(posted.trim(), POSTED_FORMAT) {
        Ok(time) => time.and_utc().timestamp(),
        Err(e) => {
            warn!("Invalid posted time {:?} in EhViewer backup: {}", posted, e);
            -1
        }
    }
}

/// Reads the downloaded galleries from one backup database, skipping
/// entries without a gallery id or download folder.
pub fn read_backup(path: &Path) -> Result<Vec<BackupEntry>, StoreError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(StoreError::Unavailable)?;
    let mut stmt = conn.prepare(BACKUP_SQL)?;
    let entries: Vec<BackupEntry> = collect_rows(&mut stmt, [])?;

    let (valid, corrupt): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|e| e.gid > 0 && !e.dirname.is_empty());
    for entry in &corrupt {
        error!("Backup entry for gid={} is corrupt, skipping", entry.gid);
    }
    Ok(valid)
}

struct BackupRecord {
    entry: BackupEntry,
    folder: PathBuf,
    cover_fname: String,
    thumb_base64: String,
}

/// Imports the galleries downloaded by EhViewer into the catalog at `db_path`.
///
/// Entries from later backups replace earlier ones with the same gallery id.
/// Folders already in the catalog are skipped; every other entry must have
/// its folder below `download_dir`. All new folders, their covers and their
/// gallery links are written in one transaction.
pub fn import_backups(
    db_path: &Path,
    backups: &[PathBuf],
    download_dir: &Path,
) -> Result<ImportSummary> {
    let download_dir = fs::canonicalize(download_dir)
        .with_context(|| format!("Invalid download dir {:?}", download_dir))?;
    if !download_dir.is_dir() {
        bail!("Download dir {:?} is not a directory", download_dir);
    }

    let mut entries = BTreeMap::new();
    for path in backups {
        let read =
            read_backup(path).with_context(|| format!("Failed to read backup {:?}", path))?;
        info!("Read {} galleries from {:?}", read.len(), path);
        for entry in read {
            entries.insert(entry.gid, entry);
        }
    }

    let mut catalog = Catalog::open(db_path)?;
    let known = catalog.list_all_folders()?;
    let mut pending = Vec::new();
    for entry in entries.into_values() {
        let folder = download_dir.join(&entry.dirname);
        if known.contains(&*folder.to_string_lossy()) {
            debug!("Skipping cataloged folder {:?}", folder);
            continue;
        }
        if !folder.is_dir() {
            bail!("Download folder {:?} does not exist", folder);
        }
        pending.push((entry, folder));
    }

    let progress = ProgressBar::new(pending.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let mut records = Vec::with_capacity(pending.len());
    for (entry, folder) in pending {
        progress.set_message(entry.folder_title().to_string());
        let cover = find_cover(&folder)?;
        let thumb_base64 = thumbnail_or_placeholder(&folder, cover.as_deref());
        let cover_fname = cover
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        records.push(BackupRecord { entry, folder, cover_fname, thumb_base64 });
        progress.inc(1);
    }
    progress.finish_and_clear();

    catalog
        .run_in_transaction(|tx| {
            let mut next_fid = max_fid(tx)? + 1;
            for record in &records {
                let fid = next_fid;
                next_fid += 1;
                let gid = record.entry.gid.to_string();
                insert_folder(
                    tx,
                    &FolderRecord {
                        fid,
                        folder_path: record.folder.to_string_lossy().to_string(),
                        title: record.entry.folder_title().to_string(),
                        record_time: ehviewer_time_to_stamp(&record.entry.posted),
                        eh_gid: gid.clone(),
                    },
                )?;
                insert_cover(
                    tx,
                    &CoverRecord {
                        fid,
                        cover_fname: record.cover_fname.clone(),
                        cover_base64: record.thumb_base64.clone(),
                    },
                )?;
                if external_metadata_exists(tx, &gid)? {
                    debug!("Keeping stored metadata for gallery {}", gid);
                } else {
                    replace_external_metadata(tx, &record.entry.metadata(), &[])?;
                }
            }
            Ok(true)
        })
        .context("Failed to write backup import")?;

    info!("Backup import complete: {} new folders imported", records.len());
    Ok(ImportSummary { imported: records.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::ExternalTag;
    use rusqlite::params;

    fn write_backup(path: &Path, rows: &[(i64, &str, &str, i64, &str, Option<&str>)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE downloads (
                gid INTEGER PRIMARY KEY, token TEXT, title TEXT, title_jpn TEXT,
                thumb TEXT, category INTEGER, posted TEXT, uploader TEXT, rating REAL,
                simple_language TEXT, state INTEGER, legacy INTEGER, time INTEGER,
                label TEXT
            );
            CREATE TABLE download_dirname (gid INTEGER PRIMARY KEY, dirname TEXT);",
        )
        .unwrap();
        for (gid, title, title_jpn, category, posted, dirname) in rows {
            conn.execute(
                "INSERT INTO downloads (gid, token, title, title_jpn, thumb, category,
                                        posted, uploader, rating, state, legacy, time)
                 VALUES (?1, 'tok', ?2, ?3, 'https://example.org/t.jpg', ?4, ?5,
                         'uploader', 4.5, 3, 0, 0)",
                params![gid, title, title_jpn, category, posted],
            )
            .unwrap();
            if let Some(dirname) = dirname {
                conn.execute(
                    "INSERT INTO download_dirname (gid, dirname) VALUES (?1, ?2)",
                    params![gid, dirname],
                )
                .unwrap();
            }
        }
    }

    fn write_png(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::new(40, 30).save(path).unwrap();
    }

    #[test]
    fn test_category_bits() {
        assert_eq!(category_from_ehviewer(1), Some(Category::Misc));
        assert_eq!(category_from_ehviewer(2), Some(Category::Doujinshi));
        assert_eq!(category_from_ehviewer(256), Some(Category::NonH));
        assert_eq!(category_from_ehviewer(512), Some(Category::Western));
        // lossy: lowest bit wins
        assert_eq!(category_from_ehviewer(6), Some(Category::Doujinshi));
        assert_eq!(category_from_ehviewer(0), None);
        assert_eq!(category_from_ehviewer(1024), None);
    }

    #[test]
    fn test_posted_time() {
        assert_eq!(ehviewer_time_to_stamp("2008-08-10 03:29"), 1218338940);
        assert_eq!(ehviewer_time_to_stamp("yesterday"), -1);
    }

    #[test]
    fn test_read_backup_skips_entries_without_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ehviewer.db");
        write_backup(
            &path,
            &[
                (10, "Ten", "", 4, "2020-01-01 00:00", Some("10 Ten")),
                (11, "Eleven", "", 4, "2020-01-01 00:00", None),
            ],
        );

        let entries = read_backup(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].gid, 10);
        assert_eq!(entries[0].category, Category::Manga);
        assert_eq!(entries[0].dirname, "10 Ten");
    }

    #[test]
    fn test_missing_backup_is_unavailable() {
        assert!(matches!(
            read_backup(Path::new("/nonexistent/ehviewer.db")),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_import_links_folders_to_metadata() {
        let work = tempfile::tempdir().unwrap();
        let downloads = work.path().join("download");
        write_png(&downloads.join("20 Twenty/001.png"));
        fs::create_dir_all(downloads.join("30 Thirty")).unwrap();
        let backup = work.path().join("ehviewer.db");
        write_backup(
            &backup,
            &[
                (30, "Thirty", "", 1, "2021-05-01 12:00", Some("30 Thirty")),
                (20, "Twenty", "二十", 256, "2008-08-10 03:29", Some("20 Twenty")),
            ],
        );
        let db_path = work.path().join("catalog.db");

        let summary = import_backups(&db_path, &[backup.clone()], &downloads).unwrap();
        assert_eq!(summary, ImportSummary { imported: 2 });

        let catalog = Catalog::open(&db_path).unwrap();
        let first = catalog.query_folder(1).unwrap().unwrap();
        assert_eq!(first.title, "二十");
        assert_eq!(first.eh_gid, "20");
        assert_eq!(first.record_time, 1218338940);
        assert_eq!(catalog.query_cover(1).unwrap().unwrap().cover_fname, "001.png");

        let cover = catalog.query_cover(2).unwrap().unwrap();
        assert_eq!(cover.cover_fname, "");
        assert!(!cover.cover_base64.is_empty());

        let meta = catalog.query_external_by_fid(1).unwrap().unwrap();
        assert_eq!(meta.category, Category::NonH);
        assert_eq!(meta.title, "Twenty");
        assert_eq!(meta.token, "tok");

        let found = catalog.search(&["thirty"], &[]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fid, 2);
        drop(catalog);

        let again = import_backups(&db_path, &[backup], &downloads).unwrap();
        assert_eq!(again.imported, 0);
    }

    #[test]
    fn test_missing_download_folder_writes_nothing() {
        let work = tempfile::tempdir().unwrap();
        let downloads = work.path().join("download");
        fs::create_dir_all(downloads.join("1 Present")).unwrap();
        let backup = work.path().join("ehviewer.db");
        write_backup(
            &backup,
            &[
                (1, "Present", "", 1, "2021-05-01 12:00", Some("1 Present")),
                (2, "Gone", "", 1, "2021-05-01 12:00", Some("2 Gone")),
            ],
        );
        let db_path = work.path().join("catalog.db");

        assert!(import_backups(&db_path, &[backup], &downloads).is_err());
        assert_eq!(Catalog::open(&db_path).unwrap().max_fid().unwrap(), 0);
    }

    #[test]
    fn test_fetched_metadata_is_kept() {
        let work = tempfile::tempdir().unwrap();
        let downloads = work.path().join("download");
        fs::create_dir_all(downloads.join("5 Five")).unwrap();
        let backup = work.path().join("ehviewer.db");
        write_backup(&backup, &[(5, "Five", "", 1, "2021-05-01 12:00", Some("5 Five"))]);
        let db_path = work.path().join("catalog.db");

        let mut catalog = Catalog::open(&db_path).unwrap();
        let mut fetched = BackupEntry {
            gid: 5,
            token: "tok".into(),
            title: "Five (fetched)".into(),
            title_jpn: String::new(),
            thumb: String::new(),
            category: Category::Manga,
            posted: String::new(),
            uploader: "u".into(),
            rating: 3.0,
            dirname: "5 Five".into(),
        }
        .metadata();
        fetched.filecount = 12;
        catalog
            .run_in_transaction(|tx| {
                let tag = ExternalTag { gid: "5".into(), tag: "language:english".into() };
                replace_external_metadata(tx, &fetched, &[tag])?;
                Ok(true)
            })
            .unwrap();
        drop(catalog);

        assert_eq!(import_backups(&db_path, &[backup], &downloads).unwrap().imported, 1);
        let catalog = Catalog::open(&db_path).unwrap();
        let meta = catalog.query_external_by_fid(1).unwrap().unwrap();
        assert_eq!(meta.title, "Five (fetched)");
        assert_eq!(meta.filecount, 12);
        assert_eq!(catalog.query_external_tags("5").unwrap(), vec!["language:english"]);
    }
}
