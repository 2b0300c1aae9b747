use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{error, info};

use crate::database::error::StoreError;
use crate::metadata::gallery::Category;

/// Declarative description of one persisted table.
///
/// Every table records its revision in `table_revision` when it is first
/// created. Opening a database whose recorded revision differs from
/// `REVISION` is refused rather than migrated.
pub trait TableSchema {
    const NAME: &'static str;
    const REVISION: i64;
    const CREATION_SQL: &'static str;
}

const TABLE_REVISION_SQL: &str = "
    CREATE TABLE IF NOT EXISTS table_revision (
        table_name TEXT PRIMARY KEY,
        revision INTEGER NOT NULL
    );
";

/// A cataloged image folder.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderRecord {
    pub fid: i64,
    pub folder_path: String,
    pub title: String,
    /// Unix timestamp, seconds.
    pub record_time: i64,
    /// Empty when the folder has no external metadata.
    pub eh_gid: String,
}

impl TableSchema for FolderRecord {
    const NAME: &'static str = "img_folders";
    const REVISION: i64 = 1;
    const CREATION_SQL: &'static str = "
        CREATE TABLE IF NOT EXISTS img_folders (
            fid INTEGER PRIMARY KEY,
            folder_path TEXT UNIQUE NOT NULL,
            title TEXT NOT NULL,
            record_time INTEGER NOT NULL,
            eh_gid TEXT NOT NULL
        );
    ";
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverRecord {
    pub fid: i64,
    pub cover_fname: String,
    pub cover_base64: String,
}

impl TableSchema for CoverRecord {
    const NAME: &'static str = "cover_images";
    const REVISION: i64 = 1;
    const CREATION_SQL: &'static str = "
        CREATE TABLE IF NOT EXISTS cover_images (
            fid INTEGER UNIQUE NOT NULL,
            cover_fname TEXT NOT NULL,
            cover_base64 TEXT NOT NULL
        );
    ";
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderTag {
    pub fid: i64,
    pub namespace: String,
    pub stem: String,
}

impl FolderTag {
    /// Parses `namespace:stem`. Text without a colon gets an empty namespace.
    pub fn parse(fid: i64, text: &str) -> Self {
        let (namespace, stem) = text.split_once(':').unwrap_or(("", text));
        Self {
            fid,
            namespace: namespace.trim().to_string(),
            stem: stem.trim().to_string(),
        }
    }

    pub fn keyword(&self) -> String {
        format!("{}:{}", self.namespace, self.stem)
    }
}

impl TableSchema for FolderTag {
    const NAME: &'static str = "folder_tags";
    const REVISION: i64 = 1;
    const CREATION_SQL: &'static str = "
        CREATE TABLE IF NOT EXISTS folder_tags (
            fid INTEGER NOT NULL,
            namespace TEXT NOT NULL,
            stem TEXT NOT NULL
        );
    ";
}

/// Gallery metadata as stored locally, keyed by the external gallery id.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalMetadata {
    pub gid: String,
    pub token: String,
    pub title: String,
    /// Empty when the gallery has no Japanese title.
    pub title_jpn: String,
    pub category: Category,
    pub thumb: String,
    pub uploader: String,
    pub posted: i64,
    pub filecount: i64,
    pub filesize: i64,
    pub expunged: bool,
    pub rating: f64,
    /// When this record was last pulled, unix seconds.
    pub meta_updated: i64,
}

impl TableSchema for ExternalMetadata {
    const NAME: &'static str = "ehentai_metadata";
    const REVISION: i64 = 1;
    const CREATION_SQL: &'static str = "
        CREATE TABLE IF NOT EXISTS ehentai_metadata (
            gid TEXT PRIMARY KEY,
            token TEXT NOT NULL,
            title TEXT NOT NULL,
            title_jpn TEXT NOT NULL,
            category TEXT NOT NULL,
            thumb TEXT NOT NULL,
            uploader TEXT NOT NULL,
            posted INTEGER NOT NULL,
            filecount INTEGER NOT NULL,
            filesize INTEGER NOT NULL,
            expunged INTEGER NOT NULL,
            rating REAL NOT NULL,
            meta_updated INTEGER NOT NULL
        );
    ";
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTag {
    pub gid: String,
    pub tag: String,
}

impl TableSchema for ExternalTag {
    const NAME: &'static str = "ehentai_tags";
    const REVISION: i64 = 1;
    const CREATION_SQL: &'static str = "
        CREATE TABLE IF NOT EXISTS ehentai_tags (
            gid TEXT NOT NULL,
            tag TEXT NOT NULL
        );
    ";
}

/// Search result shape: a folder joined with its cover thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderPreview {
    pub fid: i64,
    pub folder_path: String,
    pub title: String,
    pub record_time: i64,
    pub cover_base64: Option<String>,
    pub eh_gid: String,
}

/// Creates missing tables and checks the revision of existing ones.
pub fn create_tables(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute_batch(TABLE_REVISION_SQL)?;
    ensure_table::<FolderRecord>(&tx)?;
    ensure_table::<CoverRecord>(&tx)?;
    ensure_table::<FolderTag>(&tx)?;
    ensure_table::<ExternalMetadata>(&tx)?;
    ensure_table::<ExternalTag>(&tx)?;
    tx.commit()?;
    Ok(())
}

fn ensure_table<T: TableSchema>(tx: &Transaction) -> Result<(), StoreError> {
    let recorded: Option<i64> = tx
        .query_row(
            "SELECT revision FROM table_revision WHERE table_name = ?1",
            params![T::NAME],
            |row| row.get(0),
        )
        .optional()?;

    match recorded {
        None => {
            tx.execute_batch(T::CREATION_SQL)?;
            tx.execute(
                "INSERT INTO table_revision (table_name, revision) VALUES (?1, ?2)",
                params![T::NAME, T::REVISION],
            )?;
            info!("Created table {}", T::NAME);
            Ok(())
        }
        Some(found) if found == T::REVISION => Ok(()),
        Some(found) => {
            error!("Revision mismatch for table {}: {} != {}", T::NAME, found, T::REVISION);
            Err(StoreError::SchemaRevisionMismatch {
                table: T::NAME,
                found,
                expected: T::REVISION,
            })
        }
    }
}
