use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{error, info, warn};

use crate::database::error::StoreError;
use crate::database::row::{collect_rows, column};
use crate::database::schema::{
    create_tables, CoverRecord, ExternalMetadata, ExternalTag, FolderPreview, FolderRecord,
    FolderTag,
};
use crate::metadata::source::{FetchTask, MetadataSource};
use crate::search::boolean::BooleanQuery;
use crate::search::fuzzy::{FuzzyConfig, FuzzyMatcher};
use crate::search::keywords::{build_keyword_index, KeywordIndex};

const PREVIEW_SQL: &str = "
    SELECT f.fid AS fid, f.folder_path AS folder_path, f.title AS title,
           f.record_time AS record_time, c.cover_base64 AS cover_base64, f.eh_gid AS eh_gid
      FROM img_folders AS f LEFT JOIN cover_images AS c ON f.fid = c.fid
     ORDER BY f.fid
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    RolledBack,
}

/// The catalog database: one non-pooled SQLite connection.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(StoreError::Unavailable)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(StoreError::Unavailable)?;
        info!("Opened catalog at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Unavailable)?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        create_tables(&mut conn)?;
        Ok(Self { conn })
    }

    /// Runs `f` inside one transaction.
    ///
    /// `Ok(true)` from `f` commits and `Ok(false)` rolls back on purpose. An
    /// error from `f`, or a failure to begin or commit, rolls back and is
    /// returned.
    pub fn run_in_transaction<F>(&mut self, f: F) -> Result<TxOutcome, StoreError>
    where
        F: FnOnce(&Transaction) -> Result<bool, StoreError>,
    {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StoreError::Transaction(format!("failed to start transaction: {}", e)))?;

        match f(&tx) {
            Ok(true) => {
                tx.commit().map_err(|e| {
                    error!("Transaction commit failed: {}", e);
                    StoreError::Transaction(format!("commit failed: {}", e))
                })?;
                Ok(TxOutcome::Committed)
            }
            Ok(false) => {
                tx.rollback()?;
                Ok(TxOutcome::RolledBack)
            }
            Err(e) => {
                warn!("Rolling back transaction: {}", e);
                if let Err(rollback_err) = tx.rollback() {
                    error!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Largest folder id, 0 for an empty catalog.
    pub fn max_fid(&self) -> Result<i64, StoreError> {
        max_fid(&self.conn)
    }

    pub fn list_all_folders(&self) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT folder_path FROM img_folders")?;
        let mut rows = stmt.query([])?;
        let mut out = HashSet::new();
        while let Some(row) = rows.next()? {
            out.insert(column(row, "folder_path")?);
        }
        Ok(out)
    }

    pub fn list_folder_previews(&self) -> Result<Vec<FolderPreview>, StoreError> {
        let start = Instant::now();
        let mut stmt = self.conn.prepare(PREVIEW_SQL)?;
        let previews: Vec<FolderPreview> = collect_rows(&mut stmt, [])?;
        info!(
            "Listed {} folder previews in {}ms",
            previews.len(),
            start.elapsed().as_millis()
        );
        Ok(previews)
    }

    pub fn list_search_keywords(&self) -> Result<KeywordIndex, StoreError> {
        build_keyword_index(&self.conn)
    }

    /// Boolean keyword search.
    ///
    /// Patterns are compiled before anything is read, so an invalid pattern
    /// fails the call without touching the store.
    pub fn search<S: AsRef<str>>(
        &self,
        include: &[S],
        exclude: &[S],
    ) -> Result<Vec<FolderPreview>, StoreError> {
        let query = BooleanQuery::compile(include, exclude)?;
        let keywords = self.list_search_keywords()?;
        let previews = self.list_folder_previews()?;

        let start = Instant::now();
        let selected: HashSet<i64> = keywords
            .iter()
            .filter(|(_, kws)| query.matches(kws.as_slice()))
            .map(|(fid, _)| *fid)
            .collect();
        let results: Vec<FolderPreview> = previews
            .into_iter()
            .filter(|p| selected.contains(&p.fid))
            .collect();
        info!(
            "Keyword search matched {} folders in {}ms",
            results.len(),
            start.elapsed().as_millis()
        );
        Ok(results)
    }

    /// Folders whose title is similar to `title`. Unbalanced brackets in
    /// `title` give an empty result rather than an error.
    pub fn search_similar(
        &self,
        title: &str,
        config: &FuzzyConfig,
    ) -> Result<Vec<FolderPreview>, StoreError> {
        let previews = self.list_folder_previews()?;
        let start = Instant::now();
        let matcher = FuzzyMatcher::new(config.clone());
        let results = matcher.filter_similar(previews, title, |p| p.title.as_str());
        info!(
            "Similar-title search matched {} folders in {}ms",
            results.len(),
            start.elapsed().as_millis()
        );
        Ok(results)
    }

    pub fn query_folder(&self, fid: i64) -> Result<Option<FolderRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT fid, folder_path, title, record_time, eh_gid FROM img_folders WHERE fid = ?1",
        )?;
        Ok(collect_rows(&mut stmt, params![fid])?.into_iter().next())
    }

    pub fn query_cover(&self, fid: i64) -> Result<Option<CoverRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT fid, cover_fname, cover_base64 FROM cover_images WHERE fid = ?1")?;
        let cover = collect_rows(&mut stmt, params![fid])?.into_iter().next();
        if cover.is_none() {
            warn!("No cover image for fid={}", fid);
        }
        Ok(cover)
    }

    pub fn query_folder_tags(&self, fid: i64) -> Result<Vec<FolderTag>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT fid, namespace, stem FROM folder_tags WHERE fid = ?1")?;
        collect_rows(&mut stmt, params![fid])
    }

    pub fn query_external_by_gid(&self, gid: &str) -> Result<Option<ExternalMetadata>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT * FROM ehentai_metadata WHERE gid = ?1")?;
        Ok(collect_rows(&mut stmt, params![gid])?.into_iter().next())
    }

    pub fn query_external_by_fid(&self, fid: i64) -> Result<Option<ExternalMetadata>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT em.* FROM ehentai_metadata AS em
               INNER JOIN img_folders AS f ON f.eh_gid = em.gid
              WHERE f.fid = ?1",
        )?;
        Ok(collect_rows(&mut stmt, params![fid])?.into_iter().next())
    }

    pub fn query_external_tags(&self, gid: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT tag FROM ehentai_tags WHERE gid = ?1")?;
        let mut rows = stmt.query(params![gid])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            let tag: String = column(row, "tag")?;
            if !tag.is_empty() {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    pub fn insert_folder(&self, record: &FolderRecord) -> Result<(), StoreError> {
        insert_folder(&self.conn, record)
    }

    pub fn insert_cover(&self, record: &CoverRecord) -> Result<(), StoreError> {
        insert_cover(&self.conn, record)
    }

    pub fn insert_tag(&self, tag: &FolderTag) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO folder_tags (fid, namespace, stem) VALUES (?1, ?2, ?3)",
            params![tag.fid, tag.namespace, tag.stem],
        )?;
        Ok(())
    }

    /// Attaches external metadata to a folder. Returns false when no folder
    /// has that id.
    pub fn link_external(&self, fid: i64, gid: &str) -> Result<bool, StoreError> {
        set_external_link(&self.conn, fid, gid)
    }

    pub fn unlink_external(&self, fid: i64) -> Result<bool, StoreError> {
        set_external_link(&self.conn, fid, "")
    }

    /// Fetches gallery metadata and, once it has arrived, stores it and links
    /// it to `fid` in one transaction.
    pub fn refresh_metadata(
        &mut self,
        fid: i64,
        gid: i64,
        token: &str,
        source: Arc<dyn MetadataSource>,
    ) -> Result<(), StoreError> {
        if self.query_folder(fid)?.is_none() {
            return Err(StoreError::UnknownFolder(fid));
        }

        let meta = FetchTask::spawn(source, gid, token.to_string()).wait()?;
        let (record, tags) = meta.into_records(unix_now());

        self.run_in_transaction(|tx| {
            replace_external_metadata(tx, &record, &tags)?;
            set_external_link(tx, fid, &record.gid)?;
            Ok(true)
        })?;
        info!("Refreshed metadata for fid={} from gallery {}", fid, gid);
        Ok(())
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn max_fid(conn: &Connection) -> Result<i64, StoreError> {
    let max: Option<i64> = conn
        .query_row("SELECT MAX(fid) FROM img_folders", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(max.unwrap_or(0))
}

pub fn insert_folder(conn: &Connection, record: &FolderRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO img_folders (fid, folder_path, title, record_time, eh_gid)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.fid,
            record.folder_path,
            record.title,
            record.record_time,
            record.eh_gid
        ],
    )?;
    Ok(())
}

pub fn insert_cover(conn: &Connection, record: &CoverRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO cover_images (fid, cover_fname, cover_base64) VALUES (?1, ?2, ?3)",
        params![record.fid, record.cover_fname, record.cover_base64],
    )?;
    Ok(())
}

pub fn external_metadata_exists(conn: &Connection, gid: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ehentai_metadata WHERE gid = ?1",
        params![gid],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn set_external_link(conn: &Connection, fid: i64, gid: &str) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE img_folders SET eh_gid = ?1 WHERE fid = ?2",
        params![gid, fid],
    )?;
    Ok(changed == 1)
}

/// Replaces the stored metadata and the whole tag set of one gallery.
///
/// Must run inside a transaction so readers never see the record deleted
/// without its replacement.
pub fn replace_external_metadata(
    tx: &Transaction,
    record: &ExternalMetadata,
    tags: &[ExternalTag],
) -> Result<(), StoreError> {
    tx.execute("DELETE FROM ehentai_metadata WHERE gid = ?1", params![record.gid])?;
    tx.execute(
        "INSERT INTO ehentai_metadata (
            gid, token, title, title_jpn, category, thumb, uploader, posted,
            filecount, filesize, expunged, rating, meta_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.gid,
            record.token,
            record.title,
            record.title_jpn,
            record.category.as_str(),
            record.thumb,
            record.uploader,
            record.posted,
            record.filecount,
            record.filesize,
            record.expunged as i64,
            record.rating,
            record.meta_updated,
        ],
    )?;

    tx.execute("DELETE FROM ehentai_tags WHERE gid = ?1", params![record.gid])?;
    let mut stmt = tx.prepare("INSERT INTO ehentai_tags (gid, tag) VALUES (?1, ?2)")?;
    for tag in tags {
        let affected = stmt.execute(params![record.gid, tag.tag])?;
        if affected != 1 {
            return Err(StoreError::Transaction(format!(
                "inserting tag '{}' affected {} rows",
                tag.tag, affected
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::gallery::tests::SAMPLE;
    use crate::metadata::gallery::Category;
    use std::io::Write;

    fn folder(fid: i64, title: &str) -> FolderRecord {
        FolderRecord {
            fid,
            folder_path: format!("/library/{}", fid),
            title: title.to_string(),
            record_time: 1_600_000_000 + fid,
            eh_gid: String::new(),
        }
    }

    fn catalog_with(titles: &[&str]) -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        for (i, title) in titles.iter().enumerate() {
            catalog.insert_folder(&folder(i as i64 + 1, title)).unwrap();
        }
        catalog
    }

    fn metadata(gid: &str, title: &str) -> ExternalMetadata {
        ExternalMetadata {
            gid: gid.to_string(),
            token: "tok".to_string(),
            title: title.to_string(),
            title_jpn: String::new(),
            category: Category::Manga,
            thumb: "thumb".to_string(),
            uploader: "up".to_string(),
            posted: 1,
            filecount: 10,
            filesize: 1000,
            expunged: false,
            rating: 4.5,
            meta_updated: 2,
        }
    }

    fn tags(gid: &str, names: &[&str]) -> Vec<ExternalTag> {
        names
            .iter()
            .map(|t| ExternalTag { gid: gid.to_string(), tag: t.to_string() })
            .collect()
    }

    fn fids(previews: &[FolderPreview]) -> Vec<i64> {
        previews.iter().map(|p| p.fid).collect()
    }

    #[test]
    fn test_max_fid() {
        assert_eq!(catalog_with(&[]).max_fid().unwrap(), 0);
        assert_eq!(catalog_with(&["a", "b", "c"]).max_fid().unwrap(), 3);
    }

    #[test]
    fn test_boolean_search_scenario() {
        let catalog = catalog_with(&["title x", "other"]);
        catalog.insert_tag(&FolderTag::parse(1, "artist:jane")).unwrap();
        catalog.insert_tag(&FolderTag::parse(2, "artist:john")).unwrap();
        // keyword sets: {1: [artist:jane, title x]}, {2: [artist:john, other]}

        let found = catalog.search(&["artist:jane"], &[]).unwrap();
        assert_eq!(fids(&found), vec![1]);

        let found = catalog.search(&[], &["artist:jane"]).unwrap();
        assert_eq!(fids(&found), vec![2]);

        let found = catalog.search::<&str>(&[], &[]).unwrap();
        assert_eq!(fids(&found), vec![1, 2]);
    }

    #[test]
    fn test_identical_include_and_exclude_is_empty() {
        let catalog = catalog_with(&["a", "ab", "b"]);
        assert!(catalog.search(&["a"], &["a"]).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_pattern_fails_search() {
        let catalog = catalog_with(&["a"]);
        assert!(matches!(
            catalog.search(&["[bad"], &[]),
            Err(StoreError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_search_uses_external_keywords() {
        let mut catalog = catalog_with(&["local title", "plain"]);
        catalog
            .run_in_transaction(|tx| {
                replace_external_metadata(
                    tx,
                    &metadata("77", "Remote Title"),
                    &tags("77", &["female:glasses"]),
                )?;
                Ok(true)
            })
            .unwrap();
        assert!(catalog.link_external(1, "77").unwrap());

        assert_eq!(fids(&catalog.search(&["glasses"], &[]).unwrap()), vec![1]);
        assert_eq!(fids(&catalog.search(&["remote"], &[]).unwrap()), vec![1]);

        assert!(catalog.unlink_external(1).unwrap());
        assert!(catalog.search(&["glasses"], &[]).unwrap().is_empty());
        assert!(!catalog.unlink_external(42).unwrap());
    }

    #[test]
    fn test_similar_search_scenario() {
        let catalog = catalog_with(&["(Group1) Foo Bar", "(Group2) Foo Baz", "Unrelated"]);
        let found = catalog
            .search_similar("(Group1) Foo Bar", &FuzzyConfig::default())
            .unwrap();
        assert_eq!(fids(&found), vec![1, 2]);
    }

    #[test]
    fn test_similar_search_unbalanced_title_is_empty() {
        let catalog = catalog_with(&["(Group1) Foo Bar"]);
        let found = catalog
            .search_similar("(Group1 Foo Bar", &FuzzyConfig::default())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_previews_include_cover_when_present() {
        let catalog = catalog_with(&["a", "b"]);
        catalog
            .insert_cover(&CoverRecord {
                fid: 2,
                cover_fname: "001.jpg".to_string(),
                cover_base64: "AAAA".to_string(),
            })
            .unwrap();

        let previews = catalog.list_folder_previews().unwrap();
        assert_eq!(previews[0].cover_base64, None);
        assert_eq!(previews[1].cover_base64.as_deref(), Some("AAAA"));
        assert_eq!(catalog.query_cover(2).unwrap().unwrap().cover_fname, "001.jpg");
        assert!(catalog.query_cover(1).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_path_is_rejected() {
        let catalog = catalog_with(&["a"]);
        let mut dup = folder(2, "b");
        dup.folder_path = "/library/1".to_string();
        assert!(matches!(catalog.insert_folder(&dup), Err(StoreError::Query(_))));
    }

    #[test]
    fn test_transaction_rollback_on_false() {
        let mut catalog = catalog_with(&[]);
        let outcome = catalog
            .run_in_transaction(|tx| {
                insert_folder(tx, &folder(1, "a"))?;
                Ok(false)
            })
            .unwrap();
        assert_eq!(outcome, TxOutcome::RolledBack);
        assert_eq!(catalog.max_fid().unwrap(), 0);
    }

    #[test]
    fn test_transaction_rollback_on_error() {
        let mut catalog = catalog_with(&[]);
        let result = catalog.run_in_transaction(|tx| {
            insert_folder(tx, &folder(1, "a"))?;
            insert_folder(tx, &folder(1, "a"))?;
            Ok(true)
        });
        assert!(matches!(result, Err(StoreError::Query(_))));
        assert_eq!(catalog.max_fid().unwrap(), 0);
    }

    #[test]
    fn test_transaction_commit() {
        let mut catalog = catalog_with(&[]);
        let outcome = catalog
            .run_in_transaction(|tx| {
                insert_folder(tx, &folder(1, "a"))?;
                Ok(true)
            })
            .unwrap();
        assert_eq!(outcome, TxOutcome::Committed);
        assert_eq!(catalog.max_fid().unwrap(), 1);
    }

    #[test]
    fn test_replace_external_metadata_is_wholesale() {
        let mut catalog = catalog_with(&[]);
        for (title, tag_names) in [("First", vec!["a", "b", "c"]), ("Second", vec!["d"])] {
            catalog
                .run_in_transaction(|tx| {
                    replace_external_metadata(tx, &metadata("9", title), &tags("9", &tag_names))?;
                    Ok(true)
                })
                .unwrap();
        }

        assert_eq!(catalog.query_external_by_gid("9").unwrap().unwrap().title, "Second");
        assert_eq!(catalog.query_external_tags("9").unwrap(), vec!["d"]);
    }

    #[test]
    fn test_refresh_metadata_links_folder() {
        let mut catalog = catalog_with(&["Touhou Gensou Ibun"]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let source = Arc::new(crate::metadata::source::JsonFileSource::new(file.path()));

        catalog.refresh_metadata(1, 618395, "0439fa3666", source).unwrap();

        let meta = catalog.query_external_by_fid(1).unwrap().unwrap();
        assert_eq!(meta.gid, "618395");
        assert_eq!(meta.category, Category::NonH);
        assert!(meta.meta_updated > 0);
        assert_eq!(
            catalog.query_external_tags("618395").unwrap(),
            vec!["parody:touhou project", "language:english"]
        );
        assert_eq!(fids(&catalog.search(&["language:english"], &[]).unwrap()), vec![1]);
    }

    #[test]
    fn test_failed_refresh_writes_nothing() {
        let mut catalog = catalog_with(&["a"]);
        let source = Arc::new(crate::metadata::source::JsonFileSource::new("/nonexistent.json"));
        assert!(matches!(
            catalog.refresh_metadata(1, 618395, "0439fa3666", source),
            Err(StoreError::Metadata(_))
        ));
        assert_eq!(catalog.query_folder(1).unwrap().unwrap().eh_gid, "");
        assert!(catalog.query_external_by_gid("618395").unwrap().is_none());
    }

    #[test]
    fn test_open_file_rejects_revision_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        drop(Catalog::open(&path).unwrap());
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "UPDATE table_revision SET revision = 2 WHERE table_name = 'img_folders'",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            Catalog::open(&path),
            Err(StoreError::SchemaRevisionMismatch { table: "img_folders", .. })
        ));
    }
}
