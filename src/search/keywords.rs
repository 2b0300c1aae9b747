use std::collections::BTreeMap;
use std::time::Instant;

use rusqlite::Connection;
use tracing::info;

use crate::database::error::StoreError;
use crate::database::row::column;

/// Searchable keywords per folder id. Keyword order carries no meaning.
pub type KeywordIndex = BTreeMap<i64, Vec<String>>;

/// Local tags, external tags, local title, external title and external
/// Japanese title, as `(fid, kw)` pairs.
const KEYWORD_SQL: &str = "
    SELECT f.fid AS fid, t.namespace || ':' || t.stem AS kw
      FROM img_folders AS f INNER JOIN folder_tags AS t ON f.fid = t.fid
    UNION
    SELECT f.fid AS fid, et.tag AS kw
      FROM img_folders AS f INNER JOIN ehentai_tags AS et ON f.eh_gid = et.gid
    UNION
    SELECT fid, title AS kw FROM img_folders
    UNION
    SELECT f.fid AS fid, em.title AS kw
      FROM img_folders AS f INNER JOIN ehentai_metadata AS em ON f.eh_gid = em.gid
    UNION
    SELECT f.fid AS fid, em.title_jpn AS kw
      FROM img_folders AS f INNER JOIN ehentai_metadata AS em ON f.eh_gid = em.gid
";

/// Aggregates the keyword sets of every folder.
///
/// Folders with no non-empty keyword are absent from the index. Any query
/// or decoding failure aborts the build.
pub fn build_keyword_index(conn: &Connection) -> Result<KeywordIndex, StoreError> {
    let start = Instant::now();
    let mut stmt = conn.prepare(KEYWORD_SQL)?;
    let mut rows = stmt.query([])?;

    let mut index = KeywordIndex::new();
    while let Some(row) = rows.next()? {
        let fid: i64 = column(row, "fid")?;
        let kw: Option<String> = column(row, "kw")?;
        if let Some(kw) = kw.filter(|kw| !kw.is_empty()) {
            index.entry(fid).or_default().push(kw);
        }
    }

    info!(
        "Keyword index built for {} folders in {}ms",
        index.len(),
        start.elapsed().as_millis()
    );
    Ok(index)
}
