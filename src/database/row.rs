use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::{Params, Row, Statement};

use crate::database::error::StoreError;
use crate::database::schema::{
    CoverRecord, ExternalMetadata, FolderPreview, FolderRecord, FolderTag,
};
use crate::metadata::gallery::Category;

/// Decodes one result row into a typed record.
///
/// Columns are looked up by name, so queries must alias joined columns to
/// the names used here. A type mismatch is reported as
/// [`StoreError::Decode`] naming the column, never replaced by a default.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError>;
}

pub fn column<T: FromSql>(row: &Row<'_>, column: &'static str) -> Result<T, StoreError> {
    row.get(column)
        .map_err(|source| StoreError::Decode { column, source })
}

/// Runs a prepared statement and decodes every row.
pub fn collect_rows<T: FromRow, P: Params>(
    stmt: &mut Statement<'_>,
    params: P,
) -> Result<Vec<T>, StoreError> {
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(T::from_row(row)?);
    }
    Ok(out)
}

impl FromRow for FolderRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            fid: column(row, "fid")?,
            folder_path: column(row, "folder_path")?,
            title: column(row, "title")?,
            record_time: column(row, "record_time")?,
            eh_gid: column(row, "eh_gid")?,
        })
    }
}

impl FromRow for CoverRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            fid: column(row, "fid")?,
            cover_fname: column(row, "cover_fname")?,
            cover_base64: column(row, "cover_base64")?,
        })
    }
}

impl FromRow for FolderTag {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            fid: column(row, "fid")?,
            namespace: column(row, "namespace")?,
            stem: column(row, "stem")?,
        })
    }
}

/// Categories are stored by name; `__unknown__` is the only name outside the
/// known set that decodes.
impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let name = value.as_str()?;
        if name == Category::Unknown.as_str() {
            return Ok(Category::Unknown);
        }
        Category::from_name(name)
            .ok_or_else(|| FromSqlError::Other(format!("unknown category {:?}", name).into()))
    }
}

impl FromRow for ExternalMetadata {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError> {
        let expunged: i64 = column(row, "expunged")?;
        Ok(Self {
            gid: column(row, "gid")?,
            token: column(row, "token")?,
            title: column(row, "title")?,
            title_jpn: column(row, "title_jpn")?,
            category: column(row, "category")?,
            thumb: column(row, "thumb")?,
            uploader: column(row, "uploader")?,
            posted: column(row, "posted")?,
            filecount: column(row, "filecount")?,
            filesize: column(row, "filesize")?,
            expunged: expunged != 0,
            rating: column(row, "rating")?,
            meta_updated: column(row, "meta_updated")?,
        })
    }
}

impl FromRow for FolderPreview {
    fn from_row(row: &Row<'_>) -> Result<Self, StoreError> {
        Ok(Self {
            fid: column(row, "fid")?,
            folder_path: column(row, "folder_path")?,
            title: column(row, "title")?,
            record_time: column(row, "record_time")?,
            cover_base64: column(row, "cover_base64")?,
            eh_gid: column(row, "eh_gid")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_type_mismatch_names_the_column() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT 'one' AS fid, '/a' AS folder_path, 'A' AS title,
                        0 AS record_time, '' AS eh_gid",
            )
            .unwrap();

        match collect_rows::<FolderRecord, _>(&mut stmt, []) {
            Err(StoreError::Decode { column, .. }) => assert_eq!(column, "fid"),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_null_cover_decodes_as_none() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT 1 AS fid, '/a' AS folder_path, 'A' AS title,
                        0 AS record_time, NULL AS cover_base64, '' AS eh_gid",
            )
            .unwrap();

        let previews: Vec<FolderPreview> = collect_rows(&mut stmt, []).unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].cover_base64, None);
    }

    fn metadata_row(
        conn: &Connection,
        category: &str,
    ) -> Result<Vec<ExternalMetadata>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT '1' AS gid, 't' AS token, 'T' AS title, '' AS title_jpn,
                        ?1 AS category, '' AS thumb, 'u' AS uploader, 1 AS posted,
                        1 AS filecount, 1 AS filesize, 0 AS expunged, 4.5 AS rating,
                        0 AS meta_updated",
            )
            .unwrap();
        collect_rows(&mut stmt, [category])
    }

    #[test]
    fn test_category_decodes_by_name() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(metadata_row(&conn, "Game CG").unwrap()[0].category, Category::GameCg);
        assert_eq!(metadata_row(&conn, "__unknown__").unwrap()[0].category, Category::Unknown);
    }

    #[test]
    fn test_unrecognised_category_is_decode_error() {
        let conn = Connection::open_in_memory().unwrap();
        match metadata_row(&conn, "Furniture") {
            Err(StoreError::Decode { column, .. }) => assert_eq!(column, "category"),
            other => panic!("expected decode error, got {:?}", other),
        }
    }
}
