use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{Connection, params};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::marker::MarkerRecord;
use crate::pipeline::merge::PageRow;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to open index database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS pages (
        path TEXT NOT NULL,
        page INTEGER NOT NULL,
        folder TEXT NOT NULL,
        text TEXT NOT NULL,
        PRIMARY KEY (path, page)
    );

    CREATE TABLE IF NOT EXISTS ocr_jobs (
        key TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        etag TEXT NOT NULL,
        s3_ocr_etag TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_ocr_jobs_job_id ON ocr_jobs(job_id);

    CREATE TABLE IF NOT EXISTS fetched_jobs (
        job_id TEXT PRIMARY KEY,
        processed TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS pages_fts USING fts5(
        text,
        content='pages',
        content_rowid='rowid'
    );

    CREATE TRIGGER IF NOT EXISTS pages_ai AFTER INSERT ON pages BEGIN
        INSERT INTO pages_fts(rowid, text) VALUES (new.rowid, new.text);
    END;
    CREATE TRIGGER IF NOT EXISTS pages_ad AFTER DELETE ON pages BEGIN
        INSERT INTO pages_fts(pages_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
    END;
    CREATE TRIGGER IF NOT EXISTS pages_au AFTER UPDATE ON pages BEGIN
        INSERT INTO pages_fts(pages_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
        INSERT INTO pages_fts(rowid, text) VALUES (new.rowid, new.text);
    END;
"#;

/// One full-text match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub page: u32,
    pub snippet: String,
}

/// Local SQLite page index plus its bookkeeping tables.
pub struct PageIndex {
    conn: Connection,
}

impl PageIndex {
    /// Open or create the database at `path`, creating the schema if absent.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path).map_err(|source| IndexError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, IndexError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// `(document key, marker etag)` pairs already recorded in `ocr_jobs`.
    pub fn known_markers(&self) -> Result<BTreeSet<(String, String)>, IndexError> {
        let mut stmt = self.conn.prepare("SELECT key, s3_ocr_etag FROM ocr_jobs")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn upsert_marker(&self, record: &MarkerRecord) -> Result<(), IndexError> {
        self.conn.execute(
            r#"INSERT INTO ocr_jobs (key, job_id, etag, s3_ocr_etag)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(key) DO UPDATE SET
                   job_id = excluded.job_id,
                   etag = excluded.etag,
                   s3_ocr_etag = excluded.s3_ocr_etag"#,
            params![record.key, record.job_id, record.etag, record.s3_ocr_etag],
        )?;
        Ok(())
    }

    /// Job ids referenced by at least one `ocr_jobs` row.
    pub fn referenced_jobs(&self) -> Result<BTreeSet<String>, IndexError> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT job_id FROM ocr_jobs")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Document keys whose marker points at `job_id`, sorted.
    pub fn keys_for_job(&self, job_id: &str) -> Result<Vec<String>, IndexError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM ocr_jobs WHERE job_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![job_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn fetched_jobs(&self) -> Result<BTreeSet<String>, IndexError> {
        let mut stmt = self.conn.prepare("SELECT job_id FROM fetched_jobs")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Replace the page rows of every document in `documents` atomically.
    ///
    /// Each document's previous rows are deleted first so a job with fewer
    /// pages than its predecessor leaves no stale pages behind.
    pub fn replace_pages(&mut self, documents: &[(String, Vec<PageRow>)]) -> Result<usize, IndexError> {
        let tx = self.conn.transaction()?;
        let mut written = 0_usize;
        {
            let mut delete = tx.prepare("DELETE FROM pages WHERE path = ?1")?;
            let mut upsert = tx.prepare(
                r#"INSERT INTO pages (path, page, folder, text)
                   VALUES (?1, ?2, ?3, ?4)
                   ON CONFLICT(path, page) DO UPDATE SET
                       folder = excluded.folder,
                       text = excluded.text"#,
            )?;
            for (path, rows) in documents {
                delete.execute(params![path])?;
                for row in rows {
                    debug_assert_eq!(&row.path, path);
                    upsert.execute(params![row.path, row.page, row.folder, row.text])?;
                    written = written.saturating_add(1);
                }
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Record `job_id` as fully indexed. Call only after its pages committed.
    pub fn mark_fetched(&self, job_id: &str) -> Result<(), IndexError> {
        self.conn.execute(
            "INSERT INTO fetched_jobs (job_id) VALUES (?1) ON CONFLICT(job_id) DO NOTHING",
            params![job_id],
        )?;
        Ok(())
    }

    /// Every page row ordered by `(path, page)`.
    pub fn pages(&self) -> Result<Vec<PageRow>, IndexError> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, page, folder, text FROM pages ORDER BY path, page")?;
        let rows = stmt.query_map([], |row| {
            Ok(PageRow {
                path: row.get(0)?,
                page: row.get(1)?,
                folder: row.get(2)?,
                text: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Full-text search over page text, best matches first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, IndexError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            r#"SELECT pages.path, pages.page,
                      snippet(pages_fts, 0, '[', ']', '...', 12)
               FROM pages_fts
               JOIN pages ON pages.rowid = pages_fts.rowid
               WHERE pages_fts MATCH ?1
               ORDER BY rank
               LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(params![query, limit], |row| {
            Ok(SearchHit {
                path: row.get(0)?,
                page: row.get(1)?,
                snippet: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(path: &str, page: u32, text: &str) -> PageRow {
        PageRow {
            path: path.into(),
            page,
            folder: crate::pipeline::merge::folder_of(path).into(),
            text: text.into(),
        }
    }

    fn marker(key: &str, job: &str, marker_etag: &str) -> MarkerRecord {
        MarkerRecord {
            key: key.into(),
            job_id: job.into(),
            etag: "\"src\"".into(),
            s3_ocr_etag: marker_etag.into(),
        }
    }

    #[test]
    fn schema_is_created_once_and_reopenable() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        {
            let index = PageIndex::open(&path).unwrap();
            index.upsert_marker(&marker("a.pdf", "J1", "m1")).unwrap();
        }
        let index = PageIndex::open(&path).unwrap();
        assert_eq!(index.keys_for_job("J1").unwrap(), vec!["a.pdf"]);
    }

    #[test]
    fn marker_upsert_overwrites_by_key() {
        let index = PageIndex::open_in_memory().unwrap();
        index.upsert_marker(&marker("a.pdf", "J1", "m1")).unwrap();
        index.upsert_marker(&marker("a.pdf", "J2", "m2")).unwrap();
        index.upsert_marker(&marker("b.pdf", "J2", "m3")).unwrap();
        assert_eq!(
            index.known_markers().unwrap(),
            [("a.pdf".to_string(), "m2".to_string()), ("b.pdf".to_string(), "m3".to_string())]
                .into_iter()
                .collect()
        );
        assert_eq!(index.keys_for_job("J2").unwrap(), vec!["a.pdf", "b.pdf"]);
        assert!(index.keys_for_job("J1").unwrap().is_empty());
    }

    #[test]
    fn replacing_pages_drops_stale_rows_and_updates_search() {
        let mut index = PageIndex::open_in_memory().unwrap();
        index
            .replace_pages(&[(
                "docs/a.pdf".into(),
                vec![row("docs/a.pdf", 1, "alpha bravo"), row("docs/a.pdf", 2, "charlie")],
            )])
            .unwrap();
        assert_eq!(index.search("charlie", 10).unwrap().len(), 1);

        index
            .replace_pages(&[("docs/a.pdf".into(), vec![row("docs/a.pdf", 1, "delta")])])
            .unwrap();
        let pages = index.pages().unwrap();
        assert_eq!(pages, vec![row("docs/a.pdf", 1, "delta")]);
        assert!(index.search("charlie", 10).unwrap().is_empty());

        let hits = index.search("delta", 10).unwrap();
        assert_eq!(hits[0].path, "docs/a.pdf");
        assert_eq!(hits[0].page, 1);
        assert!(hits[0].snippet.contains("[delta]"));
    }

    #[test]
    fn fetched_jobs_are_idempotent() {
        let index = PageIndex::open_in_memory().unwrap();
        index.mark_fetched("J1").unwrap();
        index.mark_fetched("J1").unwrap();
        assert_eq!(index.fetched_jobs().unwrap().len(), 1);
    }
}
