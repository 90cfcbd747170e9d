//! SQLite-backed storage implementation.
//!
//! Persists page heads and the revision log to a SQLite database. The
//! `pages.title` unique constraint and the `(page_id, sequence)` unique
//! index enforce at the storage layer what the write path checks
//! optimistically, so racing writers cannot leave duplicate titles or
//! duplicate sequence numbers behind.
//!
//! # Thread safety
//!
//! The connection is wrapped in a `Mutex` for thread-safe access. SQLite
//! itself runs in its default serialized threading mode.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, params};

use super::{PageStore, StoreResult};
use crate::error::BrambleError;
use crate::page::{NewRevision, Page, PageDraft, PageId, PageLock, Revision};

/// SQLite-backed page storage.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database for testing. Data is lost on drop.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            -- Mutable page heads
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                html TEXT NOT NULL,
                text TEXT NOT NULL,
                lock_expires_at INTEGER,
                lock_token INTEGER,
                refreshed_at INTEGER NOT NULL
            );

            -- Append-only revision log
            CREATE TABLE IF NOT EXISTS revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                page_id INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                summary TEXT NOT NULL,
                title_patch TEXT NOT NULL,
                content_patch TEXT NOT NULL,
                written_at INTEGER NOT NULL
            );

            -- Sequences are gap-free per page; the index keeps them unique
            CREATE UNIQUE INDEX IF NOT EXISTS idx_revisions_page_sequence
                ON revisions(page_id, sequence);
            "#,
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn page_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Page> {
    let expires: Option<i64> = row.get(5)?;
    let token: Option<i32> = row.get(6)?;
    let lock = match (expires, token) {
        (Some(expires_at), Some(token)) => Some(PageLock {
            expires_at: from_millis(expires_at),
            token,
        }),
        _ => None,
    };
    Ok(Page {
        id: PageId(row.get(0)?),
        title: row.get(1)?,
        content: row.get(2)?,
        html: row.get(3)?,
        text: row.get(4)?,
        lock,
        refreshed_at: from_millis(row.get(7)?),
    })
}

fn revision_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        page_id: PageId(row.get(0)?),
        sequence: row.get(1)?,
        summary: row.get(2)?,
        title_patch: row.get(3)?,
        content_patch: row.get(4)?,
        written_at: from_millis(row.get(5)?),
    })
}

const PAGE_COLUMNS: &str = "id, title, content, html, text, lock_expires_at, lock_token, refreshed_at";
const REVISION_COLUMNS: &str = "page_id, sequence, summary, title_patch, content_patch, written_at";

impl PageStore for SqliteStore {
    fn find_page_by_title(&self, title: &str) -> StoreResult<Option<Page>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE title = ?"),
            params![title],
            page_from_row,
        );
        match result {
            Ok(page) => Ok(Some(page)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BrambleError::Database(e)),
        }
    }

    fn find_page(&self, id: PageId) -> StoreResult<Option<Page>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?"),
            params![id.0],
            page_from_row,
        );
        match result {
            Ok(page) => Ok(Some(page)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BrambleError::Database(e)),
        }
    }

    fn create_page(&self, draft: &PageDraft, revision: &NewRevision) -> StoreResult<Option<Page>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO pages (title, content, html, text, refreshed_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                draft.title,
                draft.content,
                draft.html,
                draft.text,
                millis(draft.refreshed_at)
            ],
        );
        let page_id = match inserted {
            Ok(_) => tx.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => return Err(BrambleError::Database(e)),
        };

        tx.execute(
            "INSERT INTO revisions (page_id, sequence, summary, title_patch, content_patch, written_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                page_id,
                revision.sequence,
                revision.summary,
                revision.title_patch,
                revision.content_patch,
                millis(revision.written_at)
            ],
        )?;
        tx.commit()?;

        Ok(Some(Page {
            id: PageId(page_id),
            title: draft.title.clone(),
            content: draft.content.clone(),
            html: draft.html.clone(),
            text: draft.text.clone(),
            lock: None,
            refreshed_at: draft.refreshed_at,
        }))
    }

    fn page_count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn page_title_at(&self, offset: usize) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT title FROM pages ORDER BY id LIMIT 1 OFFSET ?",
            params![offset as i64],
            |row| row.get(0),
        );
        match result {
            Ok(title) => Ok(Some(title)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BrambleError::Database(e)),
        }
    }

    fn search_pages(&self, query: &str) -> StoreResult<Vec<Page>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PAGE_COLUMNS} FROM pages
             WHERE title LIKE '%' || ?1 || '%' OR text LIKE '%' || ?1 || '%'
             ORDER BY id"
        ))?;
        let pages = stmt
            .query_map(params![query], page_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pages)
    }

    fn acquire_lock(&self, id: PageId, lock: PageLock, now: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        // Conditional update: only a free or expired lock can be replaced.
        let changed = conn.execute(
            "UPDATE pages SET lock_expires_at = ?, lock_token = ?
             WHERE id = ? AND (lock_expires_at IS NULL OR lock_expires_at <= ?)",
            params![millis(lock.expires_at), lock.token, id.0, millis(now)],
        )?;
        Ok(changed == 1)
    }

    fn read_lock(&self, id: PageId) -> StoreResult<Option<PageLock>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT lock_expires_at, lock_token FROM pages WHERE id = ?",
            params![id.0],
            |row| {
                let expires: Option<i64> = row.get(0)?;
                let token: Option<i32> = row.get(1)?;
                Ok((expires, token))
            },
        );
        match result {
            Ok((Some(expires_at), Some(token))) => Ok(Some(PageLock {
                expires_at: from_millis(expires_at),
                token,
            })),
            Ok(_) | Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BrambleError::Database(e)),
        }
    }

    fn release_lock(&self, id: PageId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE pages SET lock_expires_at = NULL, lock_token = NULL WHERE id = ?",
            params![id.0],
        )?;
        Ok(())
    }

    fn commit_write(
        &self,
        id: PageId,
        draft: &PageDraft,
        revision: &NewRevision,
    ) -> StoreResult<Option<Revision>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE pages SET title = ?, content = ?, html = ?, text = ?,
                 refreshed_at = ?, lock_expires_at = NULL, lock_token = NULL
             WHERE id = ?",
            params![
                draft.title,
                draft.content,
                draft.html,
                draft.text,
                millis(draft.refreshed_at),
                id.0
            ],
        );
        match updated {
            Ok(1) => {}
            Ok(_) => return Ok(None),
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => return Err(BrambleError::Database(e)),
        }

        let appended = tx.execute(
            "INSERT INTO revisions (page_id, sequence, summary, title_patch, content_patch, written_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id.0,
                revision.sequence,
                revision.summary,
                revision.title_patch,
                revision.content_patch,
                millis(revision.written_at)
            ],
        );
        match appended {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => return Err(BrambleError::Database(e)),
        }
        tx.commit()?;

        Ok(Some(Revision {
            page_id: id,
            sequence: revision.sequence,
            summary: revision.summary.clone(),
            title_patch: revision.title_patch.clone(),
            content_patch: revision.content_patch.clone(),
            written_at: revision.written_at,
        }))
    }

    fn latest_revision(&self, id: PageId) -> StoreResult<Option<Revision>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!(
                "SELECT {REVISION_COLUMNS} FROM revisions
                 WHERE page_id = ? ORDER BY sequence DESC LIMIT 1"
            ),
            params![id.0],
            revision_from_row,
        );
        match result {
            Ok(rev) => Ok(Some(rev)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BrambleError::Database(e)),
        }
    }

    fn find_revision(&self, id: PageId, sequence: i64) -> StoreResult<Option<Revision>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!(
                "SELECT {REVISION_COLUMNS} FROM revisions
                 WHERE page_id = ? AND sequence = ?"
            ),
            params![id.0, sequence],
            revision_from_row,
        );
        match result {
            Ok(rev) => Ok(Some(rev)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BrambleError::Database(e)),
        }
    }

    fn revisions(&self, id: PageId) -> StoreResult<Vec<Revision>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REVISION_COLUMNS} FROM revisions
             WHERE page_id = ? ORDER BY sequence ASC"
        ))?;
        let revisions = stmt
            .query_map(params![id.0], revision_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(revisions)
    }

    fn revision_count(&self, id: PageId) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM revisions WHERE page_id = ?",
            params![id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn revisions_page(
        &self,
        id: PageId,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Revision>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REVISION_COLUMNS} FROM revisions
             WHERE page_id = ? ORDER BY sequence DESC LIMIT ? OFFSET ?"
        ))?;
        let revisions = stmt
            .query_map(params![id.0, limit as i64, offset as i64], revision_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(revisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn draft(title: &str, content: &str) -> PageDraft {
        PageDraft::new(title, content, now())
    }

    fn revision(sequence: i64) -> NewRevision {
        NewRevision::new(
            sequence,
            "edit",
            String::from("@@ -0,0 +1 @@\n+t\n"),
            String::new(),
            now(),
        )
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bramble.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .create_page(&draft("Alpha", "body"), &revision(1))
                .unwrap()
                .unwrap();
        }
        // Reopen and the page is still there.
        let store = SqliteStore::open(&path).unwrap();
        let page = store.find_page_by_title("Alpha").unwrap().unwrap();
        assert_eq!(page.content, "body");
        assert_eq!(store.revision_count(page.id).unwrap(), 1);
    }

    #[test]
    fn test_create_and_find() {
        let store = SqliteStore::in_memory().unwrap();
        let page = store
            .create_page(&draft("Alpha", "body"), &revision(1))
            .unwrap()
            .unwrap();
        assert_eq!(page.title, "Alpha");

        let found = store.find_page(page.id).unwrap().unwrap();
        assert_eq!(found.title, "Alpha");
        assert_eq!(found.refreshed_at, now());
        assert!(found.lock.is_none());
        assert!(store.find_page_by_title("Beta").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_title_rejected_by_constraint() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .create_page(&draft("Alpha", "one"), &revision(1))
            .unwrap()
            .unwrap();
        assert!(store
            .create_page(&draft("Alpha", "two"), &revision(1))
            .unwrap()
            .is_none());
        assert_eq!(store.page_count().unwrap(), 1);
    }

    #[test]
    fn test_lock_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let page = store
            .create_page(&draft("Alpha", "body"), &revision(1))
            .unwrap()
            .unwrap();

        let lock = PageLock {
            expires_at: now() + chrono::Duration::seconds(60),
            token: 1234,
        };
        assert!(store.acquire_lock(page.id, lock, now()).unwrap());
        assert_eq!(store.read_lock(page.id).unwrap().unwrap().token, 1234);

        // Second acquire loses while the first is unexpired.
        let rival = PageLock {
            expires_at: now() + chrono::Duration::seconds(60),
            token: 5678,
        };
        assert!(!store.acquire_lock(page.id, rival, now()).unwrap());

        // After expiry the rival wins.
        let later = now() + chrono::Duration::seconds(61);
        assert!(store.acquire_lock(page.id, rival, later).unwrap());
        assert_eq!(store.read_lock(page.id).unwrap().unwrap().token, 5678);

        store.release_lock(page.id).unwrap();
        assert!(store.read_lock(page.id).unwrap().is_none());
    }

    #[test]
    fn test_commit_write_is_atomic_unit() {
        let store = SqliteStore::in_memory().unwrap();
        let page = store
            .create_page(&draft("Alpha", "one"), &revision(1))
            .unwrap()
            .unwrap();
        let lock = PageLock {
            expires_at: now() + chrono::Duration::seconds(60),
            token: 1,
        };
        assert!(store.acquire_lock(page.id, lock, now()).unwrap());

        store
            .commit_write(page.id, &draft("Alpha Prime", "two"), &revision(2))
            .unwrap()
            .unwrap();

        let head = store.find_page(page.id).unwrap().unwrap();
        assert_eq!(head.title, "Alpha Prime");
        assert_eq!(head.content, "two");
        assert!(head.lock.is_none(), "commit clears the lock");
        assert_eq!(store.revision_count(page.id).unwrap(), 2);
    }

    #[test]
    fn test_commit_write_rejects_rename_collision() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .create_page(&draft("Alpha", "a"), &revision(1))
            .unwrap()
            .unwrap();
        let beta = store
            .create_page(&draft("Beta", "b"), &revision(1))
            .unwrap()
            .unwrap();

        assert!(store
            .commit_write(beta.id, &draft("Alpha", "b2"), &revision(2))
            .unwrap()
            .is_none());
        // The transaction rolled back: head and log untouched.
        let head = store.find_page(beta.id).unwrap().unwrap();
        assert_eq!(head.title, "Beta");
        assert_eq!(head.content, "b");
        assert_eq!(store.revision_count(beta.id).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_sequence_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let page = store
            .create_page(&draft("Alpha", "a"), &revision(1))
            .unwrap()
            .unwrap();
        // Appending sequence 1 again violates the unique index.
        assert!(store
            .commit_write(page.id, &draft("Alpha", "a2"), &revision(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_revision_queries() {
        let store = SqliteStore::in_memory().unwrap();
        let page = store
            .create_page(&draft("Alpha", "v1"), &revision(1))
            .unwrap()
            .unwrap();
        for seq in 2..=12 {
            store
                .commit_write(page.id, &draft("Alpha", "next"), &revision(seq))
                .unwrap()
                .unwrap();
        }

        assert_eq!(store.latest_revision(page.id).unwrap().unwrap().sequence, 12);
        assert_eq!(store.find_revision(page.id, 3).unwrap().unwrap().sequence, 3);
        assert!(store.find_revision(page.id, 44).unwrap().is_none());

        let asc = store.revisions(page.id).unwrap();
        assert_eq!(asc.len(), 12);
        assert!(asc.windows(2).all(|w| w[0].sequence + 1 == w[1].sequence));

        let newest = store.revisions_page(page.id, 0, 10).unwrap();
        assert_eq!(newest.first().map(|r| r.sequence), Some(12));
        assert_eq!(newest.len(), 10);
        let rest = store.revisions_page(page.id, 10, 10).unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_search_and_listing() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .create_page(&draft("Apple Pie", "sweet dessert"), &revision(1))
            .unwrap()
            .unwrap();
        store
            .create_page(&draft("Banana", "yellow fruit dessert"), &revision(1))
            .unwrap()
            .unwrap();

        assert_eq!(store.search_pages("Apple").unwrap().len(), 1);
        assert_eq!(store.search_pages("dessert").unwrap().len(), 2);
        assert!(store.search_pages("nope").unwrap().is_empty());

        assert_eq!(store.page_count().unwrap(), 2);
        assert_eq!(store.page_title_at(1).unwrap().unwrap(), "Banana");
        assert!(store.page_title_at(9).unwrap().is_none());
    }
}
