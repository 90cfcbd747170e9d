//! In-memory storage implementation for testing.
//!
//! A simple implementation of [`PageStore`] backed by `HashMap`s behind one
//! `RwLock`, for unit tests and development. The single lock makes
//! `create_page` and `commit_write` trivially atomic.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::{PageStore, StoreResult};
use crate::page::{NewRevision, Page, PageDraft, PageId, PageLock, Revision};

/// In-memory page storage for testing. Data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Page heads by id.
    pages: HashMap<i64, Page>,
    /// Revision logs by page id, ascending by sequence.
    revisions: HashMap<i64, Vec<Revision>>,
    /// Counter for assigning page ids.
    next_page_id: i64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryStore {
    fn find_page_by_title(&self, title: &str) -> StoreResult<Option<Page>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.pages.values().find(|p| p.title == title).cloned())
    }

    fn find_page(&self, id: PageId) -> StoreResult<Option<Page>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.pages.get(&id.0).cloned())
    }

    fn create_page(&self, draft: &PageDraft, revision: &NewRevision) -> StoreResult<Option<Page>> {
        let mut inner = self.inner.write().unwrap();
        if inner.pages.values().any(|p| p.title == draft.title) {
            return Ok(None);
        }
        inner.next_page_id += 1;
        let id = inner.next_page_id;
        let page = Page {
            id: PageId(id),
            title: draft.title.clone(),
            content: draft.content.clone(),
            html: draft.html.clone(),
            text: draft.text.clone(),
            lock: None,
            refreshed_at: draft.refreshed_at,
        };
        inner.pages.insert(id, page.clone());
        inner
            .revisions
            .entry(id)
            .or_default()
            .push(stored(PageId(id), revision));
        Ok(Some(page))
    }

    fn page_count(&self) -> StoreResult<usize> {
        let inner = self.inner.read().unwrap();
        Ok(inner.pages.len())
    }

    fn page_title_at(&self, offset: usize) -> StoreResult<Option<String>> {
        let inner = self.inner.read().unwrap();
        let mut ids: Vec<i64> = inner.pages.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids
            .get(offset)
            .and_then(|id| inner.pages.get(id))
            .map(|p| p.title.clone()))
    }

    fn search_pages(&self, query: &str) -> StoreResult<Vec<Page>> {
        let inner = self.inner.read().unwrap();
        let mut hits: Vec<Page> = inner
            .pages
            .values()
            .filter(|p| p.title.contains(query) || p.text.contains(query))
            .cloned()
            .collect();
        hits.sort_by_key(|p| p.id.0);
        Ok(hits)
    }

    fn acquire_lock(&self, id: PageId, lock: PageLock, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.write().unwrap();
        let Some(page) = inner.pages.get_mut(&id.0) else {
            return Ok(false);
        };
        match page.lock {
            Some(held) if !held.is_expired(now) => Ok(false),
            _ => {
                page.lock = Some(lock);
                Ok(true)
            }
        }
    }

    fn read_lock(&self, id: PageId) -> StoreResult<Option<PageLock>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.pages.get(&id.0).and_then(|p| p.lock))
    }

    fn release_lock(&self, id: PageId) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(page) = inner.pages.get_mut(&id.0) {
            page.lock = None;
        }
        Ok(())
    }

    fn commit_write(
        &self,
        id: PageId,
        draft: &PageDraft,
        revision: &NewRevision,
    ) -> StoreResult<Option<Revision>> {
        let mut inner = self.inner.write().unwrap();
        let renaming = inner
            .pages
            .get(&id.0)
            .is_some_and(|p| p.title != draft.title);
        if renaming
            && inner
                .pages
                .values()
                .any(|p| p.id != id && p.title == draft.title)
        {
            return Ok(None);
        }
        let Some(page) = inner.pages.get_mut(&id.0) else {
            return Ok(None);
        };
        page.title = draft.title.clone();
        page.content = draft.content.clone();
        page.html = draft.html.clone();
        page.text = draft.text.clone();
        page.refreshed_at = draft.refreshed_at;
        page.lock = None;

        let stored = stored(id, revision);
        inner.revisions.entry(id.0).or_default().push(stored.clone());
        Ok(Some(stored))
    }

    fn latest_revision(&self, id: PageId) -> StoreResult<Option<Revision>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .revisions
            .get(&id.0)
            .and_then(|revs| revs.last())
            .cloned())
    }

    fn find_revision(&self, id: PageId, sequence: i64) -> StoreResult<Option<Revision>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .revisions
            .get(&id.0)
            .and_then(|revs| revs.iter().find(|r| r.sequence == sequence))
            .cloned())
    }

    fn revisions(&self, id: PageId) -> StoreResult<Vec<Revision>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.revisions.get(&id.0).cloned().unwrap_or_default())
    }

    fn revision_count(&self, id: PageId) -> StoreResult<usize> {
        let inner = self.inner.read().unwrap();
        Ok(inner.revisions.get(&id.0).map_or(0, |revs| revs.len()))
    }

    fn revisions_page(
        &self,
        id: PageId,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Revision>> {
        let inner = self.inner.read().unwrap();
        let Some(revs) = inner.revisions.get(&id.0) else {
            return Ok(Vec::new());
        };
        Ok(revs.iter().rev().skip(offset).take(limit).cloned().collect())
    }
}

fn stored(page_id: PageId, revision: &NewRevision) -> Revision {
    Revision {
        page_id,
        sequence: revision.sequence,
        summary: revision.summary.clone(),
        title_patch: revision.title_patch.clone(),
        content_patch: revision.content_patch.clone(),
        written_at: revision.written_at,
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
        NewRevision::new(sequence, "edit", String::new(), String::new(), now())
    }

    #[test]
    fn test_create_and_find() {
        let store = MemoryStore::new();
        let page = store
            .create_page(&draft("Alpha", "body"), &revision(1))
            .unwrap()
            .unwrap();
        assert_eq!(page.title, "Alpha");
        assert!(page.lock.is_none());

        let by_title = store.find_page_by_title("Alpha").unwrap().unwrap();
        assert_eq!(by_title.id, page.id);
        assert!(store.find_page_by_title("Beta").unwrap().is_none());
        assert_eq!(store.revision_count(page.id).unwrap(), 1);
    }

    #[test]
    fn test_create_duplicate_title_rejected() {
        let store = MemoryStore::new();
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
    fn test_acquire_lock_is_exclusive() {
        let store = MemoryStore::new();
        let page = store
            .create_page(&draft("Alpha", "body"), &revision(1))
            .unwrap()
            .unwrap();
        let lock = PageLock {
            expires_at: now() + chrono::Duration::seconds(60),
            token: 1,
        };
        assert!(store.acquire_lock(page.id, lock, now()).unwrap());
        let second = PageLock {
            expires_at: now() + chrono::Duration::seconds(60),
            token: 2,
        };
        assert!(!store.acquire_lock(page.id, second, now()).unwrap());
        assert_eq!(store.read_lock(page.id).unwrap().unwrap().token, 1);
    }

    #[test]
    fn test_expired_lock_is_reclaimed() {
        let store = MemoryStore::new();
        let page = store
            .create_page(&draft("Alpha", "body"), &revision(1))
            .unwrap()
            .unwrap();
        let stale = PageLock {
            expires_at: now(),
            token: 1,
        };
        assert!(store.acquire_lock(page.id, stale, now() - chrono::Duration::seconds(90)).unwrap());
        // The stale lock has expired by `now`, so a new acquire wins.
        let fresh = PageLock {
            expires_at: now() + chrono::Duration::seconds(60),
            token: 2,
        };
        assert!(store.acquire_lock(page.id, fresh, now()).unwrap());
        assert_eq!(store.read_lock(page.id).unwrap().unwrap().token, 2);
    }

    #[test]
    fn test_commit_write_replaces_head_and_appends() {
        let store = MemoryStore::new();
        let page = store
            .create_page(&draft("Alpha", "one"), &revision(1))
            .unwrap()
            .unwrap();
        let lock = PageLock {
            expires_at: now() + chrono::Duration::seconds(60),
            token: 9,
        };
        assert!(store.acquire_lock(page.id, lock, now()).unwrap());

        let committed = store
            .commit_write(page.id, &draft("Alpha", "two"), &revision(2))
            .unwrap()
            .unwrap();
        assert_eq!(committed.sequence, 2);

        let head = store.find_page(page.id).unwrap().unwrap();
        assert_eq!(head.content, "two");
        assert!(head.lock.is_none(), "commit clears the lock");
        assert_eq!(store.revision_count(page.id).unwrap(), 2);
    }

    #[test]
    fn test_commit_write_rejects_rename_collision() {
        let store = MemoryStore::new();
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
        // Nothing committed.
        assert_eq!(store.find_page(beta.id).unwrap().unwrap().content, "b");
        assert_eq!(store.revision_count(beta.id).unwrap(), 1);
    }

    #[test]
    fn test_revision_queries() {
        let store = MemoryStore::new();
        let page = store
            .create_page(&draft("Alpha", "v1"), &revision(1))
            .unwrap()
            .unwrap();
        for seq in 2..=25 {
            store
                .commit_write(page.id, &draft("Alpha", "next"), &revision(seq))
                .unwrap()
                .unwrap();
        }

        assert_eq!(store.latest_revision(page.id).unwrap().unwrap().sequence, 25);
        assert_eq!(
            store.find_revision(page.id, 7).unwrap().unwrap().sequence,
            7
        );
        assert!(store.find_revision(page.id, 99).unwrap().is_none());

        let asc = store.revisions(page.id).unwrap();
        assert_eq!(asc.len(), 25);
        assert!(asc.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let newest = store.revisions_page(page.id, 0, 10).unwrap();
        assert_eq!(newest.len(), 10);
        assert_eq!(newest[0].sequence, 25);
        let third = store.revisions_page(page.id, 20, 10).unwrap();
        assert_eq!(third.len(), 5);
        assert_eq!(third[0].sequence, 5);
    }

    #[test]
    fn test_search_and_listing() {
        let store = MemoryStore::new();
        store
            .create_page(&draft("Apple Pie", "sweet dessert"), &revision(1))
            .unwrap()
            .unwrap();
        store
            .create_page(&draft("Banana", "yellow fruit dessert"), &revision(1))
            .unwrap()
            .unwrap();
        store
            .create_page(&draft("Carrot", "orange vegetable"), &revision(1))
            .unwrap()
            .unwrap();

        let by_title = store.search_pages("Apple").unwrap();
        assert_eq!(by_title.len(), 1);
        let by_text = store.search_pages("dessert").unwrap();
        assert_eq!(by_text.len(), 2);
        assert!(store.search_pages("nothing").unwrap().is_empty());

        assert_eq!(store.page_count().unwrap(), 3);
        assert_eq!(store.page_title_at(0).unwrap().unwrap(), "Apple Pie");
        assert_eq!(store.page_title_at(2).unwrap().unwrap(), "Carrot");
        assert!(store.page_title_at(3).unwrap().is_none());
    }
}
