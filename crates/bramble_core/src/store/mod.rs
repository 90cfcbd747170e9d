//! Storage abstraction for pages and their revision logs.
//!
//! This module defines the [`PageStore`] trait which abstracts over storage
//! backends (SQLite, in-memory) for the mutable page head records and the
//! append-only revision log.
//!
//! # Storage model
//!
//! Two kinds of data, deliberately separated:
//! 1. **Page heads**: one mutable row per page holding the canonical
//!    title/content, the derived html/text, and the edit-lock fields.
//! 2. **Revision log**: immutable rows keyed by `(page id, sequence)`.
//!    Append-only; nothing ever updates or deletes a revision.
//!
//! # Contract
//!
//! - Title uniqueness is enforced here: [`PageStore::create_page`] and
//!   [`PageStore::commit_write`] return `None` instead of violating it.
//! - [`PageStore::commit_write`] applies the revision append, the head
//!   replacement, and the lock clear as one atomic unit. No reader may
//!   observe one without the others.
//! - [`PageStore::acquire_lock`] is a single conditional update: it
//!   succeeds only if the page is unlocked or its lock has expired, and two
//!   simultaneous acquirers cannot both succeed.

use chrono::{DateTime, Utc};

use crate::page::{NewRevision, Page, PageDraft, PageId, PageLock, Revision};

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Result type for store operations.
pub type StoreResult<T> = crate::error::Result<T>;

/// Trait for page and revision storage backends.
pub trait PageStore: Send + Sync {
    /// Look up a page head by exact title.
    fn find_page_by_title(&self, title: &str) -> StoreResult<Option<Page>>;

    /// Look up a page head by id.
    fn find_page(&self, id: PageId) -> StoreResult<Option<Page>>;

    /// Create a page together with its first revision, atomically.
    ///
    /// Returns `None` if a page with the draft's title already exists; the
    /// uniqueness check happens inside the backend's atomic unit, so two
    /// concurrent creations of one title cannot both succeed.
    fn create_page(&self, draft: &PageDraft, revision: &NewRevision) -> StoreResult<Option<Page>>;

    /// Number of pages.
    fn page_count(&self) -> StoreResult<usize>;

    /// Title of the page at `offset` in id order, for random selection.
    fn page_title_at(&self, offset: usize) -> StoreResult<Option<String>>;

    /// Pages whose title or extracted text contains `query`, in id order.
    fn search_pages(&self, query: &str) -> StoreResult<Vec<Page>>;

    /// Stake an edit lock: set `lock` on the page only if it is unlocked or
    /// its current lock has expired as of `now`. Returns whether the lock
    /// was taken. This is the atomic acquire step of the edit protocol.
    fn acquire_lock(&self, id: PageId, lock: PageLock, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Current lock fields of the page, if any.
    fn read_lock(&self, id: PageId) -> StoreResult<Option<PageLock>>;

    /// Clear the lock fields unconditionally.
    fn release_lock(&self, id: PageId) -> StoreResult<()>;

    /// The single mutation point of an edit: persist the revision, replace
    /// the head fields, and clear the lock, atomically.
    ///
    /// Returns `None` if the draft renames the page onto a title that
    /// already exists; nothing is committed in that case.
    fn commit_write(
        &self,
        id: PageId,
        draft: &PageDraft,
        revision: &NewRevision,
    ) -> StoreResult<Option<Revision>>;

    /// Highest-sequence revision of the page.
    fn latest_revision(&self, id: PageId) -> StoreResult<Option<Revision>>;

    /// Exact-sequence lookup.
    fn find_revision(&self, id: PageId, sequence: i64) -> StoreResult<Option<Revision>>;

    /// All revisions of the page, ascending by sequence, for replay.
    fn revisions(&self, id: PageId) -> StoreResult<Vec<Revision>>;

    /// Number of revisions of the page.
    fn revision_count(&self, id: PageId) -> StoreResult<usize>;

    /// A window of revisions, descending by sequence, for display.
    fn revisions_page(
        &self,
        id: PageId,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Revision>>;
}
