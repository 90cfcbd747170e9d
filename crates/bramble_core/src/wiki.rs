//! The wiki facade: the write path, history browsing, revert, diff
//! display, search, and random page selection over a [`PageStore`].
//!
//! The write path is the one place all the pieces meet: title validation,
//! the uniqueness check, the edit-lock protocol, patch computation, and the
//! atomic commit. Everything else here is read-only plumbing over the
//! store.

use std::sync::Arc;

use crate::error::{Result, WriteError};
use crate::history::{self, HistoryPage};
use crate::lock::{self, Clock, RandomSource, SystemClock, ThreadRngSource};
use crate::page::{self, Page, PageDraft};
use crate::patch::render_markup;
use crate::store::PageStore;

/// Pages shown per search result page.
pub const SEARCH_PAGE_SIZE: usize = 10;

/// A revision rendered for display: insertions and deletions marked up.
#[derive(Debug, Clone)]
pub struct RevisionDiff {
    /// The revision's sequence number.
    pub sequence: i64,
    /// The revision's summary.
    pub summary: String,
    /// Annotated title patch.
    pub title_markup: String,
    /// Annotated content patch.
    pub content_markup: String,
}

/// One display page of search results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// The trimmed query.
    pub query: String,
    /// The window of matching pages.
    pub pages: Vec<Page>,
    /// 1-based result page number.
    pub current: usize,
    /// Last result page number; 0 when nothing matched.
    pub last: usize,
}

/// The revision engine's outermost surface.
///
/// Holds the store plus the injected clock and randomness. All state lives
/// in the store; the facade itself can be rebuilt per request.
pub struct Wiki {
    store: Arc<dyn PageStore>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl Wiki {
    /// A wiki over `store` with the wall clock and thread-local RNG.
    pub fn new(store: Arc<dyn PageStore>) -> Self {
        Self::with_collaborators(store, Arc::new(SystemClock), Arc::new(ThreadRngSource))
    }

    /// A wiki with explicit time and randomness, for tests and embedders.
    pub fn with_collaborators(
        store: Arc<dyn PageStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            store,
            clock,
            random,
        }
    }

    /// The page with this exact title, if any.
    pub fn view(&self, title: &str) -> Result<Option<Page>> {
        self.store.find_page_by_title(title)
    }

    /// Create a brand-new page. Creation skips locking: there is nothing
    /// to race on until the head row exists.
    pub fn create_page(&self, title: &str, content: &str) -> std::result::Result<Page, WriteError> {
        self.create(title, content, "create")
    }

    fn create(
        &self,
        title: &str,
        content: &str,
        summary: &str,
    ) -> std::result::Result<Page, WriteError> {
        if !page::title_is_valid(title) {
            return Err(WriteError::InvalidTitle {
                cleaned: page::clean_title(title),
            });
        }
        let draft = PageDraft::new(title, content, self.clock.now());
        let first = history::initial_revision(&draft, summary);
        match self.store.create_page(&draft, &first)? {
            Some(page) => Ok(page),
            None => {
                log::debug!("create of '{title}' lost to an existing page");
                Err(WriteError::TitleDuplicate(title.to_string()))
            }
        }
    }

    /// Write a revision: create `new_title` if no page is stored under
    /// `title`, otherwise edit (and possibly rename) the existing page.
    ///
    /// The edit path is the full protocol: uniqueness check for renames,
    /// lock acquire and confirm, patch computation, and the atomic commit
    /// that replaces the head and clears the lock. On any conflict the
    /// whole edit fails; a conflicted writer's lock is left to expire.
    pub fn write(
        &self,
        title: &str,
        new_title: &str,
        content: &str,
        summary: Option<&str>,
    ) -> std::result::Result<Page, WriteError> {
        if !page::title_is_valid(new_title) {
            return Err(WriteError::InvalidTitle {
                cleaned: page::clean_title(new_title),
            });
        }

        if title != new_title && self.store.find_page_by_title(new_title)?.is_some() {
            return Err(WriteError::TitleDuplicate(new_title.to_string()));
        }

        let Some(current) = self.store.find_page_by_title(title)? else {
            return self.create(new_title, content, summary.unwrap_or("create"));
        };

        let claim = lock::try_acquire(
            self.store.as_ref(),
            current.id,
            self.clock.as_ref(),
            self.random.as_ref(),
        )?
        .ok_or(WriteError::PageLocked)?;
        if !lock::confirm(self.store.as_ref(), &claim)? {
            return Err(WriteError::PageLocked);
        }

        let draft = PageDraft::new(new_title, content, self.clock.now());
        let committed = history::append(
            self.store.as_ref(),
            &current,
            &draft,
            summary.unwrap_or("edit"),
        )?;
        match committed {
            Some(revision) => {
                log::debug!(
                    "page {} revised to sequence {}",
                    current.id,
                    revision.sequence
                );
                Ok(Page {
                    id: current.id,
                    title: draft.title,
                    content: draft.content,
                    html: draft.html,
                    text: draft.text,
                    lock: None,
                    refreshed_at: draft.refreshed_at,
                })
            }
            // Lost the rename race after the lock; the lock cools down.
            None => Err(WriteError::TitleDuplicate(new_title.to_string())),
        }
    }

    /// One display page of the revision log, newest first, or `None` for an
    /// unknown title.
    pub fn history(&self, title: &str, page_no: usize) -> Result<Option<HistoryPage>> {
        let Some(page) = self.store.find_page_by_title(title)? else {
            return Ok(None);
        };
        history::history_page(self.store.as_ref(), page.id, page_no).map(Some)
    }

    /// The page's `(title, content)` as of `sequence` ("back"). `None` for
    /// an unknown title or sequence. Transient: nothing is saved.
    pub fn reconstruct_at(&self, title: &str, sequence: i64) -> Result<Option<(String, String)>> {
        let Some(page) = self.store.find_page_by_title(title)? else {
            return Ok(None);
        };
        history::reconstruct(self.store.as_ref(), page.id, sequence)
    }

    /// Restore the state as of `sequence` by writing it back as a new
    /// revision with summary `rehash(<sequence>)`. A rehash is an ordinary
    /// edit: it follows the same uniqueness and lock rules, and revision
    /// `sequence` itself is untouched.
    pub fn rehash(
        &self,
        title: &str,
        sequence: i64,
    ) -> std::result::Result<Option<Page>, WriteError> {
        let Some((back_title, back_content)) = self.reconstruct_at(title, sequence)? else {
            return Ok(None);
        };
        self.write(
            title,
            &back_title,
            &back_content,
            Some(&format!("rehash({sequence})")),
        )
        .map(Some)
    }

    /// Render revision `sequence` for display, or `None` for an unknown
    /// title or sequence.
    pub fn render_diff(&self, title: &str, sequence: i64) -> Result<Option<RevisionDiff>> {
        let Some(page) = self.store.find_page_by_title(title)? else {
            return Ok(None);
        };
        let Some(revision) = self.store.find_revision(page.id, sequence)? else {
            return Ok(None);
        };
        Ok(Some(RevisionDiff {
            sequence: revision.sequence,
            summary: revision.summary.clone(),
            title_markup: render_markup(&revision.title_patch)?,
            content_markup: render_markup(&revision.content_patch)?,
        }))
    }

    /// Pages whose title or text contains the query, 10 per page.
    pub fn search(&self, query: &str, page_no: usize) -> Result<SearchPage> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchPage {
                query: String::new(),
                pages: Vec::new(),
                current: 1,
                last: 0,
            });
        }
        let hits = self.store.search_pages(query)?;
        let last = hits.len().div_ceil(SEARCH_PAGE_SIZE);
        let current = page_no.max(1);
        let pages = hits
            .into_iter()
            .skip((current - 1) * SEARCH_PAGE_SIZE)
            .take(SEARCH_PAGE_SIZE)
            .collect();
        Ok(SearchPage {
            query: query.to_string(),
            pages,
            current,
            last,
        })
    }

    /// A uniformly random page title, or `None` while the wiki is empty.
    pub fn random_title(&self) -> Result<Option<String>> {
        let count = self.store.page_count()?;
        if count == 0 {
            return Ok(None);
        }
        self.store.page_title_at(self.random.pick(count))
    }
}
