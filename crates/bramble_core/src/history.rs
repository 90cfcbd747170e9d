//! The append-only revision log and historical reconstruction.
//!
//! Every write appends one [`Revision`] holding title and content patches
//! against the page's previous canonical state. Replaying a prefix of the
//! log from empty strings reproduces the exact state as of any sequence
//! number; that replay is the algorithmic core behind both "back" (preview
//! a historical state) and "rehash" (write a historical state back as a
//! new revision).

use crate::error::Result;
use crate::page::{NewRevision, Page, PageDraft, PageId, Revision};
use crate::patch::Patch;
use crate::store::{PageStore, StoreResult};

/// Revisions shown per history page, newest first.
pub const HISTORY_PAGE_SIZE: usize = 10;

/// One display page of a revision log.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// The window of revisions, newest first.
    pub revisions: Vec<Revision>,
    /// The clamped 1-based page number this window is for.
    pub current: usize,
    /// The last page number.
    pub last: usize,
}

/// Build the first revision of a page: patches from the empty string to the
/// draft's title and content.
pub fn initial_revision(draft: &PageDraft, summary: &str) -> NewRevision {
    NewRevision::new(
        1,
        summary,
        Patch::diff("", &draft.title).to_text(),
        Patch::diff("", &draft.content).to_text(),
        draft.refreshed_at,
    )
}

/// Append a revision taking `page` to `draft`, atomically with the head
/// replacement. This is the single mutation point of the log.
///
/// The sequence is `latest + 1`, or 1 for an empty log. Returns `None` if
/// the draft renames the page onto an existing title (nothing committed).
pub fn append(
    store: &dyn PageStore,
    page: &Page,
    draft: &PageDraft,
    summary: &str,
) -> StoreResult<Option<Revision>> {
    let sequence = match store.latest_revision(page.id)? {
        Some(last) => last.sequence + 1,
        None => 1,
    };
    let revision = NewRevision::new(
        sequence,
        summary,
        Patch::diff(&page.title, &draft.title).to_text(),
        Patch::diff(&page.content, &draft.content).to_text(),
        draft.refreshed_at,
    );
    store.commit_write(page.id, draft, &revision)
}

/// Reconstruct the page's `(title, content)` as of `target` by replaying
/// revisions `1..=target` in order from empty strings.
///
/// Returns `None` when no revision with that sequence exists. Deterministic
/// and side-effect-free: the result depends only on the immutable log.
pub fn reconstruct(
    store: &dyn PageStore,
    page_id: PageId,
    target: i64,
) -> StoreResult<Option<(String, String)>> {
    if store.find_revision(page_id, target)?.is_none() {
        return Ok(None);
    }

    let mut title = String::new();
    let mut content = String::new();
    for revision in store.revisions(page_id)? {
        if revision.sequence > target {
            break;
        }
        title = replay_step(&title, &revision.title_patch, &revision)?;
        content = replay_step(&content, &revision.content_patch, &revision)?;
    }
    Ok(Some((title, content)))
}

fn replay_step(base: &str, patch_text: &str, revision: &Revision) -> Result<String> {
    Patch::parse(patch_text)
        .and_then(|patch| patch.apply(base))
        .inspect_err(|e| {
            log::warn!(
                "corrupted history for page {} at sequence {}: {e}",
                revision.page_id,
                revision.sequence
            );
        })
}

/// One display page of the revision log, newest first, with the page
/// number clamped into range the way the original pagination behaves.
pub fn history_page(
    store: &dyn PageStore,
    page_id: PageId,
    page_no: usize,
) -> StoreResult<HistoryPage> {
    let total = store.revision_count(page_id)?;
    let last = total.div_ceil(HISTORY_PAGE_SIZE).max(1);
    let current = page_no.clamp(1, last);
    let revisions = store.revisions_page(
        page_id,
        (current - 1) * HISTORY_PAGE_SIZE,
        HISTORY_PAGE_SIZE,
    )?;
    Ok(HistoryPage {
        revisions,
        current,
        last,
    })
}
