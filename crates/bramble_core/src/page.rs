//! Page and revision data types.
//!
//! A [`Page`] is the mutable head record of one document: its canonical
//! title and content plus the derived HTML/text and the optional edit lock.
//! A [`Revision`] is one immutable entry in the page's patch chain. The two
//! are related only through [`PageId`]; revisions never reference the head
//! and the head never embeds its revisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::markdown;

/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 50;

/// Maximum summary length in characters. Longer summaries are truncated.
pub const SUMMARY_MAX_CHARS: usize = 100;

/// Characters that may not appear in a page title.
///
/// The set doubles as the wiki-link boundary: `[[Title]]` only links titles
/// made of allowed characters.
pub const TITLE_FORBIDDEN: &[char] = &[
    '(', ')', '[', ']', '*', '_', '`', '/', '\\', '\n', '\r',
];

/// Storage-assigned identity of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub i64);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Edit lock fields, present on a page while a write is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLock {
    /// When the lock lapses. Expired locks are reclaimed by the next
    /// acquirer; nothing sweeps them in the background.
    pub expires_at: DateTime<Utc>,

    /// Random token identifying the acquirer within the lock window.
    pub token: i32,
}

impl PageLock {
    /// Whether the lock has lapsed as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Canonical current state of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Storage identity.
    pub id: PageId,

    /// Unique title. Validated against [`TITLE_FORBIDDEN`] and
    /// [`TITLE_MAX_CHARS`] on every write.
    pub title: String,

    /// Canonical markdown text.
    pub content: String,

    /// `content` rendered to HTML, with wiki links expanded.
    pub html: String,

    /// Plain text extracted from `html`, used by search.
    pub text: String,

    /// Edit lock, present while a write is in flight.
    pub lock: Option<PageLock>,

    /// Time of the last successful write.
    pub refreshed_at: DateTime<Utc>,
}

/// One immutable entry in a page's patch chain.
///
/// Both patches transform the previous reconstructed value into the value
/// canonical immediately after this revision; for sequence 1 the previous
/// value is the empty string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    /// Page this revision belongs to.
    pub page_id: PageId,

    /// 1-based position in the page's chain, strictly increasing, gap-free.
    pub sequence: i64,

    /// Short free-text label: `"create"`, `"edit"`, `"rehash(<n>)"`, or
    /// caller-supplied.
    pub summary: String,

    /// Serialized patch for the title, previous to new.
    pub title_patch: String,

    /// Serialized patch for the content, previous to new.
    pub content_patch: String,

    /// Creation time. Immutable, like everything else here.
    pub written_at: DateTime<Utc>,
}

/// Head fields for a page create or replace, with `html`/`text` derived
/// from the content.
#[derive(Debug, Clone)]
pub struct PageDraft {
    /// New canonical title.
    pub title: String,
    /// New canonical content.
    pub content: String,
    /// `content` rendered to HTML.
    pub html: String,
    /// Plain text extracted from `html`.
    pub text: String,
    /// Write timestamp.
    pub refreshed_at: DateTime<Utc>,
}

impl PageDraft {
    /// Build a draft, deriving the HTML and search text from `content`.
    pub fn new(title: impl Into<String>, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        let content = content.into();
        let html = markdown::render_html(&content);
        let text = markdown::extract_text(&html);
        Self {
            title: title.into(),
            content,
            html,
            text,
            refreshed_at: now,
        }
    }
}

/// Revision fields for an append, before storage assigns durability.
#[derive(Debug, Clone)]
pub struct NewRevision {
    /// 1-based position in the page's chain.
    pub sequence: i64,
    /// Short free-text label.
    pub summary: String,
    /// Serialized title patch.
    pub title_patch: String,
    /// Serialized content patch.
    pub content_patch: String,
    /// Creation time.
    pub written_at: DateTime<Utc>,
}

impl NewRevision {
    /// Build a revision record, capping the summary at [`SUMMARY_MAX_CHARS`].
    pub fn new(
        sequence: i64,
        summary: impl Into<String>,
        title_patch: String,
        content_patch: String,
        written_at: DateTime<Utc>,
    ) -> Self {
        let mut summary: String = summary.into();
        if summary.chars().count() > SUMMARY_MAX_CHARS {
            summary = summary.chars().take(SUMMARY_MAX_CHARS).collect();
        }
        Self {
            sequence,
            summary,
            title_patch,
            content_patch,
            written_at,
        }
    }
}

/// Whether `title` is acceptable as a page title.
pub fn title_is_valid(title: &str) -> bool {
    !title.is_empty()
        && title.chars().count() <= TITLE_MAX_CHARS
        && !title.chars().any(|c| TITLE_FORBIDDEN.contains(&c))
}

/// Strip forbidden characters and cap the length, yielding the nearest
/// valid form of `title`. Used to re-prompt after a rejected write.
pub fn clean_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !TITLE_FORBIDDEN.contains(c))
        .take(TITLE_MAX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_title_is_valid() {
        assert!(title_is_valid("Alpha"));
        assert!(title_is_valid("Alpha Beta 12!"));
        assert!(!title_is_valid(""));
        assert!(!title_is_valid("a/b"));
        assert!(!title_is_valid("a[b]"));
        assert!(!title_is_valid("a*b"));
        assert!(!title_is_valid("a_b"));
        assert!(!title_is_valid("a`b"));
        assert!(!title_is_valid("a\\b"));
        assert!(!title_is_valid("a\nb"));
        assert!(!title_is_valid(&"x".repeat(51)));
        assert!(title_is_valid(&"x".repeat(50)));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("a/b[c]"), "abc");
        assert_eq!(clean_title("plain"), "plain");
        assert_eq!(clean_title(&"y".repeat(60)).chars().count(), 50);
    }

    #[test]
    fn test_lock_expiry() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let lock = PageLock {
            expires_at: t0,
            token: 7,
        };
        assert!(!lock.is_expired(t0 - chrono::Duration::seconds(1)));
        assert!(lock.is_expired(t0));
        assert!(lock.is_expired(t0 + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_summary_truncation() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let rev = NewRevision::new(1, "s".repeat(200), String::new(), String::new(), t0);
        assert_eq!(rev.summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_draft_derives_html_and_text() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let draft = PageDraft::new("Alpha", "hello world", t0);
        assert!(draft.html.contains("hello world"));
        assert!(draft.text.contains("hello world"));
    }
}
