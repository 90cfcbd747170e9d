use thiserror::Error;

/// Unified error type for bramble operations.
///
/// These are infrastructure and data-integrity failures. Expected outcomes
/// such as "no such page" are `Option` returns, and edit conflicts are
/// [`WriteError`], so anything surfacing here is worth logging.
#[derive(Debug, Error)]
pub enum BrambleError {
    /// A stored patch could not be parsed. Patches are only ever produced by
    /// this crate, so this indicates corrupted history.
    #[error("malformed patch text: {0}")]
    PatchFormat(String),

    /// A parsed patch did not fit the text it was applied to. Patches are
    /// always replayed against their exact predecessor text, so this
    /// indicates corrupted history.
    #[error("patch does not apply: {0}")]
    PatchApply(String),

    /// Database errors from the SQLite store.
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for bramble operations.
pub type Result<T> = std::result::Result<T, BrambleError>;

/// Expected failure modes of the write path.
///
/// These are control-flow outcomes, not faults: the caller is expected to
/// surface them as "edit rejected, retry as a new submission".
#[derive(Debug, Error)]
pub enum WriteError {
    /// A page with the requested title already exists.
    #[error("a page titled '{0}' already exists")]
    TitleDuplicate(String),

    /// Another writer holds an unexpired edit lock on the page.
    #[error("page is locked by another writer")]
    PageLocked,

    /// The requested title contains forbidden characters or is too long.
    /// `cleaned` is the nearest valid title, for re-prompting.
    #[error("title is not valid; nearest valid form is '{cleaned}'")]
    InvalidTitle {
        /// The title with forbidden characters stripped and length capped.
        cleaned: String,
    },

    /// The storage layer failed mid-write. Nothing was committed.
    #[error(transparent)]
    Store(#[from] BrambleError),
}
