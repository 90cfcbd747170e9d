//! Patch model, textual wire format, and exact-offset application.
//!
//! A [`Patch`] is an ordered list of [`Hunk`]s assembled from an edit
//! script. The serialized form is the one stable wire format this crate
//! defines; stored history must stay replayable across versions, so any
//! change here has to remain able to read existing patch text.
//!
//! Format, per hunk:
//!
//! ```text
//! @@ -S1,L1 +S2,L2 @@
//!  context span
//! -deleted span
//! +inserted span
//! ```
//!
//! Offsets and lengths count Unicode scalar values. A start prints 1-based
//! when its length is at least 1, drops the `,L` part when the length is
//! exactly 1, and prints the 0-based offset with `,0` for an empty range.
//! Span text is escaped reversibly: `%` and control characters become
//! `%XX` (uppercase hex); everything else is literal, so a span never
//! contains a real newline.
//!
//! Application is exact-offset only: every hunk's expected old text must
//! match the base at the recorded position. Patches are always replayed
//! against the exact predecessor text they were computed from, so there is
//! no fuzzy matching.

use std::fmt;

use super::diff::{self, Edit, EditKind};
use crate::error::{BrambleError, Result};

/// Context chars carried on each side of a hunk.
const PATCH_MARGIN: usize = 4;

/// One localized group of edits within a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// Char offset of the hunk in the old text.
    pub old_start: usize,
    /// Chars of old text the hunk covers (context + deletions).
    pub old_len: usize,
    /// Char offset of the hunk in the new text.
    pub new_start: usize,
    /// Chars of new text the hunk covers (context + insertions).
    pub new_len: usize,
    /// The hunk's spans, in order.
    pub spans: Vec<Edit>,
}

/// A serializable set of edits transforming one text into another.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Patch {
    /// Hunks in ascending old-text order.
    pub hunks: Vec<Hunk>,
}

impl Patch {
    /// Compute the patch transforming `old` into `new`.
    pub fn diff(old: &str, new: &str) -> Patch {
        let edits = diff::diff(old, new);
        Patch {
            hunks: make_hunks(&edits),
        }
    }

    /// Whether the patch changes anything.
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Serialize to the stable wire format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for hunk in &self.hunks {
            out.push_str(&format!(
                "@@ -{} +{} @@\n",
                coord(hunk.old_start, hunk.old_len),
                coord(hunk.new_start, hunk.new_len),
            ));
            for span in &hunk.spans {
                out.push(match span.kind {
                    EditKind::Equal => ' ',
                    EditKind::Delete => '-',
                    EditKind::Insert => '+',
                });
                out.push_str(&escape_span(&span.text));
                out.push('\n');
            }
        }
        out
    }

    /// Parse the wire format back into a patch.
    ///
    /// Validates that every hunk's span lengths agree with its header, so a
    /// truncated or hand-damaged patch fails here rather than misapplying.
    pub fn parse(text: &str) -> Result<Patch> {
        let mut hunks = Vec::new();
        let mut current: Option<Hunk> = None;

        for line in text.lines() {
            if let Some(header) = line.strip_prefix("@@ -") {
                if let Some(hunk) = current.take() {
                    hunks.push(validate_hunk(hunk)?);
                }
                let header = header
                    .strip_suffix(" @@")
                    .ok_or_else(|| BrambleError::PatchFormat(format!("bad header: {line}")))?;
                let (old, new) = header
                    .split_once(" +")
                    .ok_or_else(|| BrambleError::PatchFormat(format!("bad header: {line}")))?;
                let (old_start, old_len) = parse_coord(old)?;
                let (new_start, new_len) = parse_coord(new)?;
                current = Some(Hunk {
                    old_start,
                    old_len,
                    new_start,
                    new_len,
                    spans: Vec::new(),
                });
                continue;
            }

            let hunk = current
                .as_mut()
                .ok_or_else(|| BrambleError::PatchFormat(format!("span before header: {line}")))?;
            let mut chars = line.chars();
            let kind = match chars.next() {
                Some(' ') => EditKind::Equal,
                Some('-') => EditKind::Delete,
                Some('+') => EditKind::Insert,
                _ => {
                    return Err(BrambleError::PatchFormat(format!("bad span line: {line}")));
                }
            };
            hunk.spans.push(Edit::new(kind, unescape_span(chars.as_str())?));
        }

        if let Some(hunk) = current.take() {
            hunks.push(validate_hunk(hunk)?);
        }
        Ok(Patch { hunks })
    }

    /// Apply the patch to `base`, producing the new text.
    ///
    /// Exact-offset: the base must be the same text the patch was computed
    /// against. Any mismatch is corrupted history, reported as
    /// [`BrambleError::PatchApply`].
    pub fn apply(&self, base: &str) -> Result<String> {
        let base_chars: Vec<char> = base.chars().collect();
        let mut out = String::with_capacity(base.len());
        let mut pos = 0usize;

        for hunk in &self.hunks {
            if hunk.old_start < pos {
                return Err(BrambleError::PatchApply(format!(
                    "hunk at {} overlaps previous hunk",
                    hunk.old_start
                )));
            }
            let end = hunk.old_start + hunk.old_len;
            if end > base_chars.len() {
                return Err(BrambleError::PatchApply(format!(
                    "hunk {}..{} exceeds base length {}",
                    hunk.old_start,
                    end,
                    base_chars.len()
                )));
            }

            out.extend(&base_chars[pos..hunk.old_start]);
            let mut cursor = hunk.old_start;
            for span in &hunk.spans {
                match span.kind {
                    EditKind::Equal | EditKind::Delete => {
                        let len = span.text.chars().count();
                        let actual: String = base_chars[cursor..cursor + len].iter().collect();
                        if actual != span.text {
                            return Err(BrambleError::PatchApply(format!(
                                "base text mismatch at {cursor}"
                            )));
                        }
                        if span.kind == EditKind::Equal {
                            out.push_str(&span.text);
                        }
                        cursor += len;
                    }
                    EditKind::Insert => out.push_str(&span.text),
                }
            }
            // validate_hunk pinned span sums to the header, so cursor == end
            pos = cursor;
        }

        out.extend(&base_chars[pos..]);
        Ok(out)
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn validate_hunk(hunk: Hunk) -> Result<Hunk> {
    if hunk.spans.is_empty() {
        return Err(BrambleError::PatchFormat("hunk with no spans".into()));
    }
    let old_sum: usize = hunk
        .spans
        .iter()
        .filter(|s| s.kind != EditKind::Insert)
        .map(|s| s.text.chars().count())
        .sum();
    let new_sum: usize = hunk
        .spans
        .iter()
        .filter(|s| s.kind != EditKind::Delete)
        .map(|s| s.text.chars().count())
        .sum();
    if old_sum != hunk.old_len || new_sum != hunk.new_len {
        return Err(BrambleError::PatchFormat(format!(
            "hunk spans sum to {}/{} but header says {}/{}",
            old_sum, new_sum, hunk.old_len, hunk.new_len
        )));
    }
    Ok(hunk)
}

/// Group an edit script into hunks with [`PATCH_MARGIN`] chars of context.
fn make_hunks(edits: &[Edit]) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut open: Option<Hunk> = None;
    let mut old_pos = 0usize;
    let mut new_pos = 0usize;

    for (idx, edit) in edits.iter().enumerate() {
        let len = edit.text.chars().count();
        match edit.kind {
            EditKind::Equal => {
                if let Some(mut hunk) = open.take() {
                    if len <= 2 * PATCH_MARGIN && idx + 1 < edits.len() {
                        // Small equality: keep the hunk going through it.
                        hunk.old_len += len;
                        hunk.new_len += len;
                        hunk.spans.push(edit.clone());
                        open = Some(hunk);
                    } else {
                        let ctx = first_chars(&edit.text, PATCH_MARGIN);
                        if !ctx.is_empty() {
                            let ctx_len = ctx.chars().count();
                            hunk.old_len += ctx_len;
                            hunk.new_len += ctx_len;
                            hunk.spans.push(Edit::new(EditKind::Equal, ctx));
                        }
                        hunks.push(hunk);
                    }
                }
                old_pos += len;
                new_pos += len;
            }
            EditKind::Delete | EditKind::Insert => {
                let hunk = open.get_or_insert_with(|| {
                    // Leading context comes from the preceding equality.
                    let ctx = match idx.checked_sub(1).map(|i| &edits[i]) {
                        Some(prev) if prev.kind == EditKind::Equal => {
                            last_chars(&prev.text, PATCH_MARGIN)
                        }
                        _ => String::new(),
                    };
                    let ctx_len = ctx.chars().count();
                    let mut spans = Vec::new();
                    if ctx_len > 0 {
                        spans.push(Edit::new(EditKind::Equal, ctx));
                    }
                    Hunk {
                        old_start: old_pos - ctx_len,
                        old_len: ctx_len,
                        new_start: new_pos - ctx_len,
                        new_len: ctx_len,
                        spans,
                    }
                });
                hunk.spans.push(edit.clone());
                if edit.kind == EditKind::Delete {
                    hunk.old_len += len;
                    old_pos += len;
                } else {
                    hunk.new_len += len;
                    new_pos += len;
                }
            }
        }
    }

    if let Some(hunk) = open.take() {
        hunks.push(hunk);
    }
    hunks
}

fn first_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn last_chars(s: &str, n: usize) -> String {
    let total = s.chars().count();
    s.chars().skip(total.saturating_sub(n)).collect()
}

fn coord(start: usize, len: usize) -> String {
    if len == 0 {
        format!("{start},0")
    } else if len == 1 {
        format!("{}", start + 1)
    } else {
        format!("{},{}", start + 1, len)
    }
}

fn parse_coord(s: &str) -> Result<(usize, usize)> {
    let bad = || BrambleError::PatchFormat(format!("bad coordinates: {s}"));
    match s.split_once(',') {
        Some((start, len)) => {
            let start: usize = start.parse().map_err(|_| bad())?;
            let len: usize = len.parse().map_err(|_| bad())?;
            if len == 0 {
                Ok((start, 0))
            } else {
                // 1-based on the wire when the range is non-empty
                Ok((start.checked_sub(1).ok_or_else(bad)?, len))
            }
        }
        None => {
            let start: usize = s.parse().map_err(|_| bad())?;
            Ok((start.checked_sub(1).ok_or_else(bad)?, 1))
        }
    }
}

fn escape_span(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '%' || (c as u32) < 0x20 {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_span(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let hi = chars.next();
        let lo = chars.next();
        let byte = match (hi, lo) {
            (Some(hi), Some(lo)) => {
                u8::from_str_radix(&format!("{hi}{lo}"), 16).map_err(|_| {
                    BrambleError::PatchFormat(format!("bad escape %{hi}{lo}"))
                })?
            }
            _ => {
                return Err(BrambleError::PatchFormat("truncated escape".into()));
            }
        };
        out.push(char::from(byte));
    }
    Ok(out)
}
