//! Human-readable rendering of stored patches.
//!
//! Turns serialized patch text into display markup: location headers are
//! dropped, span text is unescaped and then HTML-escaped, insertions are
//! wrapped in `<ins>` and deletions in `<del>`. Context passes through
//! untagged. Display only; reconstruction never goes through here.

use super::codec::Patch;
use super::diff::EditKind;
use crate::error::Result;
use crate::markdown::escape_html;

/// Render serialized patch text as annotated markup.
///
/// Fails with [`crate::error::BrambleError::PatchFormat`] if the stored
/// text is not a valid patch, which indicates corrupted history.
pub fn render_markup(patch_text: &str) -> Result<String> {
    let patch = Patch::parse(patch_text)?;
    let mut out = String::new();
    for (i, hunk) in patch.hunks.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for span in &hunk.spans {
            let text = escape_html(&span.text);
            match span.kind {
                EditKind::Equal => out.push_str(&text),
                EditKind::Delete => {
                    out.push_str("<del>");
                    out.push_str(&text);
                    out.push_str("</del>");
                }
                EditKind::Insert => {
                    out.push_str("<ins>");
                    out.push_str(&text);
                    out.push_str("</ins>");
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_insert_and_delete() {
        let patch = Patch::diff("The cat sat", "The dog sat");
        let markup = render_markup(&patch.to_text()).unwrap();
        assert_eq!(markup, "The <del>cat</del><ins>dog</ins> sat");
    }

    #[test]
    fn test_render_strips_headers() {
        let patch = Patch::diff("", "fresh page");
        let markup = render_markup(&patch.to_text()).unwrap();
        assert!(!markup.contains("@@"));
        assert_eq!(markup, "<ins>fresh page</ins>");
    }

    #[test]
    fn test_render_unescapes_then_html_escapes() {
        let patch = Patch::diff("", "a<b\nc&d");
        let markup = render_markup(&patch.to_text()).unwrap();
        assert_eq!(markup, "<ins>a&lt;b\nc&amp;d</ins>");
    }

    #[test]
    fn test_render_empty_patch() {
        assert_eq!(render_markup("").unwrap(), "");
    }

    #[test]
    fn test_render_rejects_malformed() {
        assert!(render_markup("@@ nope").is_err());
    }
}
