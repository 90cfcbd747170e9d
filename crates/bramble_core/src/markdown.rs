//! Markdown rendering and text extraction for page content.
//!
//! Canonical content is markdown. On every write the head record also gets
//! two derived fields: `html` for display and `text` for search. Rendering
//! expands `[[Title]]` wiki links into ordinary markdown links first, then
//! converts with comrak when the `markdown` feature is enabled, falling back
//! to a `<pre>` block without it.
//!
//! Raw HTML in page content is never passed through; comrak is configured to
//! escape it, and the fallback escapes everything.

use crate::page::TITLE_FORBIDDEN;

/// Escape the five HTML-significant characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Characters left literal by URI escaping, beyond ASCII alphanumerics.
const URI_UNESCAPED: &[char] = &[
    ';', ',', '/', '?', ':', '@', '&', '=', '+', '$', '-', '_', '.', '!', '~', '*', '\'', '(',
    ')', '#',
];

/// Percent-escape a string for use in a link href.
pub fn encode_uri(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut buf = [0u8; 4];
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || URI_UNESCAPED.contains(&c) {
            out.push(c);
        } else {
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    out
}

/// Expand `[[Title]]` wiki links into markdown links to `/wiki/<title>`.
///
/// Only titles made entirely of allowed characters link; anything else is
/// left as literal text.
pub fn expand_wiki_links(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' && i + 1 < chars.len() && chars[i + 1] == '[' {
            // Scan for the closing ]] with only allowed title chars between.
            let start = i + 2;
            let mut j = start;
            while j < chars.len() && !TITLE_FORBIDDEN.contains(&chars[j]) {
                j += 1;
            }
            if j + 1 < chars.len() && chars[j] == ']' && chars[j + 1] == ']' {
                let title: String = chars[start..j].iter().collect();
                out.push('[');
                out.push_str(&title);
                out.push_str("](/wiki/");
                out.push_str(&encode_uri(&title));
                out.push(')');
                i = j + 2;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Render page content to HTML: wiki links expanded, markdown converted.
pub fn render_html(content: &str) -> String {
    markdown_to_html(&expand_wiki_links(content))
}

#[cfg(feature = "markdown")]
fn markdown_to_html(markdown: &str) -> String {
    use comrak::{Options, markdown_to_html};

    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.render.escape = true; // Neutralize raw HTML in page content

    markdown_to_html(markdown, &options)
}

#[cfg(not(feature = "markdown"))]
fn markdown_to_html(markdown: &str) -> String {
    // Basic fallback without comrak
    format!("<pre>{}</pre>", escape_html(markdown))
}

/// Extract plain text from rendered HTML, for the search index.
///
/// Strips tags and decodes the entities the renderer produces.
pub fn extract_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(&out)
}

fn decode_entities(s: &str) -> String {
    // &amp; last, so "&amp;lt;" decodes to "&lt;" and no further
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"a\" & 'b'</b>"),
            "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_encode_uri() {
        assert_eq!(encode_uri("Alpha"), "Alpha");
        assert_eq!(encode_uri("two words"), "two%20words");
        assert_eq!(encode_uri("a&b=c/d"), "a&b=c/d");
        assert_eq!(encode_uri("caf\u{e9}"), "caf%C3%A9");
    }

    #[test]
    fn test_expand_wiki_links() {
        assert_eq!(
            expand_wiki_links("see [[Alpha]] for more"),
            "see [Alpha](/wiki/Alpha) for more"
        );
        assert_eq!(
            expand_wiki_links("[[Two Words]]"),
            "[Two Words](/wiki/Two%20Words)"
        );
        // Forbidden characters inside the brackets stop the match
        assert_eq!(expand_wiki_links("[[a/b]]"), "[[a/b]]");
        // Unterminated link stays literal
        assert_eq!(expand_wiki_links("[[Alpha"), "[[Alpha");
        assert_eq!(expand_wiki_links("no links"), "no links");
    }

    #[test]
    fn test_extract_text() {
        assert_eq!(extract_text("<p>hello <em>world</em></p>"), "hello world");
        assert_eq!(extract_text("a &amp; b"), "a & b");
        assert_eq!(extract_text("&lt;kbd&gt;"), "<kbd>");
    }

    #[cfg(feature = "markdown")]
    #[test]
    fn test_render_html_markdown() {
        let html = render_html("# Title\n\nbody with [[Alpha]]");
        assert!(html.contains("<h1>"));
        assert!(html.contains("href=\"/wiki/Alpha\""));
    }

    #[cfg(feature = "markdown")]
    #[test]
    fn test_render_html_escapes_raw_html() {
        let html = render_html("before <script>alert(1)</script> after");
        assert!(!html.contains("<script>"));
    }

    #[cfg(not(feature = "markdown"))]
    #[test]
    fn test_render_html_fallback() {
        let html = render_html("a < b");
        assert!(html.starts_with("<pre>"));
        assert!(html.contains("a &lt; b"));
    }
}
