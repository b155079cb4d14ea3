//! Reflow: pages → continuous text or HTML, page boundaries kept.
//!
//! ## Plain text
//!
//! ```text
//! --- Page 1 ---
//! first line
//! second line
//! --- Page 2 ---
//! \--- Page 7 --- (a content line that looks like a marker, escaped)
//! ```
//!
//! Every line, markers included, ends in `\n`. A content line starting
//! with `--- Page ` or `\` gets one extra leading `\`, which is what lets
//! [`split_pages`] recover the exact pages.
//!
//! ## HTML
//!
//! A standalone document with one `<section class="page">` per page, a
//! "Page N of T" header, and one `<p>` per line.

use super::{Page, PaginationResult};
use crate::error::ConversionError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

const MARKER_PREFIX: &str = "--- Page ";

static RE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^--- Page (\d+) ---$").unwrap());

/// Output of [`reflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    PlainText,
    Html,
}

/// Document-level details for the HTML output.
#[derive(Debug, Clone, Default)]
pub struct ReflowOptions {
    /// `<title>` and heading. Default: "Converted document".
    pub title: Option<String>,
    /// Name of the file the pages came from, shown under the heading.
    pub source_name: Option<String>,
}

impl ReflowOptions {
    /// Options titled after `file_name` without its extension.
    pub fn for_source(file_name: &str) -> Self {
        let stem = std::path::Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            title: stem,
            source_name: Some(file_name.to_string()),
        }
    }
}

/// Reflow with default options.
pub fn reflow(result: &PaginationResult, kind: OutputKind) -> String {
    reflow_with(result, kind, &ReflowOptions::default())
}

/// Reflow `result` into one string. Deterministic.
pub fn reflow_with(result: &PaginationResult, kind: OutputKind, options: &ReflowOptions) -> String {
    match kind {
        OutputKind::PlainText => plain_text(result),
        OutputKind::Html => html(result, options),
    }
}

fn plain_text(result: &PaginationResult) -> String {
    let mut out = String::new();
    for page in result.pages() {
        let _ = writeln!(out, "{MARKER_PREFIX}{} ---", page.index());
        for line in page.lines() {
            if line.starts_with(MARKER_PREFIX) || line.starts_with('\\') {
                out.push('\\');
            }
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Parse [`OutputKind::PlainText`] output back into pages.
///
/// Source ranges of the returned pages index into `text` and cover each
/// page's content lines (marker excluded).
pub fn split_pages(text: &str) -> Result<PaginationResult, ConversionError> {
    let mut pages: Vec<Page> = Vec::new();
    let mut offset = 0;

    for raw in text.split_inclusive('\n') {
        let start = offset;
        offset += raw.len();
        let line = raw.strip_suffix('\n').unwrap_or(raw);

        if let Some(caps) = RE_MARKER.captures(line) {
            let n: usize = caps[1].parse().map_err(|_| invalid("page number out of range"))?;
            if n != pages.len() + 1 {
                return Err(invalid(&format!(
                    "expected page {}, found page {n}",
                    pages.len() + 1
                )));
            }
            pages.push(Page::new(n, Vec::new(), offset..offset));
            continue;
        }

        let page = pages
            .last_mut()
            .ok_or_else(|| invalid("text before the first page marker"))?;
        let content = line.strip_prefix('\\').unwrap_or(line);
        page.lines.push(content.to_string());
        page.source_range.end = start + line.len();
    }
    Ok(PaginationResult::from_pages(pages))
}

fn invalid(reason: &str) -> ConversionError {
    ConversionError::InvalidInput {
        reason: format!("not a paginated text document: {reason}"),
    }
}

const STYLE: &str = "\
body { font-family: Helvetica, Arial, sans-serif; max-width: 800px; margin: 40px auto; padding: 20px; background: #f5f5f5; }
.page { background: #fff; padding: 40px; margin-bottom: 30px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); border-radius: 8px; }
.page-number { color: #666; font-size: 14px; margin-bottom: 20px; padding-bottom: 10px; border-bottom: 2px solid #e0e0e0; }
.page p { margin: 0; line-height: 1.8; color: #333; white-space: pre-wrap; }";

fn html(result: &PaginationResult, options: &ReflowOptions) -> String {
    let title = escape_html(options.title.as_deref().unwrap_or("Converted document"));
    let total = result.total_pages();

    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    out.push_str("<meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n");
    let _ = writeln!(out, "<title>{title}</title>");
    let _ = writeln!(out, "<style>\n{STYLE}\n</style>");
    out.push_str("</head>\n<body>\n");
    let _ = writeln!(out, "<h1>{title}</h1>");
    if let Some(source) = &options.source_name {
        let _ = writeln!(
            out,
            "<p class=\"source\"><strong>Source:</strong> {}</p>",
            escape_html(source)
        );
    }
    let _ = writeln!(out, "<p class=\"total\"><strong>Total pages:</strong> {total}</p>");

    for page in result.pages() {
        let n = page.index();
        let _ = writeln!(out, "<section class=\"page\" data-page=\"{n}\">");
        let _ = writeln!(out, "<div class=\"page-number\">Page {n} of {total}</div>");
        for line in page.lines() {
            if line.trim().is_empty() {
                out.push_str("<p>&nbsp;</p>\n");
            } else {
                let _ = writeln!(out, "<p>{}</p>", escape_html(line));
            }
        }
        out.push_str("</section>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PaginationResult {
        PaginationResult::from_page_texts(["alpha\n\nbeta", "--- Page 9 ---\n\\path", ""])
    }

    #[test]
    fn plain_text_layout() {
        let text = reflow(&sample(), OutputKind::PlainText);
        assert_eq!(
            text,
            "--- Page 1 ---\nalpha\n\nbeta\n--- Page 2 ---\n\\--- Page 9 ---\n\\\\path\n--- Page 3 ---\n"
        );
    }

    #[test]
    fn split_pages_inverts_plain_text() {
        let original = sample();
        let text = reflow(&original, OutputKind::PlainText);
        let back = split_pages(&text).unwrap();
        assert_eq!(back.total_pages(), 3);
        for (a, b) in original.pages().iter().zip(back.pages()) {
            assert_eq!(a.index(), b.index());
            assert_eq!(a.lines(), b.lines());
        }
        assert_eq!(reflow(&back, OutputKind::PlainText), text);
    }

    #[test]
    fn split_pages_source_ranges_point_at_content() {
        let text = "--- Page 1 ---\none\ntwo\n--- Page 2 ---\nthree\n";
        let r = split_pages(text).unwrap();
        assert_eq!(&text[r.pages()[0].source_range()], "one\ntwo");
        assert_eq!(&text[r.pages()[1].source_range()], "three");
    }

    #[test]
    fn split_pages_rejects_garbage() {
        assert!(split_pages("no marker\n").is_err());
        assert!(split_pages("--- Page 2 ---\nx\n").is_err());
        assert!(split_pages("").unwrap().is_empty());
    }

    #[test]
    fn html_structure() {
        let options = ReflowOptions::for_source("notes <draft>.pdf");
        let html = reflow_with(&sample(), OutputKind::Html, &options);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>notes &lt;draft&gt;</title>"));
        assert!(html.contains("<section class=\"page\" data-page=\"2\">"));
        assert!(html.contains("Page 2 of 3"));
        assert!(html.contains("<p>alpha</p>\n<p>&nbsp;</p>\n<p>beta</p>"));
        assert_eq!(html.matches("<section").count(), 3);
    }

    #[test]
    fn reflow_is_deterministic() {
        let r = sample();
        assert_eq!(reflow(&r, OutputKind::Html), reflow(&r, OutputKind::Html));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#39;");
    }
}
