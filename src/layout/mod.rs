//! Pagination: flowing text → fixed-size pages.
//!
//! ## Algorithm
//!
//! 1. Split the text into logical lines on `\n` (a trailing `\r` is
//!    dropped). Blank lines are kept, one slot each.
//! 2. Greedy word wrap of each logical line against the content width
//!    `page_width − 2·margin`, measured with a [`TextMeasurer`]. The first
//!    sub-line keeps the line's indentation; a word wider than the content
//!    width is broken at character boundaries.
//! 3. Stack sub-lines from the top of the content area. A new page starts
//!    when the next line's bottom edge would pass `page_height − margin`,
//!    i.e. every page holds
//!    `max(1, ⌊(page_height − margin) / line_height⌋)` lines.
//!
//! Each [`Page`] remembers the byte range of the source text it came from.
//! Joining every page's lines with `\n` reproduces the source whenever no
//! line had to be wrapped.
//!
//! [`paginate`] is synchronous and pure apart from progress events.
//! [`paginate_cooperative`] runs the same engine but yields to the Tokio
//! scheduler every [`YIELD_EVERY_LINES`] logical lines.

pub mod measure;
pub mod reflow;

pub use measure::{HelveticaMetrics, MonospaceMetrics, TextMeasurer};
pub use reflow::{reflow, reflow_with, split_pages, OutputKind, ReflowOptions};

use crate::error::ConversionError;
use crate::progress::ProgressReporter;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A progress event is emitted at least this often, in logical lines.
pub const PROGRESS_EVERY_LINES: usize = 50;

/// [`paginate_cooperative`] yields this often, in logical lines.
pub const YIELD_EVERY_LINES: usize = 200;

/// Slack for float rounding in width and height comparisons.
const EPSILON: f32 = 1e-3;

/// Page size and text metrics, in PDF points (1/72 in).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub line_height: f32,
    pub font_size: f32,
}

impl PageGeometry {
    const MM: f32 = 72.0 / 25.4;

    /// A4 portrait, 15 mm margins, 7 mm line pitch, 11 pt text.
    pub fn a4() -> Self {
        Self {
            page_width: 595.28,
            page_height: 841.89,
            margin: 15.0 * Self::MM,
            line_height: 7.0 * Self::MM,
            font_size: 11.0,
        }
    }

    /// US Letter portrait with the same margins and metrics as [`a4`](Self::a4).
    pub fn letter() -> Self {
        Self {
            page_width: 612.0,
            page_height: 792.0,
            ..Self::a4()
        }
    }

    pub fn content_width(&self) -> f32 {
        self.page_width - 2.0 * self.margin
    }

    /// Lines that fit on one page (never less than one).
    pub fn lines_per_page(&self) -> usize {
        let fit = ((self.page_height - self.margin) / self.line_height + EPSILON).floor();
        if fit.is_finite() && fit >= 1.0 {
            fit as usize
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<(), ConversionError> {
        let fields = [
            ("page_width", self.page_width),
            ("page_height", self.page_height),
            ("margin", self.margin),
            ("line_height", self.line_height),
            ("font_size", self.font_size),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ConversionError::InvalidConfig(format!(
                "{name} must be a finite number"
            )));
        }
        if self.margin < 0.0 {
            return Err(ConversionError::InvalidConfig(
                "margin must not be negative".into(),
            ));
        }
        if self.line_height <= 0.0 || self.font_size <= 0.0 {
            return Err(ConversionError::InvalidConfig(
                "line_height and font_size must be positive".into(),
            ));
        }
        if self.content_width() <= 0.0 {
            return Err(ConversionError::InvalidConfig(format!(
                "margins ({}pt) leave no room on a {}pt wide page",
                self.margin, self.page_width
            )));
        }
        if self.page_height <= 2.0 * self.margin {
            return Err(ConversionError::InvalidConfig(format!(
                "margins ({}pt) leave no room on a {}pt tall page",
                self.margin, self.page_height
            )));
        }
        Ok(())
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::a4()
    }
}

/// One laid-out page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    index: usize,
    lines: Vec<String>,
    source_range: Range<usize>,
}

impl Page {
    pub(crate) fn new(index: usize, lines: Vec<String>, source_range: Range<usize>) -> Self {
        Self {
            index,
            lines,
            source_range,
        }
    }

    /// 1-based page number.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Byte range of the source text this page was laid out from.
    pub fn source_range(&self) -> Range<usize> {
        self.source_range.clone()
    }

    /// The page's lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// The pages of one document, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationResult {
    pages: Vec<Page>,
}

impl PaginationResult {
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Every line of every page, in reading order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.pages
            .iter()
            .flat_map(|p| p.lines.iter().map(String::as_str))
    }

    /// Build a result from text already split into pages (e.g. extracted
    /// from a PDF). One [`Page`] per entry; empty pages are kept.
    ///
    /// Source ranges index into the concatenation of the page texts.
    pub fn from_page_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut offset = 0;
        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let text = text.as_ref();
                let start = offset;
                offset += text.len();
                let body = text
                    .strip_suffix("\r\n")
                    .or_else(|| text.strip_suffix('\n'))
                    .unwrap_or(text);
                let lines = if body.is_empty() {
                    Vec::new()
                } else {
                    body.split('\n')
                        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                        .collect()
                };
                Page {
                    index: i + 1,
                    lines,
                    source_range: start..offset,
                }
            })
            .collect();
        Self { pages }
    }

    pub(crate) fn from_pages(pages: Vec<Page>) -> Self {
        Self { pages }
    }
}

/// Lay `text` out into pages.
pub fn paginate(
    text: &str,
    geometry: &PageGeometry,
    measurer: &dyn TextMeasurer,
    progress: &ProgressReporter,
) -> Result<PaginationResult, ConversionError> {
    geometry.validate()?;
    let mut builder = PageBuilder::new(text, geometry, measurer, progress);
    for (offset, line) in logical_lines(text) {
        builder.push_logical(offset, line);
    }
    Ok(builder.finish())
}

/// [`paginate`] for async hosts: identical output, but yields to the
/// runtime every [`YIELD_EVERY_LINES`] logical lines.
pub async fn paginate_cooperative(
    text: &str,
    geometry: &PageGeometry,
    measurer: &dyn TextMeasurer,
    progress: &ProgressReporter,
) -> Result<PaginationResult, ConversionError> {
    geometry.validate()?;
    let mut builder = PageBuilder::new(text, geometry, measurer, progress);
    for (offset, line) in logical_lines(text) {
        builder.push_logical(offset, line);
        if builder.logical % YIELD_EVERY_LINES == 0 {
            tokio::task::yield_now().await;
        }
    }
    Ok(builder.finish())
}

/// `(byte offset, line)` for each `\n`-separated line, `\r` stripped.
fn logical_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split('\n').map(move |raw| {
        let start = offset;
        offset += raw.len() + 1;
        (start, raw.strip_suffix('\r').unwrap_or(raw))
    })
}

/// Accumulates sub-lines into pages.
struct PageBuilder<'a> {
    total_bytes: usize,
    max_width: f32,
    font_size: f32,
    per_page: usize,
    measurer: &'a dyn TextMeasurer,
    progress: &'a ProgressReporter,
    pages: Vec<Page>,
    lines: Vec<String>,
    range: Option<Range<usize>>,
    logical: usize,
}

impl<'a> PageBuilder<'a> {
    fn new(
        text: &str,
        geometry: &PageGeometry,
        measurer: &'a dyn TextMeasurer,
        progress: &'a ProgressReporter,
    ) -> Self {
        progress.report(0.0, "Laying out pages");
        Self {
            total_bytes: text.len(),
            max_width: geometry.content_width(),
            font_size: geometry.font_size,
            per_page: geometry.lines_per_page(),
            measurer,
            progress,
            pages: Vec::new(),
            lines: Vec::new(),
            range: None,
            logical: 0,
        }
    }

    fn push_logical(&mut self, offset: usize, line: &str) {
        for sub in wrap_line(line, self.max_width, self.measurer, self.font_size) {
            let range = offset + sub.start..offset + sub.end;
            self.push_sub(line[sub].to_string(), range);
        }
        self.logical += 1;
        if self.logical % PROGRESS_EVERY_LINES == 0 {
            self.report(offset + line.len());
        }
    }

    fn push_sub(&mut self, text: String, range: Range<usize>) {
        if self.lines.len() == self.per_page {
            self.flush();
        }
        self.range = Some(match self.range.take() {
            Some(r) => r.start..range.end,
            None => range,
        });
        self.lines.push(text);
    }

    fn flush(&mut self) {
        let lines = std::mem::take(&mut self.lines);
        let range = self.range.take().unwrap_or(0..0);
        let consumed = range.end;
        self.pages.push(Page {
            index: self.pages.len() + 1,
            lines,
            source_range: range,
        });
        self.report(consumed);
    }

    fn report(&self, consumed: usize) {
        let percent = if self.total_bytes == 0 {
            0.0
        } else {
            consumed.min(self.total_bytes) as f32 * 100.0 / self.total_bytes as f32
        };
        self.progress
            .report(percent, format!("Laying out page {}", self.pages.len() + 1));
    }

    fn finish(mut self) -> PaginationResult {
        if !self.lines.is_empty() {
            self.flush();
        }
        self.progress
            .finish(format!("Laid out {} pages", self.pages.len()));
        PaginationResult { pages: self.pages }
    }
}

/// Greedy word wrap. Returns byte ranges into `line`, one per sub-line.
///
/// An empty line yields one empty range. Whitespace at a wrap point is
/// dropped; the first sub-line keeps the leading indentation when it fits.
pub fn wrap_line(
    line: &str,
    max_width: f32,
    measurer: &dyn TextMeasurer,
    font_size: f32,
) -> Vec<Range<usize>> {
    let width = |s: &str| measurer.width(s, font_size);
    let fits = |w: f32| w <= max_width + EPSILON;

    if line.is_empty() {
        return vec![0..0];
    }
    if fits(width(line)) {
        return vec![0..line.len()];
    }

    let words = words(line);
    if words.is_empty() {
        return hard_break(line, 0, max_width, measurer, font_size);
    }

    let mut out = Vec::new();
    // (start, end, width) of the sub-line being filled.
    let mut current: Option<(usize, usize, f32)> = None;

    for (i, word) in words.into_iter().enumerate() {
        let word_w = width(&line[word.clone()]);

        if let Some((start, end, w)) = current {
            let joined = w + width(&line[end..word.start]) + word_w;
            if fits(joined) {
                current = Some((start, word.end, joined));
                continue;
            }
            out.push(start..end);
            current = None;
        }

        let lead = if i == 0 { 0 } else { word.start };
        let with_indent = width(&line[lead..word.start]) + word_w;
        if fits(with_indent) {
            current = Some((lead, word.end, with_indent));
        } else if fits(word_w) {
            current = Some((word.start, word.end, word_w));
        } else {
            let mut pieces = hard_break(&line[word.clone()], word.start, max_width, measurer, font_size);
            let last = pieces.pop().unwrap_or(word.clone());
            out.extend(pieces);
            let last_w = width(&line[last.clone()]);
            current = Some((last.start, last.end, last_w));
        }
    }
    if let Some((start, end, _)) = current {
        out.push(start..end);
    }
    out
}

/// Byte ranges of the whitespace-separated words of `line`.
fn words(line: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push(s..i);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(s..line.len());
    }
    out
}

/// Break `text` (located at `offset` in its line) into pieces no wider than
/// `max_width`, each at least one character.
fn hard_break(
    text: &str,
    offset: usize,
    max_width: f32,
    measurer: &dyn TextMeasurer,
    font_size: f32,
) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut w = 0.0;
    for (i, c) in text.char_indices() {
        let cw = measurer.char_width(c, font_size);
        if i > start && w + cw > max_width + EPSILON {
            out.push(offset + start..offset + i);
            start = i;
            w = 0.0;
        }
        w += cw;
    }
    out.push(offset + start..offset + text.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;
    use std::sync::{Arc, Mutex};

    /// Every character 1pt wide at size 1: widths are character counts.
    fn unit() -> MonospaceMetrics {
        MonospaceMetrics { em_fraction: 1.0 }
    }

    fn geometry(width_chars: f32, lines: f32) -> PageGeometry {
        PageGeometry {
            page_width: width_chars + 20.0,
            page_height: 10.0 + lines * 12.0,
            margin: 10.0,
            line_height: 12.0,
            font_size: 1.0,
        }
    }

    fn texts(line: &str, ranges: &[Range<usize>]) -> Vec<String> {
        ranges.iter().map(|r| line[r.clone()].to_string()).collect()
    }

    #[test]
    fn a4_defaults() {
        let g = PageGeometry::a4();
        assert!((g.margin - 42.52).abs() < 0.01);
        assert!((g.line_height - 19.84).abs() < 0.01);
        assert_eq!(g.font_size, 11.0);
        assert!(g.validate().is_ok());
        assert_eq!(g.lines_per_page(), 40);
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let mut g = PageGeometry::a4();
        g.margin = 400.0;
        assert!(g.validate().is_err());
        let mut g = PageGeometry::a4();
        g.line_height = 0.0;
        assert!(g.validate().is_err());
        let mut g = PageGeometry::a4();
        g.font_size = f32::NAN;
        assert!(g.validate().is_err());
    }

    #[test]
    fn three_lines_fit_exactly_with_float_metrics() {
        let a4 = PageGeometry::a4();
        let g = PageGeometry {
            page_height: a4.margin + 3.0 * a4.line_height,
            ..a4
        };
        assert_eq!(g.lines_per_page(), 3);
    }

    #[test]
    fn wrap_keeps_short_lines_whole() {
        assert_eq!(wrap_line("hello", 10.0, &unit(), 1.0), vec![0..5]);
        assert_eq!(wrap_line("", 10.0, &unit(), 1.0), vec![0..0]);
    }

    #[test]
    fn wrap_breaks_at_spaces_and_keeps_indent() {
        let line = "  alpha beta gamma";
        let r = wrap_line(line, 12.0, &unit(), 1.0);
        assert_eq!(texts(line, &r), vec!["  alpha beta", "gamma"]);
    }

    #[test]
    fn wrap_hard_breaks_long_words() {
        let line = "abcdefghij xy";
        let r = wrap_line(line, 4.0, &unit(), 1.0);
        assert_eq!(texts(line, &r), vec!["abcd", "efgh", "ij", "xy"]);
    }

    #[test]
    fn wrap_handles_multibyte_characters() {
        let line = "ééééé";
        let r = wrap_line(line, 2.0, &unit(), 1.0);
        assert_eq!(texts(line, &r), vec!["éé", "éé", "é"]);
    }

    #[test]
    fn blank_lines_are_kept() {
        let g = geometry(20.0, 10.0);
        let r = paginate("a\n\n\nb", &g, &unit(), &ProgressReporter::noop()).unwrap();
        assert_eq!(r.pages()[0].lines(), ["a", "", "", "b"]);
    }

    #[test]
    fn crlf_is_normalised_and_ranges_cover_source() {
        let g = geometry(20.0, 2.0);
        let text = "one\r\ntwo\r\nthree";
        let r = paginate(text, &g, &unit(), &ProgressReporter::noop()).unwrap();
        assert_eq!(r.total_pages(), 2);
        assert_eq!(r.pages()[0].lines(), ["one", "two"]);
        assert_eq!(&text[r.pages()[0].source_range()], "one\r\ntwo");
        assert_eq!(&text[r.pages()[1].source_range()], "three");
    }

    #[test]
    fn seven_lines_three_per_page() {
        let g = geometry(20.0, 3.0);
        let text = "1\n2\n3\n4\n5\n6\n7";
        let r = paginate(text, &g, &unit(), &ProgressReporter::noop()).unwrap();
        let sizes: Vec<usize> = r.pages().iter().map(|p| p.lines().len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        let indices: Vec<usize> = r.pages().iter().map(Page::index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn a_page_holds_at_least_one_line() {
        let g = PageGeometry {
            page_width: 100.0,
            page_height: 25.0,
            margin: 10.0,
            line_height: 40.0,
            font_size: 1.0,
        };
        let r = paginate("a\nb", &g, &unit(), &ProgressReporter::noop()).unwrap();
        assert_eq!(r.total_pages(), 2);
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_100() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |e: &ProgressEvent| seen.lock().unwrap().push(e.percent)
        };
        let reporter = ProgressReporter::new(Arc::new(sink));
        let text = (0..500).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let r = paginate(&text, &geometry(40.0, 30.0), &unit(), &reporter).unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 100.0);
        // one per page boundary plus one per 50 lines, plus start and finish
        assert!(seen.len() >= r.total_pages() + 500 / PROGRESS_EVERY_LINES);
    }

    #[test]
    fn from_page_texts_keeps_empty_pages() {
        let r = PaginationResult::from_page_texts(["first\nsecond\n", "", "third"]);
        assert_eq!(r.total_pages(), 3);
        assert_eq!(r.pages()[0].lines(), ["first", "second"]);
        assert!(r.pages()[1].lines().is_empty());
        assert_eq!(r.pages()[2].index(), 3);
        assert_eq!(r.pages()[2].source_range(), 13..18);
    }

    #[tokio::test]
    async fn cooperative_matches_sync() {
        let g = geometry(30.0, 7.0);
        let text = (0..1000)
            .map(|i| format!("paragraph {i} with a few more words to wrap"))
            .collect::<Vec<_>>()
            .join("\n");
        let sync = paginate(&text, &g, &HelveticaMetrics, &ProgressReporter::noop()).unwrap();
        let coop = paginate_cooperative(&text, &g, &HelveticaMetrics, &ProgressReporter::noop())
            .await
            .unwrap();
        assert_eq!(sync, coop);
    }
}
