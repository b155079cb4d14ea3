//! Integration tests for pagination and reflow.

use docshift::{
    paginate, paginate_cooperative, reflow, split_pages, HelveticaMetrics, MonospaceMetrics,
    OutputKind, PageGeometry, PaginationResult, ProgressEvent, ProgressReporter, TextMeasurer,
};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn three_line_pages() -> PageGeometry {
    let a4 = PageGeometry::a4();
    PageGeometry {
        page_height: a4.margin + 3.0 * a4.line_height,
        ..a4
    }
}

fn run(text: &str, geometry: &PageGeometry) -> PaginationResult {
    paginate(text, geometry, &HelveticaMetrics, &ProgressReporter::noop()).unwrap()
}

fn recording() -> (ProgressReporter, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::default();
    let sink = events.clone();
    let reporter = ProgressReporter::new(Arc::new(move |e: &ProgressEvent| {
        sink.lock().unwrap().push(e.clone())
    }));
    (reporter, events)
}

fn numbered_lines(n: usize) -> String {
    (1..=n)
        .map(|i| format!("line {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Page breaks ──────────────────────────────────────────────────────────────

#[test]
fn seven_lines_on_three_line_pages() {
    let result = run(&numbered_lines(7), &three_line_pages());
    let sizes: Vec<usize> = result.pages().iter().map(|p| p.lines().len()).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(result.total_pages(), 3);
    let indices: Vec<usize> = result.pages().iter().map(|p| p.index()).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(result.pages()[2].lines(), ["line 7"]);
}

#[test]
fn blank_lines_take_a_slot_each() {
    let result = run("a\n\n\nb", &three_line_pages());
    assert_eq!(result.pages()[0].lines(), ["a", "", ""]);
    assert_eq!(result.pages()[1].lines(), ["b"]);
}

#[test]
fn unwrapped_text_is_reconstructed_exactly() {
    let text = numbered_lines(250);
    let result = run(&text, &PageGeometry::a4());
    assert!(result.total_pages() > 1);

    let joined = result.lines().collect::<Vec<_>>().join("\n");
    assert_eq!(joined, text);

    for page in result.pages() {
        assert_eq!(&text[page.source_range()], page.lines().join("\n"));
    }
}

#[test]
fn pagination_is_repeatable() {
    let text = "Lorem ipsum dolor sit amet. ".repeat(400);
    let g = PageGeometry::letter();
    assert_eq!(run(&text, &g), run(&text, &g));
}

// ── Wrapping ─────────────────────────────────────────────────────────────────

#[test]
fn wrapped_lines_fit_the_content_width() {
    let g = PageGeometry::a4();
    let mono = MonospaceMetrics::courier();
    let paragraph = "The quick brown fox jumps over the lazy dog. ".repeat(30);
    let result = paginate(paragraph.trim_end(), &g, &mono, &ProgressReporter::noop()).unwrap();

    let lines: Vec<&str> = result.lines().collect();
    assert!(lines.len() > 1);
    for line in &lines {
        assert!(
            mono.width(line, g.font_size) <= g.content_width() + 1e-3,
            "too wide: {line:?}"
        );
    }
    let rewrapped: Vec<&str> = lines.iter().flat_map(|l| l.split_whitespace()).collect();
    let original: Vec<&str> = paragraph.split_whitespace().collect();
    assert_eq!(rewrapped, original);
}

#[test]
fn overlong_word_is_broken_not_dropped() {
    let g = PageGeometry::a4();
    let word = "x".repeat(500);
    let result = run(&word, &g);
    let lines: Vec<&str> = result.lines().collect();
    assert!(lines.len() > 1);
    assert_eq!(lines.concat(), word);
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[test]
fn progress_is_monotonic_and_ends_at_100() {
    let (reporter, events) = recording();
    let result = paginate(
        &numbered_lines(20),
        &three_line_pages(),
        &HelveticaMetrics,
        &reporter,
    )
    .unwrap();

    let events = events.lock().unwrap();
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert_eq!(events.last().unwrap().percent, 100.0);
    // At least one event per page boundary.
    assert!(events.len() >= result.total_pages());
}

#[tokio::test]
async fn cooperative_matches_sync() {
    let text = numbered_lines(1_000);
    let g = PageGeometry::a4();
    let sync = run(&text, &g);
    let coop = paginate_cooperative(&text, &g, &HelveticaMetrics, &ProgressReporter::noop())
        .await
        .unwrap();
    assert_eq!(sync, coop);
}

// ── Reflow ───────────────────────────────────────────────────────────────────

#[test]
fn reflowed_text_splits_back_into_the_same_pages() {
    let text = "intro\n--- Page 2 ---\n\\escaped\n\nend";
    let result = run(text, &three_line_pages());
    let flat = reflow(&result, OutputKind::PlainText);
    let back = split_pages(&flat).unwrap();

    assert_eq!(back.total_pages(), result.total_pages());
    for (a, b) in result.pages().iter().zip(back.pages()) {
        assert_eq!(a.index(), b.index());
        assert_eq!(a.lines(), b.lines());
    }
}

#[test]
fn html_reflow_keeps_one_section_per_page() {
    let result = run(&numbered_lines(7), &three_line_pages());
    let html = reflow(&result, OutputKind::Html);
    assert_eq!(html.matches("<section class=\"page\"").count(), 3);
    assert!(html.contains("Page 3 of 3"));
    assert!(html.contains("<p>line 7</p>"));
}

#[test]
fn invalid_geometry_is_rejected() {
    let g = PageGeometry {
        margin: 400.0,
        ..PageGeometry::a4()
    };
    assert!(paginate("x", &g, &HelveticaMetrics, &ProgressReporter::noop()).is_err());
}
