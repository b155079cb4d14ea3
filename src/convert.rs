//! In-process conversions and the file-to-file entry point.
//!
//! Four conversions need no server backend: they are pagination or reflow
//! plus PDFium.
//!
//! ```text
//! text ─▶ paginate (Helvetica metrics) ─▶ render ─▶ PDF
//! HTML ─▶ strip markup ─▶ text ─▶ …               ─▶ PDF
//! PDF  ─▶ extract per-page text ─▶ reflow ─▶ plain text | HTML
//! ```
//!
//! [`convert_file`] picks one of these when it can and hands everything
//! else to a [`JobDispatcher`].

use crate::dispatch::{route_for, JobDispatcher, Upload};
use crate::error::ConversionError;
use crate::format::Format;
use crate::layout::{
    paginate_cooperative, reflow_with, HelveticaMetrics, OutputKind, PageGeometry,
    PaginationResult, ReflowOptions,
};
use crate::pdf;
use crate::progress::ProgressReporter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Conversions [`convert_file`] performs without a server backend.
pub const IN_PROCESS: &[(Format, Format)] = &[
    (Format::Text, Format::Pdf),
    (Format::Html, Format::Pdf),
    (Format::Pdf, Format::Text),
    (Format::Pdf, Format::Html),
];

pub fn is_in_process(source: Format, target: Format) -> bool {
    IN_PROCESS.contains(&(source, target))
}

/// Lay `text` out on pages of `geometry` and render them to a PDF.
pub async fn text_to_pdf(
    text: &str,
    geometry: &PageGeometry,
    progress: &ProgressReporter,
) -> Result<Vec<u8>, ConversionError> {
    if text.trim().is_empty() {
        return Err(ConversionError::InvalidInput {
            reason: "text is empty".into(),
        });
    }
    geometry.validate()?;

    progress.report(5.0, "Laying out pages");
    let pages = paginate_cooperative(
        text,
        geometry,
        &HelveticaMetrics,
        &progress.scoped(10.0, 80.0),
    )
    .await?;
    let total = pages.total_pages();

    let bytes = pdf::render_pages(pages, *geometry, &progress.scoped(80.0, 95.0)).await?;
    progress.finish(format!("PDF ready ({total} pages)"));
    Ok(bytes)
}

/// Render an HTML document's text content to a PDF.
pub async fn html_to_pdf(
    html: &str,
    geometry: &PageGeometry,
    progress: &ProgressReporter,
) -> Result<Vec<u8>, ConversionError> {
    text_to_pdf(&html_to_text(html), geometry, progress).await
}

/// Per-page text of a PDF as a [`PaginationResult`], plus its title.
pub async fn pdf_pages(
    bytes: Vec<u8>,
    progress: &ProgressReporter,
) -> Result<(PaginationResult, Option<String>), ConversionError> {
    if !Format::Pdf.matches_content(&bytes) {
        return Err(ConversionError::InvalidInput {
            reason: "not a PDF document".into(),
        });
    }
    let extracted = pdf::extract_text(bytes, progress).await?;
    Ok((
        PaginationResult::from_page_texts(&extracted.pages),
        extracted.title,
    ))
}

/// PDF → plain text with `--- Page N ---` markers.
pub async fn pdf_to_text(
    bytes: Vec<u8>,
    progress: &ProgressReporter,
) -> Result<String, ConversionError> {
    progress.report(5.0, "Loading PDF");
    let (pages, _) = pdf_pages(bytes, &progress.scoped(10.0, 90.0)).await?;
    let text = reflow_with(&pages, OutputKind::PlainText, &ReflowOptions::default());
    progress.finish(format!("Extracted {} pages", pages.total_pages()));
    Ok(text)
}

/// PDF → standalone HTML, one section per page.
pub async fn pdf_to_html(
    bytes: Vec<u8>,
    source_name: &str,
    progress: &ProgressReporter,
) -> Result<String, ConversionError> {
    progress.report(5.0, "Loading PDF");
    let (pages, title) = pdf_pages(bytes, &progress.scoped(10.0, 90.0)).await?;
    let mut options = ReflowOptions::for_source(source_name);
    if title.is_some() {
        options.title = title;
    }
    let html = reflow_with(&pages, OutputKind::Html, &options);
    progress.finish(format!("Converted {} pages", pages.total_pages()));
    Ok(html)
}

static RE_DROP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<(script|style|head)\b[^>]*>.*?</(script|style|head)\s*>").unwrap()
});
static RE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</?(p|div|h[1-6]|li|tr|section|article|header|footer|blockquote|pre|table|ul|ol)\b[^>]*>")
        .unwrap()
});
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

/// Text content of an HTML document: block elements become line breaks,
/// other markup is dropped, the common entities are decoded.
pub fn html_to_text(html: &str) -> String {
    let text = RE_DROP.replace_all(html, "");
    let text = RE_BREAK.replace_all(&text, "\n");
    let text = RE_TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let text = lines.join("\n");
    RE_BLANK_RUN
        .replace_all(&text, "\n\n")
        .trim_matches('\n')
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Convert the file at `input` into `output` as `target`.
///
/// The source format comes from the input's extension. In-process pairs
/// run here; everything in the dispatcher's route table goes through
/// `dispatcher`. The output is written to a temporary sibling and renamed
/// into place, so a failed conversion never leaves a partial file.
///
/// Returns the number of bytes written.
pub async fn convert_file(
    input: &Path,
    output: &Path,
    target: Format,
    geometry: &PageGeometry,
    dispatcher: Option<&JobDispatcher>,
    progress: &ProgressReporter,
) -> Result<u64, ConversionError> {
    let started = Instant::now();
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let source = Format::from_file_name(&name).ok_or_else(|| ConversionError::InvalidInput {
        reason: format!("cannot tell the format of '{}' from its extension", input.display()),
    })?;

    if !is_in_process(source, target) && route_for(source, target).is_none() {
        return Err(ConversionError::UnsupportedConversion {
            from: source,
            to: target,
        });
    }

    let bytes = tokio::fs::read(input)
        .await
        .map_err(|e| ConversionError::InvalidInput {
            reason: format!("cannot read '{}': {e}", input.display()),
        })?;
    info!("Converting {} ({source} → {target})", input.display());

    let mut staged = tempfile::Builder::new()
        .prefix(".docshift-")
        .tempfile_in(parent_dir(output))
        .map_err(ConversionError::storage)?;

    let written = match (source, target) {
        (Format::Text, Format::Pdf) | (Format::Html, Format::Pdf) => {
            let text = String::from_utf8(bytes).map_err(|_| ConversionError::InvalidInput {
                reason: format!("'{}' is not UTF-8 text", input.display()),
            })?;
            let pdf = if source == Format::Html {
                html_to_pdf(&text, geometry, progress).await?
            } else {
                text_to_pdf(&text, geometry, progress).await?
            };
            write_all(staged.path(), &pdf).await?
        }
        (Format::Pdf, Format::Text) => {
            let text = pdf_to_text(bytes, progress).await?;
            write_all(staged.path(), text.as_bytes()).await?
        }
        (Format::Pdf, Format::Html) => {
            let html = pdf_to_html(bytes, &name, progress).await?;
            write_all(staged.path(), html.as_bytes()).await?
        }
        _ => {
            let dispatcher = dispatcher.ok_or_else(|| ConversionError::BackendUnavailable {
                backend: "dispatcher".to_string(),
                hint: format!("{source} → {target} needs the conversion service."),
            })?;
            let content_type = source.mime_type();
            let document = dispatcher
                .submit(Upload::new(name.as_str(), content_type, bytes), source, target)
                .await?;
            let mut file = tokio::fs::File::from_std(
                staged.as_file().try_clone().map_err(ConversionError::storage)?,
            );
            let n = document.deliver(&mut file).await?;
            progress.finish("Conversion complete");
            n
        }
    };

    staged
        .as_file_mut()
        .sync_all()
        .map_err(ConversionError::storage)?;
    staged
        .persist(output)
        .map_err(|e| ConversionError::storage(e.error))?;

    info!(
        "Wrote {} ({} bytes) in {}ms",
        output.display(),
        written,
        started.elapsed().as_millis()
    );
    Ok(written)
}

async fn write_all(path: &Path, bytes: &[u8]) -> Result<u64, ConversionError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(ConversionError::storage)?;
    Ok(bytes.len() as u64)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
