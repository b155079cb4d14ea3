//! In-process PDF work through PDFium: per-page text extraction and
//! rendering laid-out pages to a PDF.
//!
//! PDFium is a C++ library with global state; every call here runs inside
//! `tokio::task::spawn_blocking` and binds its own [`Pdfium`] instance.
//!
//! ## Binding
//!
//! 1. `PDFIUM_LIB_PATH`: a directory containing the platform library, or the
//!    library file itself
//! 2. the current directory
//! 3. the system library search path
//!
//! If none binds, the operation fails with
//! [`ConversionError::BackendUnavailable`].

use crate::error::ConversionError;
use crate::layout::measure::TAB_WIDTH;
use crate::layout::{PageGeometry, PaginationResult};
use crate::progress::ProgressReporter;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the PDFium library (file or directory).
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_LIB_PATH";

const BACKEND: &str = "pdf engine";

/// Text pulled out of a PDF, one entry per page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    /// Document title from the PDF metadata, if set.
    pub title: Option<String>,
    pub pages: Vec<String>,
}

/// Whether PDFium can be bound in this process.
pub fn engine_available() -> bool {
    bind().is_ok()
}

/// Extract the text of every page of the PDF in `bytes`.
pub async fn extract_text(
    bytes: Vec<u8>,
    progress: &ProgressReporter,
) -> Result<ExtractedText, ConversionError> {
    let progress = progress.clone();
    tokio::task::spawn_blocking(move || extract_text_blocking(&bytes, &progress))
        .await
        .map_err(|e| ConversionError::BackendFailed {
            backend: BACKEND.to_string(),
            detail: format!("text extraction task panicked: {e}"),
        })?
}

fn extract_text_blocking(
    bytes: &[u8],
    progress: &ProgressReporter,
) -> Result<ExtractedText, ConversionError> {
    let pdfium = bind()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ConversionError::Unreadable {
            detail: format!("{e:?}"),
        })?;

    let title = document
        .metadata()
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().trim().to_string())
        .filter(|v| !v.is_empty());

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);

    let mut texts = Vec::with_capacity(total);
    for (i, page) in pages.iter().enumerate() {
        let text = page
            .text()
            .map_err(|e| ConversionError::Unreadable {
                detail: format!("page {}: {e:?}", i + 1),
            })?
            .all();
        debug!("Extracted page {} ({} bytes)", i + 1, text.len());
        texts.push(text);
        progress.report(
            (i + 1) as f32 * 100.0 / total.max(1) as f32,
            format!("Extracted page {} of {}", i + 1, total),
        );
    }

    Ok(ExtractedText { title, pages: texts })
}

/// Render laid-out pages to a PDF, one PDF page per [`Page`](crate::layout::Page).
///
/// Text is drawn in Helvetica, the font [`HelveticaMetrics`](crate::layout::HelveticaMetrics)
/// measures, one `line_height` per line. The block of
/// [`lines_per_page`](PageGeometry::lines_per_page) slots ends at the bottom
/// margin, so a full page never writes into it.
pub async fn render_pages(
    result: PaginationResult,
    geometry: PageGeometry,
    progress: &ProgressReporter,
) -> Result<Vec<u8>, ConversionError> {
    let progress = progress.clone();
    tokio::task::spawn_blocking(move || render_blocking(&result, &geometry, &progress))
        .await
        .map_err(|e| ConversionError::BackendFailed {
            backend: BACKEND.to_string(),
            detail: format!("render task panicked: {e}"),
        })?
}

fn render_blocking(
    result: &PaginationResult,
    geometry: &PageGeometry,
    progress: &ProgressReporter,
) -> Result<Vec<u8>, ConversionError> {
    let pdfium = bind()?;
    let failed = |e: PdfiumError| ConversionError::BackendFailed {
        backend: BACKEND.to_string(),
        detail: format!("{e:?}"),
    };

    let mut document = pdfium.create_new_pdf().map_err(failed)?;
    let font = document.fonts_mut().helvetica();
    let total = result.total_pages();
    let tab = " ".repeat(TAB_WIDTH);

    for page in result.pages() {
        let mut pdf_page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::Custom(
                PdfPoints::new(geometry.page_width),
                PdfPoints::new(geometry.page_height),
            ))
            .map_err(failed)?;

        for (i, line) in page.lines().iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (x, y) = baseline(geometry, i);
            pdf_page
                .objects_mut()
                .create_text_object(
                    PdfPoints::new(x),
                    PdfPoints::new(y),
                    line.replace('\t', &tab),
                    font,
                    PdfPoints::new(geometry.font_size),
                )
                .map_err(failed)?;
        }

        progress.report(
            page.index() as f32 * 100.0 / total.max(1) as f32,
            format!("Rendered page {} of {}", page.index(), total),
        );
    }

    let bytes = document.save_to_bytes().map_err(failed)?;
    info!("Rendered {} pages ({} bytes)", total, bytes.len());
    Ok(bytes)
}

/// Text origin of line `i` (0-based) in PDF coordinates (origin bottom-left).
fn baseline(geometry: &PageGeometry, i: usize) -> (f32, f32) {
    let slots = geometry.lines_per_page() as f32 * geometry.line_height;
    let first = (geometry.page_height - geometry.margin - slots).max(0.0);
    let top = first + i as f32 * geometry.line_height;
    (
        geometry.margin,
        geometry.page_height - top - geometry.font_size,
    )
}

fn bind() -> Result<Pdfium, ConversionError> {
    let mut tried = Vec::new();

    if let Some(configured) = std::env::var_os(PDFIUM_LIB_ENV).map(PathBuf::from) {
        let lib = library_path(&configured);
        match Pdfium::bind_to_library(&lib) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(e) => tried.push(format!("{}: {e:?}", lib.display())),
        }
    }

    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&local) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(e) => tried.push(format!("{}: {e:?}", PathBuf::from(&local).display())),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(e) => {
            tried.push(format!("system library: {e:?}"));
            Err(ConversionError::BackendUnavailable {
                backend: BACKEND.to_string(),
                hint: format!(
                    "PDFium library not found. Set {PDFIUM_LIB_ENV} to the directory \
                     containing it.\nTried:\n  {}",
                    tried.join("\n  ")
                ),
            })
        }
    }
}

fn library_path(configured: &Path) -> PathBuf {
    if configured.is_dir() {
        PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(configured))
    } else {
        configured.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_step_down_by_line_height() {
        let g = PageGeometry::a4();
        let (x, y) = baseline(&g, 0);
        assert_eq!(x, g.margin);
        assert!(y <= g.page_height - g.font_size + 1e-3);
        let (_, y2) = baseline(&g, 1);
        assert!((y - y2 - g.line_height).abs() < 1e-3);
    }

    #[test]
    fn full_page_stays_out_of_the_bottom_margin() {
        for g in [PageGeometry::a4(), PageGeometry::letter()] {
            let last = g.lines_per_page() - 1;
            let (_, y) = baseline(&g, last);
            // Bottom of the last line box, in PDF coordinates.
            let bottom = y + g.font_size - g.line_height;
            assert!(bottom >= g.margin - 1e-2, "bottom {bottom} < margin {}", g.margin);
            assert!(y >= g.margin);
        }
    }

    #[test]
    fn three_line_page_fills_down_to_the_margin() {
        let a4 = PageGeometry::a4();
        let g = PageGeometry {
            page_height: a4.margin + 3.0 * a4.line_height,
            ..a4
        };
        assert_eq!(g.lines_per_page(), 3);
        let (_, first) = baseline(&g, 0);
        let (_, last) = baseline(&g, 2);
        assert!((first - (g.page_height - g.font_size)).abs() < 1e-2);
        assert!((last + g.font_size - g.line_height - g.margin).abs() < 1e-2);
    }

    #[test]
    fn directory_resolves_to_platform_library() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library_path(dir.path());
        assert!(lib.starts_with(dir.path()));
        assert!(lib.to_string_lossy().contains("pdfium"));
    }
}
