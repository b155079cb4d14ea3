//! Document formats known to the converter.
//!
//! A [`Format`] is the unit the route table is keyed on. Each format knows
//! its canonical file extension (used for output names and for the office
//! toolchain's `--convert-to` argument), the MIME type declared on
//! download, and a cheap magic-byte check used by the upload sanity check.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Plain UTF-8 text (`.txt`).
    Text,
    /// HTML (`.html`, `.htm`).
    Html,
    /// Portable Document Format.
    Pdf,
    /// Word-processor document (`.docx`, `.doc`, `.odt`, `.rtf`).
    WordProcessor,
    /// Spreadsheet (`.xlsx`, `.xls`, `.ods`).
    Spreadsheet,
    /// Raster image (`.png`, `.jpg`, `.gif`).
    Image,
}

impl Format {
    pub const ALL: [Format; 6] = [
        Format::Text,
        Format::Html,
        Format::Pdf,
        Format::WordProcessor,
        Format::Spreadsheet,
        Format::Image,
    ];

    /// Canonical extension, without the dot.
    pub fn extension(self) -> &'static str {
        self.extensions()[0]
    }

    /// Every extension recognised for this format (canonical first).
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Format::Text => &["txt", "text"],
            Format::Html => &["html", "htm"],
            Format::Pdf => &["pdf"],
            Format::WordProcessor => &["docx", "doc", "odt", "rtf"],
            Format::Spreadsheet => &["xlsx", "xls", "ods"],
            Format::Image => &["png", "jpg", "jpeg", "gif"],
        }
    }

    /// MIME type declared when a document of this format is handed out.
    pub fn mime_type(self) -> &'static str {
        match self {
            Format::Text => "text/plain; charset=utf-8",
            Format::Html => "text/html; charset=utf-8",
            Format::Pdf => "application/pdf",
            Format::WordProcessor => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Format::Spreadsheet => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            Format::Image => "image/png",
        }
    }

    /// Resolve a format from a bare extension (case-insensitive, dot optional).
    pub fn from_extension(ext: &str) -> Option<Format> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Format::ALL
            .into_iter()
            .find(|f| f.extensions().contains(&ext.as_str()))
    }

    /// Resolve a format from the extension of a file name.
    pub fn from_file_name(name: &str) -> Option<Format> {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Format::from_extension)
    }

    /// Whether a client-declared content type is plausible for this format.
    ///
    /// Browsers frequently send an empty type or `application/octet-stream`
    /// for files they do not recognise; both are accepted for every format
    /// and the decision is left to the extension and the magic bytes.
    pub fn accepts_content_type(self, content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if mime.is_empty() || mime == "application/octet-stream" {
            return true;
        }
        match self {
            Format::Text => mime == "text/plain",
            Format::Html => mime == "text/html" || mime == "application/xhtml+xml",
            Format::Pdf => mime == "application/pdf",
            Format::WordProcessor => matches!(
                mime.as_str(),
                "application/msword"
                    | "application/rtf"
                    | "application/vnd.oasis.opendocument.text"
                    | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            Format::Spreadsheet => matches!(
                mime.as_str(),
                "application/vnd.ms-excel"
                    | "application/vnd.oasis.opendocument.spreadsheet"
                    | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            ),
            Format::Image => mime.starts_with("image/"),
        }
    }

    /// Magic-byte check on the leading bytes of a document.
    pub fn matches_content(self, bytes: &[u8]) -> bool {
        const ZIP: &[u8] = b"PK\x03\x04";
        const OLE: &[u8] = b"\xD0\xCF\x11\xE0";
        match self {
            Format::Pdf => bytes.starts_with(b"%PDF"),
            Format::WordProcessor => {
                bytes.starts_with(ZIP) || bytes.starts_with(OLE) || bytes.starts_with(b"{\\rtf")
            }
            Format::Spreadsheet => bytes.starts_with(ZIP) || bytes.starts_with(OLE),
            Format::Text | Format::Html => {
                std::str::from_utf8(bytes).is_ok() && !bytes.contains(&0)
            }
            Format::Image => {
                bytes.starts_with(b"\x89PNG")
                    || bytes.starts_with(b"\xFF\xD8\xFF")
                    || bytes.starts_with(b"GIF8")
            }
        }
    }

    /// Short lowercase name, as accepted by [`Format::from_str`].
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Html => "html",
            Format::Pdf => "pdf",
            Format::WordProcessor => "word",
            Format::Spreadsheet => "spreadsheet",
            Format::Image => "image",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Format::Text),
            "word" | "wordprocessor" | "word-processor" => Ok(Format::WordProcessor),
            "excel" | "spreadsheet" => Ok(Format::Spreadsheet),
            "image" => Ok(Format::Image),
            other => Format::from_extension(other).ok_or_else(|| format!("Unknown format: {s}")),
        }
    }
}

/// Derive the download name for a converted document.
///
/// The directory part and the last extension of `input_name` are dropped
/// and the target's canonical extension appended: `report.txt` → `report.pdf`.
pub fn output_file_name(input_name: &str, target: Format) -> String {
    let path = Path::new(input_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    format!("{}.{}", stem, target.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_swaps_extension() {
        assert_eq!(output_file_name("report.txt", Format::Pdf), "report.pdf");
        assert_eq!(output_file_name("Q3 budget.xlsx", Format::Pdf), "Q3 budget.pdf");
        assert_eq!(output_file_name("scan.pdf", Format::WordProcessor), "scan.docx");
        assert_eq!(output_file_name("/tmp/up/notes", Format::Html), "notes.html");
        assert_eq!(output_file_name("", Format::Text), "document.txt");
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(Format::from_extension("DOCX"), Some(Format::WordProcessor));
        assert_eq!(Format::from_extension(".htm"), Some(Format::Html));
        assert_eq!(Format::from_file_name("a.b.XLS"), Some(Format::Spreadsheet));
        assert_eq!(Format::from_file_name("README"), None);
    }

    #[test]
    fn parse_aliases() {
        assert_eq!("word".parse::<Format>().unwrap(), Format::WordProcessor);
        assert_eq!("xlsx".parse::<Format>().unwrap(), Format::Spreadsheet);
        assert_eq!("txt".parse::<Format>().unwrap(), Format::Text);
        assert!("mp3".parse::<Format>().is_err());
    }

    #[test]
    fn content_sniffing() {
        assert!(Format::Pdf.matches_content(b"%PDF-1.7\n"));
        assert!(!Format::Pdf.matches_content(b"PK\x03\x04"));
        assert!(Format::WordProcessor.matches_content(b"PK\x03\x04rest"));
        assert!(Format::Text.matches_content("héllo".as_bytes()));
        assert!(!Format::Text.matches_content(&[0xff, 0xfe, 0x00]));
        assert!(Format::Image.matches_content(b"\x89PNG\r\n"));
    }

    #[test]
    fn generic_content_types_are_accepted() {
        assert!(Format::Pdf.accepts_content_type(""));
        assert!(Format::Pdf.accepts_content_type("application/octet-stream"));
        assert!(Format::Text.accepts_content_type("text/plain; charset=utf-8"));
        assert!(!Format::Pdf.accepts_content_type("text/plain"));
    }
}
