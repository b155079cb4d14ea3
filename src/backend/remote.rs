//! Remote conversion service backend.
//!
//! One multipart `POST` per conversion against a Cloudmersive-style API:
//!
//! ```text
//! POST {endpoint}/convert/pdf/to/docx
//! Apikey: <key>
//! Content-Type: multipart/form-data   (field "inputFile")
//! ```
//!
//! The response body is the converted document. Nothing is written to disk;
//! the dispatcher hands the bytes to the caller as they are.
//!
//! Failures are split in two. [`RemoteErrorKind::Transport`] means the
//! service never judged the document (connection refused, timed out,
//! credentials refused); repeating the request may work.
//! [`RemoteErrorKind::Rejected`] means it did judge it and said no.
//!
//! Error details carry only the failure class and HTTP status. The service's
//! own wording and the underlying client error go to the log.

use super::RemoteBackend;
use crate::error::{ConversionError, RemoteError, RemoteErrorKind};
use crate::format::Format;
use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default service base URL.
pub const DEFAULT_ENDPOINT: &str = "https://api.cloudmersive.com";

/// Longest slice of an error body written to the log.
const BODY_SNIPPET: usize = 200;

/// Client for the remote conversion API.
#[derive(Clone)]
pub struct RemoteService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RemoteService {
    /// Build a client with a per-request `timeout`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConversionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConversionError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteService")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// API path for a conversion pair, if the service offers it.
pub fn endpoint_path(source: Format, target: Format) -> Option<&'static str> {
    match (source, target) {
        (Format::Pdf, Format::WordProcessor) => Some("convert/pdf/to/docx"),
        (Format::Pdf, Format::Spreadsheet) => Some("convert/pdf/to/xlsx"),
        _ => None,
    }
}

#[async_trait]
impl RemoteBackend for RemoteService {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn run(
        &self,
        input: Vec<u8>,
        file_name: &str,
        source: Format,
        target: Format,
    ) -> Result<Vec<u8>, RemoteError> {
        let path = endpoint_path(source, target).ok_or_else(|| {
            RemoteError::rejected(format!("service has no endpoint for {source} → {target}"))
        })?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RemoteError::transport("no API key configured"))?;
        let url = format!("{}/{}", self.endpoint, path);

        let part = multipart::Part::bytes(input)
            .file_name(file_name.to_string())
            .mime_str(source.mime_type())
            .map_err(|e| RemoteError::rejected(format!("mime: {e}")))?;
        let form = multipart::Form::new().part("inputFile", part);

        debug!(%url, "Sending document to remote conversion service");

        let response = self
            .client
            .post(&url)
            .header("Apikey", api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                let what = transport_failure(&e);
                warn!(%url, error = %e, "Remote conversion {}", what);
                RemoteError::transport(what)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.trim().chars().take(BODY_SNIPPET).collect();
            warn!(%url, %status, body = %snippet, "Remote conversion refused");
            return Err(classify_status(status));
        }

        let bytes = response.bytes().await.map_err(|e| {
            warn!(%url, error = %e, "Reading remote conversion response failed");
            RemoteError::transport("response could not be read")
        })?;
        if bytes.is_empty() {
            return Err(RemoteError::rejected("service returned an empty document"));
        }

        info!(bytes = bytes.len(), %target, "Remote conversion completed");
        Ok(bytes.to_vec())
    }
}

fn transport_failure(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else if e.is_body() || e.is_decode() {
        "response could not be read"
    } else {
        "request failed"
    }
}

fn classify_status(status: StatusCode) -> RemoteError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorKind::Transport,
        _ => RemoteErrorKind::Rejected,
    };
    RemoteError {
        kind,
        detail: format!("HTTP {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn service(endpoint: &str, key: Option<&str>) -> RemoteService {
        RemoteService::new(endpoint, key.map(String::from), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn only_pdf_sources_have_endpoints() {
        assert_eq!(
            endpoint_path(Format::Pdf, Format::WordProcessor),
            Some("convert/pdf/to/docx")
        );
        assert_eq!(
            endpoint_path(Format::Pdf, Format::Spreadsheet),
            Some("convert/pdf/to/xlsx")
        );
        assert_eq!(endpoint_path(Format::WordProcessor, Format::Pdf), None);
    }

    #[test]
    fn debug_redacts_key() {
        let s = service("https://example.invalid/", Some("secret-key"));
        let shown = format!("{s:?}");
        assert!(!shown.contains("secret-key"));
        assert_eq!(s.endpoint(), "https://example.invalid");
    }

    #[test]
    fn blank_key_is_not_configured() {
        assert!(!service("http://x", Some("  ")).is_configured());
        assert!(!service("http://x", None).is_configured());
        assert!(service("http://x", Some("k")).is_configured());
    }

    #[test]
    fn auth_statuses_are_transport() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED).kind,
            RemoteErrorKind::Transport
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN).kind,
            RemoteErrorKind::Transport
        );
        let e = classify_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(e.kind, RemoteErrorKind::Rejected);
        assert_eq!(e.detail, "HTTP 422 Unprocessable Entity");
    }

    #[tokio::test]
    async fn posts_multipart_with_api_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/convert/pdf/to/docx")
                    .header("Apikey", "k-123")
                    .body_contains("inputFile");
                then.status(200).body(b"PK\x03\x04docx");
            })
            .await;

        let out = service(&server.base_url(), Some("k-123"))
            .run(b"%PDF-1.7".to_vec(), "a.pdf", Format::Pdf, Format::WordProcessor)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(out, b"PK\x03\x04docx");
    }

    #[tokio::test]
    async fn server_error_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/convert/pdf/to/xlsx");
                then.status(500).body("conversion engine crashed");
            })
            .await;

        let err = service(&server.base_url(), Some("k"))
            .run(b"%PDF".to_vec(), "a.pdf", Format::Pdf, Format::Spreadsheet)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Rejected);
        assert!(err.detail.contains("500"));
        assert!(!err.detail.contains("crashed"), "got: {}", err.detail);
    }

    #[tokio::test]
    async fn service_wording_stays_out_of_the_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/convert/pdf/to/docx");
                then.status(401)
                    .body("invalid Apikey k-secret for account acme@example.com");
            })
            .await;

        let err = service(&server.base_url(), Some("k-secret"))
            .run(b"%PDF".to_vec(), "a.pdf", Format::Pdf, Format::WordProcessor)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Transport);
        assert_eq!(err.detail, "HTTP 401 Unauthorized");
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/convert/pdf/to/docx");
                then.status(200);
            })
            .await;

        let err = service(&server.base_url(), Some("k"))
            .run(b"%PDF".to_vec(), "a.pdf", Format::Pdf, Format::WordProcessor)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Rejected);
    }

    #[tokio::test]
    async fn unreachable_service_is_transport() {
        // Port 9 (discard) on loopback: nothing listens in CI.
        let err = service("http://127.0.0.1:9", Some("k"))
            .run(b"%PDF".to_vec(), "a.pdf", Format::Pdf, Format::WordProcessor)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Transport);
        assert!(!err.detail.contains("127.0.0.1"), "got: {}", err.detail);
        assert!(
            ["connection failed", "timed out", "request failed"].contains(&err.detail.as_str()),
            "got: {}",
            err.detail
        );
    }

    #[tokio::test]
    async fn unknown_pair_never_sends() {
        let err = service("http://127.0.0.1:9", Some("k"))
            .run(b"x".to_vec(), "a.txt", Format::Text, Format::Pdf)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Rejected);
    }
}
