//! Turning uploaded files into reference text
//!
//! Plain text is read directly, documents go through the text-extraction
//! collaborator, everything else is skipped. A failing file never aborts
//! the batch.

use std::path::Path;

use tracing::{debug, warn};

use crate::backend::TextExtractor;
use crate::domain::UploadedFile;

/// MIME types handed to the text-extraction collaborator
const EXTRACTED_TYPES: [&str; 1] = ["application/pdf"];

/// A file as received from the UI, before extraction
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string();
        Ok(Self { name, mime_type, bytes })
    }
}

/// A file that did not make it into the draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

/// Result of one upload batch
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub added: Vec<String>,
    pub skipped: Vec<SkippedFile>,
}

enum Route {
    Direct,
    Extract,
    Unsupported,
}

fn route(mime_type: &str) -> Route {
    if mime_type.starts_with("text/") {
        Route::Direct
    } else if EXTRACTED_TYPES.contains(&mime_type) {
        Route::Extract
    } else {
        Route::Unsupported
    }
}

/// Extract text from each file, keeping the successes in input order
pub async fn extract_files(extractor: &dyn TextExtractor, files: Vec<RawFile>) -> (Vec<UploadedFile>, UploadReport) {
    let mut uploaded = Vec::with_capacity(files.len());
    let mut report = UploadReport::default();

    for file in files {
        debug!(name = %file.name, mime_type = %file.mime_type, "extract_files: processing");
        let text = match route(&file.mime_type) {
            Route::Direct => Ok(String::from_utf8_lossy(&file.bytes).into_owned()),
            Route::Extract => extractor
                .extract_text(&file.bytes, &file.mime_type)
                .await
                .map_err(|e| e.to_string()),
            Route::Unsupported => Err(format!("unsupported file type {}", file.mime_type)),
        };

        match text {
            Ok(text) => {
                report.added.push(file.name.clone());
                uploaded.push(UploadedFile::new(file.name, text));
            }
            Err(reason) => {
                warn!(name = %file.name, %reason, "Skipping uploaded file");
                report.skipped.push(SkippedFile { name: file.name, reason });
            }
        }
    }

    (uploaded, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EchoExtractor;

    #[tokio::test]
    async fn test_one_failing_file_does_not_abort_batch() {
        let files = vec![
            RawFile::new("gut.pdf", "application/pdf", b"Inhalt".to_vec()),
            RawFile::new("kaputt.pdf", "application/pdf", b"FAIL".to_vec()),
        ];

        let (uploaded, report) = extract_files(&EchoExtractor, files).await;

        assert_eq!(uploaded, vec![UploadedFile::new("gut.pdf", "Inhalt")]);
        assert_eq!(report.added, vec!["gut.pdf".to_string()]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "kaputt.pdf");
    }

    #[tokio::test]
    async fn test_text_read_directly_and_unsupported_skipped() {
        let files = vec![
            RawFile::new("notizen.md", "text/markdown", "# Notizen".as_bytes().to_vec()),
            RawFile::new("bild.png", "image/png", vec![0x89, 0x50]),
        ];

        let (uploaded, report) = extract_files(&EchoExtractor, files).await;

        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].extracted_text, "# Notizen");
        assert!(uploaded[0].is_active);
        assert!(report.skipped[0].reason.contains("image/png"));
    }

    #[test]
    fn test_from_path_guesses_mime() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("plan.txt");
        std::fs::write(&path, "hallo").unwrap();

        let raw = RawFile::from_path(&path).unwrap();
        assert_eq!(raw.name, "plan.txt");
        assert_eq!(raw.mime_type, "text/plain");
        assert_eq!(raw.bytes, b"hallo");
    }
}
