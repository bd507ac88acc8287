//! File utilities for document extraction.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::ExtractError;

/// Calculate SHA-256 checksum of content.
pub fn calculate_checksum(content: &str) -> String {
    calculate_bytes_checksum(content.as_bytes())
}

/// Calculate SHA-256 checksum of raw bytes.
pub fn calculate_bytes_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// How a file should be treated by the document loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Plain text the engine can ingest directly.
    Text,
    /// A known document or binary format that needs an external extractor.
    Binary,
    /// Unknown extension; decide by sniffing content.
    Unknown,
}

/// Classify a path by its extension.
pub fn classify_extension(path: &Path) -> FileKind {
    let Some(ext) = path.extension() else {
        return FileKind::Unknown;
    };
    let ext = ext.to_string_lossy().to_lowercase();
    if is_binary_extension(&ext) {
        FileKind::Binary
    } else if is_text_extension(&ext) {
        FileKind::Text
    } else {
        FileKind::Unknown
    }
}

/// Check the first bytes of a file for NUL bytes.
pub fn looks_binary(path: &Path) -> std::io::Result<bool> {
    let file = fs::File::open(path)?;
    let mut buffer = [0u8; 512];
    let mut reader = std::io::BufReader::new(file);
    let n = reader.read(&mut buffer)?;
    Ok(buffer[..n].contains(&0))
}

/// Read a text document with a size limit.
pub fn read_text_document(path: &Path, max_size: u64) -> Result<String, ExtractError> {
    if classify_extension(path) == FileKind::Binary {
        return Err(ExtractError::Unsupported(format!(
            "{} requires an external text extractor",
            path.display()
        )));
    }

    let metadata = fs::metadata(path)?;
    if metadata.len() > max_size {
        return Err(ExtractError::TooLarge {
            size: metadata.len(),
            max: max_size,
        });
    }

    if looks_binary(path)? {
        return Err(ExtractError::Corrupt(format!(
            "{} contains binary data",
            path.display()
        )));
    }

    let bytes = fs::read(path)?;
    String::from_utf8(bytes)
        .map_err(|e| ExtractError::Corrupt(format!("{} is not valid UTF-8: {e}", path.display())))
}

/// Check if extension indicates a binary file.
fn is_binary_extension(ext: &str) -> bool {
    matches!(
        ext,
        "pdf"
            | "doc"
            | "docx"
            | "odt"
            | "rtf"
            | "xls"
            | "xlsx"
            | "ppt"
            | "pptx"
            | "epub"
            | "png"
            | "jpg"
            | "jpeg"
            | "gif"
            | "bmp"
            | "webp"
            | "mp3"
            | "mp4"
            | "wav"
            | "zip"
            | "tar"
            | "gz"
            | "7z"
            | "exe"
            | "dll"
            | "so"
            | "dylib"
            | "bin"
            | "db"
            | "sqlite"
    )
}

/// Check if extension indicates a text document.
fn is_text_extension(ext: &str) -> bool {
    matches!(
        ext,
        "txt" | "text" | "md" | "markdown" | "rst" | "adoc" | "org" | "csv" | "tsv" | "html"
            | "htm" | "xml" | "json" | "yaml" | "yml" | "toml" | "log"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_calculate_checksum() {
        let checksum = calculate_checksum("hello world");
        assert_eq!(checksum.len(), 64); // SHA-256 produces 64 hex chars
        assert_eq!(checksum, calculate_checksum("hello world"));
    }

    #[test]
    fn test_classify_extension() {
        assert_eq!(classify_extension(&PathBuf::from("guide.md")), FileKind::Text);
        assert_eq!(classify_extension(&PathBuf::from("guide.PDF")), FileKind::Binary);
        assert_eq!(classify_extension(&PathBuf::from("README")), FileKind::Unknown);
        assert_eq!(classify_extension(&PathBuf::from("a.weird")), FileKind::Unknown);
    }

    #[test]
    fn test_read_text_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hours.txt");
        std::fs::write(&path, "Library opens at 8am.").unwrap();

        let text = read_text_document(&path, 1024).unwrap();
        assert_eq!(text, "Library opens at 8am.");
    }

    #[test]
    fn test_read_text_document_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.txt");
        std::fs::write(&path, [b'a', 0, 0, 0xff, b'b']).unwrap();

        let err = read_text_document(&path, 1024).unwrap_err();
        assert!(matches!(err, ExtractError::Corrupt(_)));
    }

    #[test]
    fn test_read_text_document_rejects_pdf_and_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("guide.pdf");
        std::fs::write(&pdf, "%PDF-1.4").unwrap();
        assert!(matches!(
            read_text_document(&pdf, 1024),
            Err(ExtractError::Unsupported(_))
        ));

        let big = dir.path().join("big.txt");
        std::fs::write(&big, "x".repeat(100)).unwrap();
        assert!(matches!(
            read_text_document(&big, 10),
            Err(ExtractError::TooLarge { size: 100, max: 10 })
        ));
    }
}
