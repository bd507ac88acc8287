//! Document sources and text extraction.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::ExtractError;
use crate::models::Document;
use crate::utils::file::{FileKind, classify_extension};
use crate::utils::read_text_document;

/// Something that can be turned into a [`Document`].
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// Text already in memory
    Inline(Document),
    /// A text or markdown file on disk, identified by its file name
    File(PathBuf),
    /// A file found under `root`, identified by its path relative to `root`
    Walked { root: PathBuf, path: PathBuf },
}

impl DocumentSource {
    /// Identifier the resulting document will carry.
    pub fn id(&self) -> String {
        match self {
            DocumentSource::Inline(doc) => doc.id.clone(),
            DocumentSource::File(path) => file_id(path),
            DocumentSource::Walked { root, path } => relative_id(root, path),
        }
    }
}

impl From<Document> for DocumentSource {
    fn from(doc: Document) -> Self {
        DocumentSource::Inline(doc)
    }
}

/// Extract the document behind `source`.
pub fn extract(source: &DocumentSource, max_file_size: u64) -> Result<Document, ExtractError> {
    match source {
        DocumentSource::Inline(doc) => {
            if doc.pages.iter().any(|p| p.contains('\0')) {
                return Err(ExtractError::Corrupt(format!(
                    "{} contains NUL characters",
                    doc.id
                )));
            }
            Ok(doc.clone())
        }
        DocumentSource::File(path) | DocumentSource::Walked { path, .. } => {
            if !path.is_file() {
                return Err(ExtractError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                )));
            }
            let text = read_text_document(path, max_file_size)?;
            Ok(Document::from_paged_text(source.id(), &text))
        }
    }
}

/// Expand paths into file sources.
///
/// Directories are walked recursively; files matching an exclude glob and
/// known binary formats inside directories are skipped. Paths named
/// explicitly are always kept so their rejection shows up in the report.
pub fn collect_sources(
    paths: &[PathBuf],
    exclude_patterns: &[String],
) -> Result<Vec<DocumentSource>, ExtractError> {
    let patterns: Vec<glob::Pattern> = exclude_patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::warn!(pattern = %p, "ignoring invalid exclude pattern: {e}");
                None
            }
        })
        .collect();
    let excluded = |path: &Path| {
        let path_str = path.to_string_lossy();
        patterns.iter().any(|p| p.matches(&path_str))
    };

    let mut sources = Vec::new();
    for root in paths {
        if !root.is_dir() {
            sources.push(DocumentSource::File(root.clone()));
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();
            if !path.is_file() || excluded(path) || classify_extension(path) == FileKind::Binary {
                continue;
            }
            found.push(path.to_path_buf());
        }
        found.sort();
        tracing::debug!(root = %root.display(), files = found.len(), "collected files");
        sources.extend(found.into_iter().map(|path| DocumentSource::Walked {
            root: root.clone(),
            path,
        }));
    }

    Ok(sources)
}

fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// `/`-separated path of `path` below `root`.
fn relative_id(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) if relative.components().next().is_some() => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => file_id(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_extract_inline() {
        let doc = Document::new("notes", "Library opens at 8am.");
        let extracted = extract(&DocumentSource::Inline(doc.clone()), 1024).unwrap();
        assert_eq!(extracted, doc);

        let corrupt = Document::new("bad", "text\0more");
        assert!(matches!(
            extract(&DocumentSource::Inline(corrupt), 1024),
            Err(ExtractError::Corrupt(_))
        ));
    }

    #[test]
    fn test_extract_file_uses_file_name_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.txt");
        fs::write(&path, "Page one.\u{c}Page two.").unwrap();

        let doc = extract(&DocumentSource::File(path), 1024).unwrap();
        assert_eq!(doc.id, "guide.txt");
        assert_eq!(doc.pages.len(), 2);
    }

    #[test]
    fn test_extract_file_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = DocumentSource::File(dir.path().join("missing.txt"));
        assert!(matches!(extract(&missing, 1024), Err(ExtractError::Io(_))));

        let pdf = dir.path().join("scan.pdf");
        fs::write(&pdf, b"%PDF-1.7").unwrap();
        assert!(matches!(
            extract(&DocumentSource::File(pdf), 1024),
            Err(ExtractError::Unsupported(_))
        ));

        let big = dir.path().join("big.txt");
        fs::write(&big, "x".repeat(100)).unwrap();
        assert!(matches!(
            extract(&DocumentSource::File(big), 10),
            Err(ExtractError::TooLarge { size: 100, max: 10 })
        ));
    }

    #[test]
    fn test_collect_sources_walks_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs/drafts")).unwrap();
        fs::write(root.join("docs/hours.md"), "# Hours").unwrap();
        fs::write(root.join("docs/fines.txt"), "Fines").unwrap();
        fs::write(root.join("docs/drafts/old.txt"), "Old").unwrap();
        fs::write(root.join("docs/logo.png"), [0u8, 1, 2]).unwrap();

        let sources =
            collect_sources(&[root.join("docs")], &["**/drafts/**".to_string()]).unwrap();
        let ids: Vec<String> = sources.iter().map(DocumentSource::id).collect();
        assert_eq!(ids, vec!["fines.txt", "hours.md"]);

        let explicit = collect_sources(&[root.join("docs/logo.png")], &[]).unwrap();
        assert_eq!(explicit.len(), 1);
    }

    #[test]
    fn test_same_file_name_in_subdirectories_gets_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        fs::create_dir_all(root.join("borrowing")).unwrap();
        fs::create_dir_all(root.join("printing")).unwrap();
        fs::write(root.join("borrowing/README.md"), "Loans last three weeks.").unwrap();
        fs::write(root.join("printing/README.md"), "Printing costs ten cents.").unwrap();

        let sources = collect_sources(&[root.clone()], &[]).unwrap();
        let ids: Vec<String> = sources.iter().map(DocumentSource::id).collect();
        assert_eq!(ids, vec!["borrowing/README.md", "printing/README.md"]);

        let doc = extract(&sources[1], 1024).unwrap();
        assert_eq!(doc.id, "printing/README.md");

        // Named directly, a file keeps its bare name
        let named = collect_sources(&[root.join("printing/README.md")], &[]).unwrap();
        assert_eq!(named[0].id(), "README.md");
    }
}
