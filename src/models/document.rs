use serde::{Deserialize, Serialize};

/// Identifier of a source document (typically its filename).
pub type DocumentId = String;

/// Extracted document text, one entry per page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub pages: Vec<String>,
}

impl Document {
    /// A document with a single, unnumbered page.
    pub fn new(id: impl Into<DocumentId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pages: vec![text.into()],
        }
    }

    /// A document whose pages are numbered from 1.
    pub fn with_pages(id: impl Into<DocumentId>, pages: Vec<String>) -> Self {
        Self {
            id: id.into(),
            pages,
        }
    }

    /// Split text on form feeds, the page separator emitted by text extractors.
    pub fn from_paged_text(id: impl Into<DocumentId>, text: &str) -> Self {
        if text.contains('\u{c}') {
            Self::with_pages(id, text.split('\u{c}').map(str::to_string).collect())
        } else {
            Self::new(id, text)
        }
    }

    /// Whether passages of this document carry page numbers.
    pub fn is_paged(&self) -> bool {
        self.pages.len() > 1
    }
}

/// A bounded span of document text; the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub chunk_id: String,
    pub source: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub chunk_index: u32,
    pub content: String,
}

impl Passage {
    /// Stable, content-derived passage id.
    pub fn generate_id(source: &str, page: Option<u32>, chunk_index: u32, content: &str) -> String {
        use uuid::Uuid;
        let page = page.map_or_else(|| "-".to_string(), |p| p.to_string());
        let checksum = crate::utils::calculate_checksum(content);
        let name = format!("{source}:{page}:{chunk_index}:{checksum}");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn new(
        source: &str,
        page: Option<u32>,
        section: Option<String>,
        chunk_index: u32,
        content: String,
    ) -> Self {
        Self {
            chunk_id: Self::generate_id(source, page, chunk_index, &content),
            source: source.to_string(),
            page,
            section,
            chunk_index,
            content,
        }
    }

    /// Citation label used in assembled context.
    pub fn citation(&self) -> String {
        citation_label(&self.source, self.page, self.section.as_deref())
    }
}

pub(crate) fn citation_label(source: &str, page: Option<u32>, section: Option<&str>) -> String {
    let mut label = format!("Source: {source}");
    if let Some(page) = page {
        label.push_str(&format!(", Page: {page}"));
    }
    if let Some(section) = section {
        label.push_str(&format!(", Section: {section}"));
    }
    label
}
