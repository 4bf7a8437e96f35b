use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Markdown,
    Json,
    Pdf,
    Unsupported,
}

pub fn detect_content_kind(mime_type: &str, filename: Option<&str>) -> ContentKind {
    let mime = mime_type.split(';').next().unwrap_or("").trim().to_lowercase();
    match mime.as_str() {
        "text/plain" => ContentKind::Text,
        "text/markdown" => ContentKind::Markdown,
        "application/json" => ContentKind::Json,
        "application/pdf" => ContentKind::Pdf,
        _ => {
            if let Some(name) = filename {
                let ext = Path::new(name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();
                match ext.as_str() {
                    "txt" => ContentKind::Text,
                    "md" | "markdown" => ContentKind::Markdown,
                    "json" => ContentKind::Json,
                    "pdf" => ContentKind::Pdf,
                    _ => ContentKind::Unsupported,
                }
            } else {
                ContentKind::Unsupported
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("content is not valid UTF-8")]
    InvalidUtf8,
    #[error("failed to extract text from {0}")]
    Failed(String),
    #[error("unsupported content type: {0}")]
    Unsupported(String),
}

/// One page of extracted text. `page_no` is `None` for formats the parser
/// can't page-split (every format currently supported here yields a single
/// page, since neither `text-splitter` nor `pdf-extract` expose page
/// boundaries).
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub page_no: Option<u32>,
    pub text: String,
}

/// A table found on a page, rendered later as tab-separated lines
/// (SPEC_FULL.md §4.F.3). No table extraction is wired up yet, so this is
/// always empty; the shape exists so chunking can treat tables uniformly
/// once a table-aware parser is added.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub page_no: Option<u32>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub pages: Vec<ParsedPage>,
    pub tables: Vec<ParsedTable>,
}

impl ParsedTable {
    pub fn render(&self) -> String {
        self.rows
            .iter()
            .map(|row| row.join("\t"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::InvalidUtf8)
}

pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) if !text.trim().is_empty() => Ok(text),
        Ok(_) => Err(ExtractError::Failed("pdf produced no extractable text".to_string())),
        Err(err) => Err(ExtractError::Failed(err.to_string())),
    }
}

/// Parses raw bytes into a `ParsedDocument` for the given MIME/filename hint
/// (SPEC_FULL.md §4.F.3). This is the function run inside the isolated
/// parsing worker.
pub fn parse_document(
    bytes: &[u8],
    mime_type: &str,
    filename: Option<&str>,
) -> Result<ParsedDocument, ExtractError> {
    let kind = detect_content_kind(mime_type, filename);
    let text = match kind {
        ContentKind::Text | ContentKind::Markdown | ContentKind::Json => extract_utf8(bytes)?,
        ContentKind::Pdf => extract_pdf_text(bytes)?,
        ContentKind::Unsupported => return Err(ExtractError::Unsupported(mime_type.to_string())),
    };

    Ok(ParsedDocument {
        pages: vec![ParsedPage { page_no: None, text }],
        tables: Vec::new(),
    })
}
