use crate::embedding::{estimate_tokens, split_oversized};
use crate::extract::ParsedDocument;
use async_trait::async_trait;
use text_splitter::TextSplitter;

/// One piece of text pulled out of a page or rendered table, not yet
/// assigned a chunk id or embedding (SPEC_FULL.md §4.F.4).
#[derive(Debug, Clone)]
pub struct ChunkPiece {
    pub text: String,
    pub page: Option<u32>,
}

#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk_text(&self, text: &str, page: Option<u32>) -> Vec<ChunkPiece>;
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1000 }
    }
}

pub struct SemanticChunker {
    splitter: TextSplitter<text_splitter::Characters>,
    max_chars: usize,
}

impl SemanticChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            splitter: TextSplitter::default().with_trim_chunks(true),
            max_chars: config.max_chars,
        }
    }
}

impl Default for SemanticChunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    async fn chunk_text(&self, text: &str, page: Option<u32>) -> Vec<ChunkPiece> {
        self.splitter
            .chunks(text, self.max_chars)
            .map(|piece| ChunkPiece {
                text: piece.to_string(),
                page,
            })
            .collect()
    }
}

/// Chunks a full parsed document page-ordered then table-ordered, matching
/// the deterministic ordering contract of SPEC_FULL.md §4.F.4: within a
/// document, chunks come out in the order they'll later be written, so
/// `chunk_id = doc_id + "_" + i` is stable across identical inputs.
pub async fn chunk_document(chunker: &dyn Chunker, document: &ParsedDocument) -> Vec<ChunkPiece> {
    let mut pieces = Vec::new();

    for page in &document.pages {
        pieces.extend(chunker.chunk_text(&page.text, page.page_no).await);
    }

    for table in &document.tables {
        let rendered = table.render();
        if !rendered.is_empty() {
            pieces.push(ChunkPiece {
                text: rendered,
                page: table.page_no,
            });
        }
    }

    pieces
}

/// Splits any piece whose text alone would overflow the embedding batch
/// bound into several pieces on the same page, so every piece handed to the
/// embedder individually fits (SPEC_FULL.md §4.F.5, §8 invariant 4).
pub fn expand_oversized_pieces(pieces: Vec<ChunkPiece>, max_batch_tokens: usize) -> Vec<ChunkPiece> {
    let mut expanded = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if estimate_tokens(&piece.text) > max_batch_tokens {
            for text in split_oversized(&piece.text, max_batch_tokens) {
                expanded.push(ChunkPiece { text, page: piece.page });
            }
        } else {
            expanded.push(piece);
        }
    }
    expanded
}
