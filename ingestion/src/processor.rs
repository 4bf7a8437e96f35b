use crate::chunker::{chunk_document, expand_oversized_pieces, ChunkPiece, Chunker, SemanticChunker};
use crate::embedding::{embed_with_retry, estimate_tokens, group_by_token_budget, DeterministicEmbedder, Embedder, EmbeddingError};
use crate::extract::{parse_document, ExtractError};
use crate::field_registry::EmbeddingFieldRegistry;
use alayasiki_core::error::{AlayasikiError, ErrorCode};
use alayasiki_core::ingest::{hash_document, IngestRequest, IngestSource};
use alayasiki_core::model::Chunk;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use storage::{IndexStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to read source file: {0}")]
    Io(#[from] std::io::Error),
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),
    #[error("embedding provider unavailable: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("document parser worker crashed")]
    WorkerCrashed,
}

impl AlayasikiError for IngestionError {
    fn error_code(&self) -> ErrorCode {
        match self {
            IngestionError::Store(e) => e.error_code(),
            IngestionError::Io(_) => ErrorCode::InvalidInput,
            IngestionError::Extraction(_) => ErrorCode::InvalidInput,
            IngestionError::Embedding(_) => ErrorCode::EmbeddingUnavailable,
            IngestionError::WorkerCrashed => ErrorCode::WorkerCrashed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Indexed,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub document_id: String,
}

pub struct IngestionPipeline {
    store: Arc<dyn IndexStore>,
    index_name: String,
    chunker: Box<dyn Chunker>,
    embedder: Box<dyn Embedder>,
    default_model_id: String,
    max_batch_tokens: usize,
    // Guards against two concurrent calls for the same document racing each
    // other through the dedup check and both proceeding to index.
    locks: Arc<DashMap<String, ()>>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn IndexStore>, index_name: impl Into<String>, default_model_id: impl Into<String>) -> Self {
        Self {
            store,
            index_name: index_name.into(),
            chunker: Box::new(SemanticChunker::default()),
            embedder: Box::new(DeterministicEmbedder::default()),
            default_model_id: default_model_id.into(),
            max_batch_tokens: 8000,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn with_components(
        store: Arc<dyn IndexStore>,
        index_name: impl Into<String>,
        chunker: Box<dyn Chunker>,
        embedder: Box<dyn Embedder>,
        default_model_id: impl Into<String>,
        max_batch_tokens: usize,
    ) -> Self {
        Self {
            store,
            index_name: index_name.into(),
            chunker,
            embedder,
            default_model_id: default_model_id.into(),
            max_batch_tokens,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestionError> {
        let display_filename = request.source.display_filename().map(str::to_string);
        let (bytes, mime_type) = self.resolve_bytes(&request.source).await?;

        let document_id = hash_document(&bytes, display_filename.as_deref());
        let _guard = self.locks.entry(document_id.clone()).or_insert(());

        if self.document_exists(&document_id).await {
            self.locks.remove(&document_id);
            return Ok(IngestOutcome {
                status: IngestStatus::Unchanged,
                document_id,
            });
        }

        let result = self
            .ingest_new_document(&request, &document_id, bytes, mime_type, display_filename)
            .await;

        self.locks.remove(&document_id);
        result?;

        Ok(IngestOutcome {
            status: IngestStatus::Indexed,
            document_id,
        })
    }

    async fn resolve_bytes(&self, source: &IngestSource) -> Result<(Vec<u8>, String), IngestionError> {
        match source {
            IngestSource::Bytes {
                content, mime_type, ..
            } => Ok((content.clone(), mime_type.clone())),
            IngestSource::Path { path, .. } => {
                let bytes = tokio::fs::read(path).await?;
                let mime_type = mime_type_for_path(path);
                Ok((bytes, mime_type))
            }
        }
    }

    /// Existence check keyed on the document's first chunk id, which is the
    /// closest equivalent our `IndexStore` has to a "point query on
    /// document_id" (SPEC_FULL.md §4.F.2). Retries transient errors up to 3x
    /// with backoff (1s, 2s, 4s), then conservatively assumes "not exists".
    async fn document_exists(&self, document_id: &str) -> bool {
        let first_chunk_id = Chunk::chunk_id_for(document_id, 0);
        const DELAYS_MS: [u64; 3] = [1000, 2000, 4000];

        for (attempt, delay_ms) in DELAYS_MS.iter().enumerate() {
            match self.store.exists(&self.index_name, &first_chunk_id).await {
                Ok(exists) => return exists,
                Err(err) => {
                    warn!(attempt, error = %err, "dedup existence check failed, retrying");
                    if attempt + 1 < DELAYS_MS.len() {
                        tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                    }
                }
            }
        }

        warn!(document_id, "dedup existence check exhausted retries, assuming not exists");
        false
    }

    async fn ingest_new_document(
        &self,
        request: &IngestRequest,
        document_id: &str,
        bytes: Vec<u8>,
        mime_type: String,
        display_filename: Option<String>,
    ) -> Result<(), IngestionError> {
        let model_id = request
            .model_id
            .clone()
            .unwrap_or_else(|| self.default_model_id.clone());

        let filename = display_filename.unwrap_or_else(|| document_id.to_string());
        let parsed = self.parse_isolated(bytes, mime_type.clone(), filename.clone()).await?;

        let pieces = chunk_document(self.chunker.as_ref(), &parsed).await;
        let pieces = expand_oversized_pieces(pieces, self.max_batch_tokens);

        let dim = self.embedder.dim(&model_id);
        let field_name =
            EmbeddingFieldRegistry::ensure(self.store.as_ref(), &self.index_name, &model_id, dim).await?;

        let vectors = self.embed_pieces(&pieces, &model_id).await?;

        let acl = request
            .identity
            .to_access_control()
            .with_connector_acl(request.provenance.acl.as_ref());

        let mut provenance = request.provenance.clone();
        provenance.indexed_time = Some(chrono::Utc::now().to_rfc3339());

        for (ordinal, (piece, vector)) in pieces.into_iter().zip(vectors.into_iter()).enumerate() {
            let chunk_id = Chunk::chunk_id_for(document_id, ordinal as u32);

            let mut vectors_map = std::collections::HashMap::new();
            vectors_map.insert(field_name.clone(), vector);

            let chunk = Chunk {
                chunk_id: chunk_id.clone(),
                document_id: document_id.to_string(),
                ordinal: ordinal as u32,
                page: piece.page,
                text: piece.text,
                mimetype: mime_type.clone(),
                filename: filename.clone(),
                vectors: vectors_map,
                embedding_model: model_id.clone(),
                embedding_dimensions: dim,
                acl: acl.clone(),
                provenance: provenance.clone(),
            };

            let body = serde_json::to_value(&chunk).map_err(StoreError::Serialization)?;
            self.store.index(&self.index_name, &chunk_id, body).await?;
        }

        info!(document_id, model_id, "document indexed");
        Ok(())
    }

    async fn embed_pieces(
        &self,
        pieces: &[ChunkPiece],
        model_id: &str,
    ) -> Result<Vec<Vec<f32>>, IngestionError> {
        let token_counts: Vec<usize> = pieces.iter().map(|p| estimate_tokens(&p.text)).collect();
        let batches = group_by_token_budget(&token_counts, self.max_batch_tokens);

        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); pieces.len()];
        for batch in batches {
            let texts: Vec<String> = batch.iter().map(|&i| pieces[i].text.clone()).collect();
            let embedded = embed_with_retry(self.embedder.as_ref(), &texts, model_id).await?;
            for (pos, &i) in batch.iter().enumerate() {
                vectors[i] = embedded[pos].clone();
            }
        }

        Ok(vectors)
    }

    /// Runs the CPU-heavy parser on a blocking thread and turns a panic into
    /// `WorkerCrashed`, matching the isolated-worker contract of SPEC_FULL.md
    /// §4.F.3 and §5 (a native crash in the parser must not take the service
    /// down with it).
    async fn parse_isolated(
        &self,
        bytes: Vec<u8>,
        mime_type: String,
        filename: String,
    ) -> Result<crate::extract::ParsedDocument, IngestionError> {
        let handle = tokio::task::spawn_blocking(move || {
            parse_document(&bytes, &mime_type, Some(&filename))
        });

        match handle.await {
            Ok(Ok(document)) => Ok(document),
            Ok(Err(err)) => Err(IngestionError::Extraction(err)),
            Err(_join_error) => Err(IngestionError::WorkerCrashed),
        }
    }
}

fn mime_type_for_path(path: &str) -> String {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alayasiki_core::ingest::{hash_document, Identity, IngestRequest};
    use storage::InMemoryIndexStore;

    fn pipeline() -> (IngestionPipeline, Arc<InMemoryIndexStore>) {
        let store = Arc::new(InMemoryIndexStore::new());
        let pipeline = IngestionPipeline::with_components(
            store.clone(),
            "documents",
            Box::new(SemanticChunker::default()),
            Box::new(DeterministicEmbedder::new(8)),
            "embedding-default-v1",
            8000,
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn ingests_markdown_upload_and_indexes_one_chunk() {
        let (pipeline, store) = pipeline();
        store.indices_create("documents", serde_json::json!({})).await.unwrap();

        let request = IngestRequest::upload(
            b"# Hello\n\nworld".to_vec(),
            "hello.md",
            "text/markdown",
            Identity::public(),
        );

        let outcome = pipeline.ingest(request).await.unwrap();

        assert_eq!(outcome.status, IngestStatus::Indexed);
        let expected_id = hash_document(b"# Hello\n\nworld", Some("hello.md"));
        assert_eq!(outcome.document_id, expected_id);

        let chunk = store
            .get("documents", &Chunk::chunk_id_for(&expected_id, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk["text"], "# Hello\n\nworld");
        assert_eq!(chunk["document_id"], expected_id);
    }

    #[tokio::test]
    async fn connector_acl_and_indexed_time_reach_the_stored_chunk() {
        use alayasiki_core::model::{AccessControl, Provenance};

        let (pipeline, store) = pipeline();
        store.indices_create("documents", serde_json::json!({})).await.unwrap();

        let mut request = IngestRequest::upload(
            b"hello from a connector".to_vec(),
            "connector.txt",
            "text/plain",
            Identity {
                owner_user_id: Some("alice".to_string()),
                ..Identity::public()
            },
        );
        request.provenance = Provenance {
            connector_type: "google_drive".to_string(),
            acl: Some(AccessControl {
                owner: Some("should-be-ignored".to_string()),
                allowed_users: vec!["bob".to_string()],
                allowed_groups: vec!["eng".to_string()],
                ..Default::default()
            }),
            ..Provenance::local()
        };

        let outcome = pipeline.ingest(request).await.unwrap();
        let chunk = store
            .get("documents", &Chunk::chunk_id_for(&outcome.document_id, 0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(chunk["owner"], "alice");
        assert_eq!(chunk["allowed_users"], serde_json::json!(["bob"]));
        assert_eq!(chunk["allowed_groups"], serde_json::json!(["eng"]));
        assert_eq!(chunk["connector_type"], "google_drive");
        assert!(chunk["indexed_time"].is_string());
    }

    #[tokio::test]
    async fn second_ingest_of_same_bytes_and_name_is_unchanged() {
        let (pipeline, store) = pipeline();
        store.indices_create("documents", serde_json::json!({})).await.unwrap();

        let make_request = || {
            IngestRequest::upload(
                b"repeat me".to_vec(),
                "repeat.txt",
                "text/plain",
                Identity::public(),
            )
        };

        let first = pipeline.ingest(make_request()).await.unwrap();
        assert_eq!(first.status, IngestStatus::Indexed);

        let count_after_first = store.document_count("documents");

        let second = pipeline.ingest(make_request()).await.unwrap();
        assert_eq!(second.status, IngestStatus::Unchanged);
        assert_eq!(second.document_id, first.document_id);
        assert_eq!(store.document_count("documents"), count_after_first);
    }
}
