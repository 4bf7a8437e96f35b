use crate::processor::{IngestOutcome, IngestionError, IngestionPipeline};
use alayasiki_core::ingest::{Identity, IngestRequest};

/// Ingests one path or byte buffer outside of any job (SPEC_FULL.md §4.F
/// supplemental). Used by connector-driven single-file re-ingestion and by
/// direct synchronous callers that don't need Task Engine bookkeeping; it
/// runs the exact same algorithm as the bulk path.
pub async fn ingest_single_path(
    pipeline: &IngestionPipeline,
    path: impl Into<String>,
    identity: Identity,
) -> Result<IngestOutcome, IngestionError> {
    let request = IngestRequest::from_path(path, identity);
    pipeline.ingest(request).await
}

pub async fn ingest_single_upload(
    pipeline: &IngestionPipeline,
    content: Vec<u8>,
    display_filename: impl Into<String>,
    mime_type: impl Into<String>,
    identity: Identity,
) -> Result<IngestOutcome, IngestionError> {
    let request = IngestRequest::upload(content, display_filename, mime_type, identity);
    pipeline.ingest(request).await
}
