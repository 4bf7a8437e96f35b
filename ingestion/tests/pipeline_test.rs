use alayasiki_core::error::{AlayasikiError, ErrorCode};
use alayasiki_core::ingest::{hash_document, Identity, IngestRequest};
use ingestion::chunker::SemanticChunker;
use ingestion::embedding::DeterministicEmbedder;
use ingestion::processor::{IngestStatus, IngestionPipeline};
use std::sync::Arc;
use storage::InMemoryIndexStore;

fn pipeline(store: Arc<InMemoryIndexStore>) -> IngestionPipeline {
    IngestionPipeline::with_components(
        store,
        "documents",
        Box::new(SemanticChunker::default()),
        Box::new(DeterministicEmbedder::new(8)),
        "embedding-default-v1",
        8000,
    )
}

#[tokio::test]
async fn ingest_rejects_unsupported_content_type() {
    let store = Arc::new(InMemoryIndexStore::new());
    store.indices_create("documents", serde_json::json!({})).await.unwrap();
    let pipeline = pipeline(store);

    let request = IngestRequest::upload(
        b"binary blob".to_vec(),
        "file.exe",
        "application/x-msdownload",
        Identity::public(),
    );

    let err = pipeline.ingest(request).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvalidInput);
}

#[tokio::test]
async fn owner_identity_is_carried_onto_indexed_chunks() {
    let store = Arc::new(InMemoryIndexStore::new());
    store.indices_create("documents", serde_json::json!({})).await.unwrap();
    let pipeline = pipeline(store.clone());

    let identity = Identity {
        owner_user_id: Some("user-42".to_string()),
        owner_name: Some("Ada".to_string()),
        owner_email: None,
        jwt_token: None,
    };
    let request = IngestRequest::upload(b"owned content".to_vec(), "owned.txt", "text/plain", identity);

    let outcome = pipeline.ingest(request).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Indexed);

    let doc_id = hash_document(b"owned content", Some("owned.txt"));
    let chunk = store
        .get("documents", &format!("{}_0", doc_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chunk["owner"], "user-42");
}

#[tokio::test]
async fn public_ingestion_omits_owner_field() {
    let store = Arc::new(InMemoryIndexStore::new());
    store.indices_create("documents", serde_json::json!({})).await.unwrap();
    let pipeline = pipeline(store.clone());

    let request = IngestRequest::upload(
        b"anonymous content".to_vec(),
        "anon.txt",
        "text/plain",
        Identity::public(),
    );

    pipeline.ingest(request).await.unwrap();

    let doc_id = hash_document(b"anonymous content", Some("anon.txt"));
    let chunk = store
        .get("documents", &format!("{}_0", doc_id))
        .await
        .unwrap()
        .unwrap();
    assert!(chunk.get("owner").is_none());
}
