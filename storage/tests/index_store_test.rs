use storage::{InMemoryIndexStore, IndexStore};

#[tokio::test]
async fn creates_index_and_reports_existence() {
    let store = InMemoryIndexStore::new();
    assert!(!store.indices_exists("documents").await.unwrap());

    store
        .indices_create("documents", serde_json::json!({}))
        .await
        .unwrap();

    assert!(store.indices_exists("documents").await.unwrap());
}

#[tokio::test]
async fn bulk_indexes_documents_and_search_returns_them() {
    let store = InMemoryIndexStore::new();
    store
        .indices_create("documents", serde_json::json!({}))
        .await
        .unwrap();

    let actions = vec![
        storage::BulkAction {
            id: "doc_0".to_string(),
            body: serde_json::json!({ "text": "first chunk" }),
        },
        storage::BulkAction {
            id: "doc_1".to_string(),
            body: serde_json::json!({ "text": "second chunk" }),
        },
    ];

    let result = store.bulk("documents", actions).await.unwrap();
    assert!(!result.errors);

    let count = store.count("documents", None).await.unwrap();
    assert_eq!(count, 2);

    let search = store
        .search("documents", serde_json::json!({ "size": 10 }))
        .await
        .unwrap();
    assert_eq!(search["hits"]["total"]["value"], 2);
}

#[tokio::test]
async fn update_merges_fields_without_overwriting_whole_document() {
    let store = InMemoryIndexStore::new();
    store
        .indices_create("documents", serde_json::json!({}))
        .await
        .unwrap();
    store
        .index(
            "documents",
            "doc_0",
            serde_json::json!({ "text": "hello", "owner": "alice" }),
        )
        .await
        .unwrap();

    store
        .update("documents", "doc_0", serde_json::json!({ "owner": "bob" }))
        .await
        .unwrap();

    let doc = store.get("documents", "doc_0").await.unwrap().unwrap();
    assert_eq!(doc["text"], "hello");
    assert_eq!(doc["owner"], "bob");
}
