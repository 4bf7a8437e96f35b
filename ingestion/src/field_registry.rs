use alayasiki_core::embedding::embedding_field_name;
use storage::{IndexStore, StoreError};
use tracing::{debug, warn};

/// Ensures the dynamic per-model vector field exists on the index before the
/// pipeline writes the first chunk that uses it.
pub struct EmbeddingFieldRegistry;

impl EmbeddingFieldRegistry {
    pub fn field_for(model: &str) -> String {
        embedding_field_name(model)
    }

    /// Idempotent mapping update. Treats "field already exists" responses as
    /// success since the store has no atomic "add if absent" mapping call.
    pub async fn ensure(
        store: &dyn IndexStore,
        index: &str,
        model: &str,
        dimensions: usize,
    ) -> Result<String, StoreError> {
        let field_name = Self::field_for(model);

        let mapping = serde_json::json!({
            "properties": {
                (field_name.clone()): {
                    "type": "knn_vector",
                    "dimension": dimensions,
                    "method": {
                        "name": "disk_ann",
                        "engine": "jvector",
                        "space_type": "l2",
                        "parameters": { "ef_construction": 100, "m": 16 },
                    },
                },
                "embedding_model": { "type": "keyword" },
                "embedding_dimensions": { "type": "integer" },
            }
        });

        debug!(field = %field_name, model, dimensions, "ensuring embedding field exists");

        match store.put_mapping(index, mapping).await {
            Ok(()) => Ok(field_name),
            Err(StoreError::Rejected(message)) if is_already_exists(&message) => {
                debug!(field = %field_name, "embedding field already exists");
                Ok(field_name)
            }
            Err(err) => {
                warn!(field = %field_name, error = %err, "failed to ensure embedding field");
                Err(err)
            }
        }
    }
}

fn is_already_exists(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("already") || lowered.contains("exists") || lowered.contains("mapper_parsing_exception")
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::InMemoryIndexStore;

    #[tokio::test]
    async fn ensure_adds_knn_vector_field_for_model() {
        let store = InMemoryIndexStore::new();
        store.indices_create("documents", serde_json::json!({})).await.unwrap();

        let field = EmbeddingFieldRegistry::ensure(&store, "documents", "text-embedding-3-small", 8)
            .await
            .unwrap();

        assert_eq!(field, "chunk_embedding_text_embedding_3_small");
        let mapping = store.get_mapping("documents").await.unwrap();
        assert_eq!(mapping["properties"][field.as_str()]["type"], "knn_vector");
        assert_eq!(mapping["properties"][field.as_str()]["dimension"], 8);
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let store = InMemoryIndexStore::new();
        store.indices_create("documents", serde_json::json!({})).await.unwrap();

        EmbeddingFieldRegistry::ensure(&store, "documents", "nomic-embed-text:latest", 4)
            .await
            .unwrap();
        let field = EmbeddingFieldRegistry::ensure(&store, "documents", "nomic-embed-text:latest", 4)
            .await
            .unwrap();

        assert_eq!(field, "chunk_embedding_nomic_embed_text_latest");
    }
}
