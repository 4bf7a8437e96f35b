use crate::filters::{coerce_explicit, coerce_semantic_map};
use alayasiki_core::embedding::embedding_field_name;
use alayasiki_core::error::{AlayasikiError, ErrorCode};
use ingestion::embedding::Embedder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use storage::{IndexStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

const LEGACY_VECTOR_FIELD: &str = "chunk_embedding";
const SOURCE_FIELDS: [&str; 9] = [
    "filename",
    "mimetype",
    "page",
    "text",
    "source_url",
    "owner",
    "embedding_model",
    "allowed_users",
    "allowed_groups",
];

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("search requires an authenticated user")]
    Unauthenticated,
    #[error("no embedding model could embed the query")]
    EmbeddingUnavailable,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AlayasikiError for QueryError {
    fn error_code(&self) -> ErrorCode {
        match self {
            QueryError::Unauthenticated => ErrorCode::Unauthenticated,
            QueryError::EmbeddingUnavailable => ErrorCode::EmbeddingUnavailable,
            QueryError::Store(e) => e.error_code(),
        }
    }
}

/// `identity` input of SPEC_FULL.md §4.K — distinct from ingestion's
/// `Identity` (which carries ownership fields); here absence of `user_id`
/// is itself the failure the operation reports.
#[derive(Debug, Clone, Default)]
pub struct SearchIdentity {
    pub user_id: Option<String>,
    pub jwt_token: Option<String>,
}

impl SearchIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            jwt_token: None,
        }
    }
}

/// The two shapes `filters` may take (SPEC_FULL.md §4.K.1).
#[derive(Debug, Clone)]
pub enum FilterInput {
    /// Already-built term/terms clauses, plus overrides for limit/score
    /// threshold carried alongside them in the explicit shape.
    Explicit(Vec<Value>),
    /// `data_sources`/`document_types`/`owners`/arbitrary key -> values.
    SemanticMap(HashMap<String, Vec<String>>),
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub filters: Option<FilterInput>,
    pub limit: u32,
    pub score_threshold: f32,
    pub num_candidates: u64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            filters: None,
            limit: 10,
            score_threshold: 0.0,
            num_candidates: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub page_content: String,
    pub metadata: Value,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub aggregations: Value,
}

/// Multi-model hybrid retrieval (SPEC_FULL.md §4.K). Fans a query out across
/// every embedding model present in the index, combines per-model kNN with
/// lexical matching, and degrades gracefully when a model's vector field
/// isn't in the mapping yet.
pub struct HybridSearch {
    store: Arc<dyn IndexStore>,
    index_name: String,
    embedder: Arc<dyn Embedder>,
    default_model_id: String,
}

impl HybridSearch {
    pub fn new(
        store: Arc<dyn IndexStore>,
        index_name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        default_model_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index_name: index_name.into(),
            embedder,
            default_model_id: default_model_id.into(),
        }
    }

    pub async fn search(
        &self,
        query_text: &str,
        identity: &SearchIdentity,
        options: SearchOptions,
    ) -> Result<SearchResponse, QueryError> {
        if identity.user_id.is_none() {
            return Err(QueryError::Unauthenticated);
        }

        let filter_clauses = self.coerce_filters(&options);

        let models = self.discover_models(&filter_clauses).await;
        let embedded = self.embed_query_fanout(query_text, &models).await?;

        let mapping = self.store.get_mapping(&self.index_name).await.ok();
        let selected = self.validate_fields(&embedded, mapping.as_ref());

        if selected.is_empty() {
            info!("no embedding model has a validated vector field; returning empty results");
            return Ok(SearchResponse::default());
        }

        let body = self.assemble_query(
            query_text,
            &selected,
            Some(options.num_candidates),
            None,
            &filter_clauses,
            options.limit,
            options.score_threshold,
        );

        let raw = self
            .execute_with_fallback(body, query_text, &selected, &filter_clauses, &options)
            .await?;

        Ok(self.shape_response(raw))
    }

    fn coerce_filters(&self, options: &SearchOptions) -> Vec<Value> {
        match &options.filters {
            None => Vec::new(),
            Some(FilterInput::Explicit(clauses)) => coerce_explicit(clauses),
            Some(FilterInput::SemanticMap(map)) => coerce_semantic_map(map),
        }
    }

    /// Model discovery: aggregate on `embedding_model` within the user's
    /// filters, falling back to the configured default when the index is
    /// empty or the filters exclude everything (SPEC_FULL.md §4.K.2).
    async fn discover_models(&self, filter_clauses: &[Value]) -> Vec<String> {
        let body = serde_json::json!({
            "size": 0,
            "query": { "bool": { "filter": filter_clauses } },
            "aggs": {
                "embedding_models": { "terms": { "field": "embedding_model", "size": 10 } }
            }
        });

        match self.store.search(&self.index_name, body).await {
            Ok(response) => {
                let buckets = response["aggregations"]["embedding_models"]["buckets"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default();
                let models: Vec<String> = buckets
                    .iter()
                    .filter_map(|b| b["key"].as_str().map(str::to_string))
                    .collect();
                if models.is_empty() {
                    vec![self.default_model_id.clone()]
                } else {
                    models
                }
            }
            Err(err) => {
                warn!(error = %err, "model discovery aggregation failed, using default model");
                vec![self.default_model_id.clone()]
            }
        }
    }

    /// Embeds the query text once per discovered model, in parallel
    /// (SPEC_FULL.md §4.K.3). Fails only if every model's embed call fails.
    async fn embed_query_fanout(
        &self,
        query_text: &str,
        models: &[String],
    ) -> Result<Vec<(String, Vec<f32>)>, QueryError> {
        let query_text = query_text.to_string();
        let futures = models.iter().cloned().map(|model| {
            let embedder = self.embedder.clone();
            let query_text = query_text.clone();
            async move {
                let text = vec![query_text];
                embedder
                    .embed_batch(&text, &model)
                    .await
                    .map(|mut vectors| (model, vectors.remove(0)))
            }
        });

        let outcomes = futures::future::join_all(futures).await;

        let mut embedded = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(pair) => embedded.push(pair),
                Err(err) => warn!(error = %err, "query embedding failed for one model"),
            }
        }

        if embedded.is_empty() {
            return Err(QueryError::EmbeddingUnavailable);
        }
        Ok(embedded)
    }

    /// Drops any model whose expected vector field isn't a `knn_vector` in
    /// the current mapping (SPEC_FULL.md §4.K.4).
    fn validate_fields(
        &self,
        embedded: &[(String, Vec<f32>)],
        mapping: Option<&Value>,
    ) -> Vec<(String, String, Vec<f32>)> {
        let properties = mapping.and_then(|m| {
            m.as_object()?
                .values()
                .next()
                .and_then(|index| index.get("mappings"))
                .and_then(|m| m.get("properties"))
                .or_else(|| m.get("properties"))
        });

        embedded
            .iter()
            .filter_map(|(model, vector)| {
                let field = embedding_field_name(model);
                let is_knn = properties
                    .and_then(|p| p.get(&field))
                    .and_then(|f| f.get("type"))
                    .and_then(Value::as_str)
                    == Some("knn_vector");
                if is_knn {
                    Some((model.clone(), field, vector.clone()))
                } else {
                    None
                }
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_query(
        &self,
        query_text: &str,
        selected: &[(String, String, Vec<f32>)],
        num_candidates: Option<u64>,
        field_override: Option<&str>,
        filter_clauses: &[Value],
        limit: u32,
        score_threshold: f32,
    ) -> Value {
        let knn_queries: Vec<Value> = selected
            .iter()
            .map(|(_, field, vector)| {
                let field = field_override.unwrap_or(field);
                let mut knn = serde_json::json!({ "vector": vector, "k": 50 });
                if let Some(nc) = num_candidates {
                    if nc > 0 {
                        knn["num_candidates"] = serde_json::json!(nc);
                    }
                }
                serde_json::json!({ "knn": { field: knn } })
            })
            .collect();

        let dis_max = serde_json::json!({
            "dis_max": { "tie_breaker": 0.0, "boost": 0.7, "queries": knn_queries }
        });

        let multi_match = serde_json::json!({
            "multi_match": {
                "query": query_text,
                "fields": ["text^2", "filename^1.5"],
                "type": "best_fields",
                "fuzziness": "AUTO",
                "boost": 0.3
            }
        });

        let field_exists: Vec<Value> = selected
            .iter()
            .map(|(_, field, _)| {
                let field = field_override.unwrap_or(field);
                serde_json::json!({ "exists": { "field": field } })
            })
            .collect();

        let mut filter = filter_clauses.to_vec();
        filter.push(serde_json::json!({
            "bool": { "should": field_exists, "minimum_should_match": 1 }
        }));

        let mut body = serde_json::json!({
            "size": limit,
            "_source": SOURCE_FIELDS,
            "query": {
                "bool": {
                    "should": [dis_max, multi_match],
                    "minimum_should_match": 1,
                    "filter": filter
                }
            },
            "aggs": {
                "data_sources": { "terms": { "field": "filename", "size": 20 } },
                "document_types": { "terms": { "field": "mimetype", "size": 10 } },
                "owners": { "terms": { "field": "owner", "size": 10 } },
                "embedding_models": { "terms": { "field": "embedding_model", "size": 10 } }
            }
        });

        if score_threshold > 0.0 {
            body["min_score"] = serde_json::json!(score_threshold);
        }

        body
    }

    async fn execute_with_fallback(
        &self,
        body: Value,
        query_text: &str,
        selected: &[(String, String, Vec<f32>)],
        filter_clauses: &[Value],
        options: &SearchOptions,
    ) -> Result<Value, QueryError> {
        match self.store.search(&self.index_name, body).await {
            Ok(response) => Ok(response),
            Err(StoreError::Rejected(message)) if mentions_num_candidates(&message) => {
                warn!("store rejected num_candidates, retrying without it");
                let retried = self.assemble_query(
                    query_text,
                    selected,
                    None,
                    None,
                    filter_clauses,
                    options.limit,
                    options.score_threshold,
                );
                Ok(self.store.search(&self.index_name, retried).await?)
            }
            Err(StoreError::Rejected(message)) if mentions_unknown_field(&message) => {
                warn!("store rejected the model-specific field, retrying against the legacy field");
                let legacy = selected.first().cloned().into_iter().collect::<Vec<_>>();
                let retried = self.assemble_query(
                    query_text,
                    &legacy,
                    Some(options.num_candidates),
                    Some(LEGACY_VECTOR_FIELD),
                    filter_clauses,
                    options.limit,
                    options.score_threshold,
                );
                Ok(self.store.search(&self.index_name, retried).await?)
            }
            Err(other) => Err(QueryError::Store(other)),
        }
    }

    fn shape_response(&self, raw: Value) -> SearchResponse {
        let hits = raw["hits"]["hits"].as_array().cloned().unwrap_or_default();

        let results = hits
            .into_iter()
            .map(|hit| {
                let mut source = hit["_source"].clone();
                let text = source
                    .as_object_mut()
                    .and_then(|obj| obj.remove("text"))
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let score = hit["_score"].as_f64().unwrap_or(0.0);

                SearchResult {
                    page_content: text,
                    metadata: source,
                    score,
                }
            })
            .collect();

        let aggregations = raw.get("aggregations").cloned().unwrap_or_else(|| serde_json::json!({}));

        SearchResponse {
            results,
            aggregations,
        }
    }
}

fn mentions_num_candidates(message: &str) -> bool {
    message.to_lowercase().contains("num_candidates")
}

fn mentions_unknown_field(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("no mapping found")
        || lowered.contains("unknown knn_vector field")
        || lowered.contains("failed to find")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestion::embedding::DeterministicEmbedder;
    use storage::InMemoryIndexStore;

    fn search_engine(store: Arc<InMemoryIndexStore>) -> HybridSearch {
        HybridSearch::new(
            store,
            "documents",
            Arc::new(DeterministicEmbedder::new(8)),
            "embedding-default-v1",
        )
    }

    #[tokio::test]
    async fn search_without_user_id_is_unauthenticated() {
        let store = Arc::new(InMemoryIndexStore::new());
        store.indices_create("documents", serde_json::json!({})).await.unwrap();
        let engine = search_engine(store);

        let err = engine
            .search("hello", &SearchIdentity::default(), SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Unauthenticated));
    }

    #[tokio::test]
    async fn search_against_empty_index_returns_empty_results_not_an_error() {
        let store = Arc::new(InMemoryIndexStore::new());
        store.indices_create("documents", serde_json::json!({})).await.unwrap();
        let engine = search_engine(store);

        let response = engine
            .search("hello", &SearchIdentity::new("alice"), SearchOptions::default())
            .await
            .unwrap();
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn search_against_index_missing_mapping_returns_empty_results() {
        // get_mapping fails (index never created) -> field validation drops
        // every candidate -> the operation still succeeds with no results.
        let store = Arc::new(InMemoryIndexStore::new());
        let engine = search_engine(store);

        let response = engine
            .search("hello", &SearchIdentity::new("alice"), SearchOptions::default())
            .await
            .unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.aggregations, serde_json::json!({}));
    }

    #[tokio::test]
    async fn filter_coercion_empty_semantic_selection_excludes_everything() {
        let store = Arc::new(InMemoryIndexStore::new());
        store.indices_create("documents", serde_json::json!({})).await.unwrap();
        let engine = search_engine(store);

        let mut filters = HashMap::new();
        filters.insert("data_sources".to_string(), vec![]);

        let options = SearchOptions {
            filters: Some(FilterInput::SemanticMap(filters)),
            ..Default::default()
        };

        let response = engine
            .search("hello", &SearchIdentity::new("alice"), options)
            .await
            .unwrap();
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn search_with_validated_field_finds_indexed_chunk() {
        let store = Arc::new(InMemoryIndexStore::new());
        store.indices_create("documents", serde_json::json!({})).await.unwrap();
        store
            .put_mapping(
                "documents",
                serde_json::json!({ "properties": { "chunk_embedding_embedding_default_v1": { "type": "knn_vector" } } }),
            )
            .await
            .unwrap();
        store
            .index(
                "documents",
                "doc_0",
                serde_json::json!({
                    "text": "the quick brown fox",
                    "filename": "fox.txt",
                    "mimetype": "text/plain",
                    "owner": "alice",
                    "embedding_model": "embedding-default-v1",
                }),
            )
            .await
            .unwrap();

        let engine = search_engine(store);
        let response = engine
            .search("fox", &SearchIdentity::new("alice"), SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].page_content, "the quick brown fox");
        assert_eq!(response.results[0].metadata["filename"], "fox.txt");
        assert!(!response.results[0].metadata.as_object().unwrap().contains_key("text"));
    }
}
