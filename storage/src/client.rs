use crate::error::StoreError;
use alayasiki_core::config::StoreConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Abstraction over the external hybrid search index. Implementations speak
/// whatever wire protocol the backing store uses; callers only see
/// documents, mappings, and query bodies as JSON.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn indices_exists(&self, index: &str) -> Result<bool, StoreError>;
    async fn indices_create(&self, index: &str, body: Value) -> Result<(), StoreError>;
    async fn put_mapping(&self, index: &str, body: Value) -> Result<(), StoreError>;
    async fn get_mapping(&self, index: &str) -> Result<Value, StoreError>;

    async fn index(&self, index: &str, id: &str, body: Value) -> Result<(), StoreError>;
    async fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> Result<BulkResult, StoreError>;
    async fn exists(&self, index: &str, id: &str) -> Result<bool, StoreError>;
    async fn update(&self, index: &str, id: &str, partial: Value) -> Result<(), StoreError>;
    async fn delete(&self, index: &str, id: &str) -> Result<(), StoreError>;
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, StoreError>;
    async fn search(&self, index: &str, body: Value) -> Result<Value, StoreError>;
    async fn count(&self, index: &str, body: Option<Value>) -> Result<u64, StoreError>;
}

/// One document in a bulk indexing request.
#[derive(Debug, Clone)]
pub struct BulkAction {
    pub id: String,
    pub body: Value,
}

#[derive(Debug, Default, Clone)]
pub struct BulkResult {
    pub took_ms: u64,
    pub errors: bool,
    pub failed_ids: Vec<String>,
}

/// `IndexStore` implementation backed by an OpenSearch-compatible HTTP API.
pub struct OpenSearchIndexStore {
    http: reqwest::Client,
    base_url: String,
    auth: Option<(String, String)>,
}

impl OpenSearchIndexStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let scheme = if config.tls_verify { "https" } else { "http" };
        let base_url = format!("{}://{}:{}", scheme, config.host, config.port);

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.tls_verify)
            .timeout(Duration::from_secs(30))
            .build()?;

        let auth = match (&config.username, &config.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        };

        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, url);
        if let Some((user, pass)) = &self.auth {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    async fn send_json(&self, req: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout
            } else {
                StoreError::Request(e)
            }
        })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() && status.as_u16() != 404 {
            warn!(%status, "store returned non-success status");
            return Err(StoreError::Rejected(format!(
                "status {}: {}",
                status, body
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl IndexStore for OpenSearchIndexStore {
    async fn indices_exists(&self, index: &str) -> Result<bool, StoreError> {
        let req = self.request(reqwest::Method::HEAD, &format!("/{}", index));
        let response = req.send().await.map_err(StoreError::Request)?;
        Ok(response.status().is_success())
    }

    async fn indices_create(&self, index: &str, body: Value) -> Result<(), StoreError> {
        debug!(index, "creating index");
        let req = self
            .request(reqwest::Method::PUT, &format!("/{}", index))
            .json(&body);
        self.send_json(req).await?;
        Ok(())
    }

    async fn put_mapping(&self, index: &str, body: Value) -> Result<(), StoreError> {
        let req = self
            .request(reqwest::Method::PUT, &format!("/{}/_mapping", index))
            .json(&body);
        self.send_json(req).await?;
        Ok(())
    }

    async fn get_mapping(&self, index: &str) -> Result<Value, StoreError> {
        let req = self.request(reqwest::Method::GET, &format!("/{}/_mapping", index));
        self.send_json(req).await
    }

    async fn index(&self, index: &str, id: &str, body: Value) -> Result<(), StoreError> {
        let req = self
            .request(reqwest::Method::PUT, &format!("/{}/_doc/{}", index, id))
            .json(&body);
        self.send_json(req).await?;
        Ok(())
    }

    async fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> Result<BulkResult, StoreError> {
        let mut payload = String::new();
        for action in &actions {
            payload.push_str(
                &serde_json::to_string(&serde_json::json!({
                    "index": { "_index": index, "_id": action.id }
                }))?,
            );
            payload.push('\n');
            payload.push_str(&serde_json::to_string(&action.body)?);
            payload.push('\n');
        }

        let req = self
            .request(reqwest::Method::POST, "/_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(payload);
        let response = self.send_json(req).await?;

        let took_ms = response.get("took").and_then(Value::as_u64).unwrap_or(0);
        let errors = response
            .get("errors")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut failed_ids = Vec::new();
        if errors {
            if let Some(items) = response.get("items").and_then(Value::as_array) {
                for item in items {
                    if let Some(index_result) = item.get("index") {
                        let status = index_result.get("status").and_then(Value::as_u64);
                        if matches!(status, Some(s) if s >= 300) {
                            if let Some(id) = index_result.get("_id").and_then(Value::as_str) {
                                failed_ids.push(id.to_string());
                            }
                        }
                    }
                }
            }
        }

        Ok(BulkResult {
            took_ms,
            errors,
            failed_ids,
        })
    }

    async fn exists(&self, index: &str, id: &str) -> Result<bool, StoreError> {
        let req = self.request(
            reqwest::Method::HEAD,
            &format!("/{}/_doc/{}", index, id),
        );
        let response = req.send().await.map_err(StoreError::Request)?;
        Ok(response.status().is_success())
    }

    async fn update(&self, index: &str, id: &str, partial: Value) -> Result<(), StoreError> {
        let body = serde_json::json!({ "doc": partial });
        let req = self
            .request(reqwest::Method::POST, &format!("/{}/_update/{}", index, id))
            .json(&body);
        self.send_json(req).await?;
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), StoreError> {
        let req = self.request(
            reqwest::Method::DELETE,
            &format!("/{}/_doc/{}", index, id),
        );
        self.send_json(req).await?;
        Ok(())
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let req = self.request(reqwest::Method::GET, &format!("/{}/_doc/{}", index, id));
        let body = self.send_json(req).await?;
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        Ok(body.get("_source").cloned())
    }

    async fn search(&self, index: &str, body: Value) -> Result<Value, StoreError> {
        let req = self
            .request(reqwest::Method::POST, &format!("/{}/_search", index))
            .json(&body);
        self.send_json(req).await
    }

    async fn count(&self, index: &str, body: Option<Value>) -> Result<u64, StoreError> {
        let mut req = self.request(reqwest::Method::POST, &format!("/{}/_count", index));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = self.send_json(req).await?;
        Ok(response.get("count").and_then(Value::as_u64).unwrap_or(0))
    }
}
