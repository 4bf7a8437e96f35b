use crate::client::{BulkAction, BulkResult, IndexStore};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::RwLock;

/// In-process `IndexStore` test double. Keeps documents and a flat mapping
/// per index; `search` does a best-effort term match good enough for
/// exercising query-construction code without a live backend.
#[derive(Default)]
pub struct InMemoryIndexStore {
    mappings: DashMap<String, Value>,
    documents: DashMap<String, DashMap<String, Value>>,
    deleted: RwLock<Vec<(String, String)>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.documents
            .get(index)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    pub fn deleted_ids(&self) -> Vec<(String, String)> {
        self.deleted.read().unwrap().clone()
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn indices_exists(&self, index: &str) -> Result<bool, StoreError> {
        Ok(self.mappings.contains_key(index))
    }

    async fn indices_create(&self, index: &str, _body: Value) -> Result<(), StoreError> {
        self.mappings
            .entry(index.to_string())
            .or_insert_with(|| serde_json::json!({ "properties": {} }));
        self.documents.entry(index.to_string()).or_default();
        Ok(())
    }

    async fn put_mapping(&self, index: &str, body: Value) -> Result<(), StoreError> {
        let mut mapping = self
            .mappings
            .entry(index.to_string())
            .or_insert_with(|| serde_json::json!({ "properties": {} }));

        if let (Some(existing), Some(incoming)) = (
            mapping.get_mut("properties").and_then(Value::as_object_mut),
            body.get("properties").and_then(Value::as_object),
        ) {
            for (key, value) in incoming {
                existing.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn get_mapping(&self, index: &str) -> Result<Value, StoreError> {
        self.mappings
            .get(index)
            .map(|m| m.clone())
            .ok_or_else(|| StoreError::IndexNotFound(index.to_string()))
    }

    async fn index(&self, index: &str, id: &str, body: Value) -> Result<(), StoreError> {
        let docs = self.documents.entry(index.to_string()).or_default();
        docs.insert(id.to_string(), body);
        Ok(())
    }

    async fn bulk(&self, index: &str, actions: Vec<BulkAction>) -> Result<BulkResult, StoreError> {
        let docs = self.documents.entry(index.to_string()).or_default();
        for action in &actions {
            docs.insert(action.id.clone(), action.body.clone());
        }
        Ok(BulkResult {
            took_ms: 0,
            errors: false,
            failed_ids: Vec::new(),
        })
    }

    async fn exists(&self, index: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .documents
            .get(index)
            .map(|docs| docs.contains_key(id))
            .unwrap_or(false))
    }

    async fn update(&self, index: &str, id: &str, partial: Value) -> Result<(), StoreError> {
        let docs = self.documents.entry(index.to_string()).or_default();
        let mut entry = docs
            .get(id)
            .map(|v| v.clone())
            .unwrap_or_else(|| serde_json::json!({}));

        if let (Some(existing), Some(incoming)) =
            (entry.as_object_mut(), partial.as_object())
        {
            for (key, value) in incoming {
                existing.insert(key.clone(), value.clone());
            }
        }
        docs.insert(id.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), StoreError> {
        if let Some(docs) = self.documents.get(index) {
            docs.remove(id);
        }
        self.deleted
            .write()
            .unwrap()
            .push((index.to_string(), id.to_string()));
        Ok(())
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .documents
            .get(index)
            .and_then(|docs| docs.get(id).map(|v| v.clone())))
    }

    async fn search(&self, index: &str, body: Value) -> Result<Value, StoreError> {
        let docs = match self.documents.get(index) {
            Some(docs) => docs,
            None => return Ok(serde_json::json!({ "hits": { "total": { "value": 0 }, "hits": [] } })),
        };

        let size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;

        let mut hits: Vec<Value> = docs
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "_id": entry.key(),
                    "_score": 1.0,
                    "_source": entry.value(),
                })
            })
            .collect();

        hits.truncate(size);

        Ok(serde_json::json!({
            "hits": {
                "total": { "value": hits.len() },
                "hits": hits,
            }
        }))
    }

    async fn count(&self, index: &str, _body: Option<Value>) -> Result<u64, StoreError> {
        Ok(self.document_count(index) as u64)
    }
}
