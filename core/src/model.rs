use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Access-control fields carried on every chunk (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub allowed_groups: Vec<String>,
    #[serde(default)]
    pub user_permissions: HashMap<String, String>,
    #[serde(default)]
    pub group_permissions: HashMap<String, String>,
}

impl AccessControl {
    /// Overlays connector-supplied ACL fields (everything but `owner`, which
    /// comes from the ingest identity) onto this access control.
    pub fn with_connector_acl(mut self, connector_acl: Option<&AccessControl>) -> Self {
        if let Some(acl) = connector_acl {
            self.allowed_users = acl.allowed_users.clone();
            self.allowed_groups = acl.allowed_groups.clone();
            self.user_permissions = acl.user_permissions.clone();
            self.group_permissions = acl.group_permissions.clone();
        }
        self
    }
}

/// Provenance fields carried on every chunk (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub connector_type: String,
    pub source_url: Option<String>,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub indexed_time: Option<String>,
    pub file_size: Option<u64>,
    /// Connector-supplied ACL info beyond `owner` (SPEC_FULL.md §4.F), merged
    /// into the chunk's own `AccessControl` at index time rather than
    /// serialized here directly.
    #[serde(skip)]
    pub acl: Option<AccessControl>,
}

impl Provenance {
    pub fn local() -> Self {
        Self {
            connector_type: "local".to_string(),
            ..Default::default()
        }
    }
}

/// The unit of retrieval: one per `{document_id, ordinal}` (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: u32,
    pub page: Option<u32>,
    pub text: String,
    pub mimetype: String,
    pub filename: String,
    /// Vector(s) keyed by their dynamic field name, e.g. `chunk_embedding_text_embedding_3_small`.
    /// Flattened so each key becomes a top-level document field, matching the
    /// per-model `knn_vector` mapping a search query targets directly.
    #[serde(flatten, default)]
    pub vectors: HashMap<String, Vec<f32>>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    #[serde(flatten)]
    pub acl: AccessControl,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Chunk {
    pub fn chunk_id_for(document_id: &str, ordinal: u32) -> String {
        format!("{}_{}", document_id, ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_fields_serialize_at_the_top_level() {
        let mut vectors = HashMap::new();
        vectors.insert("chunk_embedding_embedding_default_v1".to_string(), vec![0.1, 0.2]);

        let chunk = Chunk {
            chunk_id: "doc_0".to_string(),
            document_id: "doc".to_string(),
            ordinal: 0,
            page: None,
            text: "hello".to_string(),
            mimetype: "text/plain".to_string(),
            filename: "hello.txt".to_string(),
            vectors,
            embedding_model: "embedding-default-v1".to_string(),
            embedding_dimensions: 2,
            acl: AccessControl::default(),
            provenance: Provenance::local(),
        };

        let value = serde_json::to_value(&chunk).unwrap();
        // The dynamic field must sit next to `text`/`owner`, not nested under
        // a `vectors` wrapper, so a search query's `knn.<field>` can address
        // it directly against the index mapping.
        assert_eq!(
            value["chunk_embedding_embedding_default_v1"],
            serde_json::json!([0.1, 0.2])
        );
        assert!(value.get("vectors").is_none());
    }

    #[test]
    fn connector_acl_overlays_everything_but_owner() {
        let identity_acl = AccessControl {
            owner: Some("alice".to_string()),
            ..Default::default()
        };

        let mut connector_acl = AccessControl::default();
        connector_acl.allowed_users = vec!["bob".to_string()];
        connector_acl.allowed_groups = vec!["eng".to_string()];
        connector_acl.user_permissions.insert("bob".to_string(), "reader".to_string());

        let merged = identity_acl.with_connector_acl(Some(&connector_acl));

        assert_eq!(merged.owner, Some("alice".to_string()));
        assert_eq!(merged.allowed_users, vec!["bob".to_string()]);
        assert_eq!(merged.allowed_groups, vec!["eng".to_string()]);
        assert_eq!(merged.user_permissions.get("bob"), Some(&"reader".to_string()));
    }

    #[test]
    fn missing_connector_acl_leaves_identity_acl_untouched() {
        let identity_acl = AccessControl {
            owner: Some("alice".to_string()),
            ..Default::default()
        };

        let merged = identity_acl.clone().with_connector_acl(None);
        assert_eq!(merged, identity_acl);
    }
}
