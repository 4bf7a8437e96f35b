use crate::connector::ConnectorError;
use crate::registry::{Connection, ConnectorRegistry};
use alayasiki_core::error::{AlayasikiError, ErrorCode};
use alayasiki_core::ingest::{Identity, IngestRequest, IngestSource};
use alayasiki_core::model::{AccessControl, Provenance};
use async_trait::async_trait;
use ingestion::processor::IngestionPipeline;
use jobs::{Processor, TaskEngine};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),
}

impl AlayasikiError for WebhookError {
    fn error_code(&self) -> ErrorCode {
        match self {
            WebhookError::Connector(e) => e.error_code(),
        }
    }
}

/// Result of routing one webhook delivery (SPEC_FULL.md §4.J). The
/// validation handshake of step 1 is handled separately by
/// [`WebhookRouter::handle_validation`] before a `route` call is ever made,
/// so it has no corresponding variant here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// No connection is subscribed under this channel id; safely dropped.
    IgnoredUnknownChannel,
    /// Affected files were dispatched to the task engine under this job id.
    Dispatched { job_id: String, connection_id: String, file_count: usize },
    /// The channel resolved to a connection but the provider reported no
    /// affected files worth ingesting (e.g. a "sync" keepalive state).
    NoOp,
}

/// Per-file processor that pulls content through a connector and feeds it
/// into the ingestion pipeline, tagging provenance with the connector type
/// (SPEC_FULL.md §4.J step 5).
struct ConnectorIngestProcessor {
    registry: Arc<ConnectorRegistry>,
    pipeline: Arc<IngestionPipeline>,
    connection_id: String,
    connector_type: String,
    owner_user_id: Option<String>,
}

#[async_trait]
impl Processor for ConnectorIngestProcessor {
    async fn process(&self, item_key: &str) -> Result<String, String> {
        let connector = self
            .registry
            .get_connector(&self.connection_id)
            .await
            .ok_or_else(|| "connector is not authenticated".to_string())?;

        let document = {
            let guard = connector.lock().await;
            guard
                .get_file_content(item_key)
                .await
                .map_err(|e| e.to_string())?
        };

        let mut metadata = HashMap::new();
        metadata.insert("connector_type".to_string(), self.connector_type.clone());

        // Additional ACL info beyond `owner`, which is set from the ingest
        // identity instead.
        let connector_acl = AccessControl {
            owner: None,
            allowed_users: document.acl.allowed_users(),
            allowed_groups: document.acl.allowed_groups(),
            user_permissions: document.acl.user_permissions.clone(),
            group_permissions: document.acl.group_permissions.clone(),
        };

        let request = IngestRequest {
            source: IngestSource::Bytes {
                content: document.content,
                display_filename: document.filename,
                mime_type: document.mimetype,
            },
            identity: Identity {
                owner_user_id: self.owner_user_id.clone(),
                owner_name: None,
                owner_email: None,
                jwt_token: None,
            },
            provenance: Provenance {
                connector_type: self.connector_type.clone(),
                source_url: document.source_url,
                created_time: document.created_time,
                modified_time: document.modified_time,
                acl: Some(connector_acl),
                ..Provenance::local()
            },
            model_id: None,
            metadata,
        };

        self.pipeline
            .ingest(request)
            .await
            .map(|outcome| outcome.document_id)
            .map_err(|e| e.to_string())
    }
}

/// Dispatches inbound connector webhooks to the matching connection and
/// submits a custom task for every affected file (SPEC_FULL.md §4.J).
pub struct WebhookRouter {
    registry: Arc<ConnectorRegistry>,
    engine: Arc<TaskEngine>,
    pipeline: Arc<IngestionPipeline>,
}

impl WebhookRouter {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        engine: Arc<TaskEngine>,
        pipeline: Arc<IngestionPipeline>,
    ) -> Self {
        Self { registry, engine, pipeline }
    }

    /// Step 1: answers a provider's subscription-validation GET handshake
    /// before any connection lookup happens. `query` carries the request's
    /// query-string parameters.
    pub fn handle_validation(&self, query: &HashMap<String, String>) -> Option<String> {
        query
            .get("validationToken")
            .or_else(|| query.get("validationtoken"))
            .or_else(|| query.get("hub.challenge"))
            .cloned()
    }

    /// Steps 2-5: resolves the channel to a connection, dispatches the
    /// provider payload to that connector, and submits one custom task per
    /// affected file.
    pub async fn route(
        &self,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        let Some(connection) = self.resolve_connection(headers, body).await else {
            return Ok(WebhookOutcome::IgnoredUnknownChannel);
        };

        let connector = self
            .registry
            .get_connector(&connection.connection_id)
            .await
            .ok_or(ConnectorError::NotAuthenticated)?;

        let affected = {
            let guard = connector.lock().await;
            guard.handle_webhook(headers, body).await?
        };

        if affected.is_empty() {
            return Ok(WebhookOutcome::NoOp);
        }

        let processor = Arc::new(ConnectorIngestProcessor {
            registry: self.registry.clone(),
            pipeline: self.pipeline.clone(),
            connection_id: connection.connection_id.clone(),
            connector_type: connection.connector_type.as_str().to_string(),
            owner_user_id: connection.user_id.clone(),
        });

        let dispatch_user = connection.user_id.clone().unwrap_or_else(|| "system".to_string());
        let file_count = affected.len();
        let job_id = self.engine.create_custom_task(&dispatch_user, affected, processor);

        info!(connection_id = %connection.connection_id, job_id, file_count, "webhook dispatched to task engine");
        self.registry.update_last_sync(&connection.connection_id).await.ok();

        Ok(WebhookOutcome::Dispatched {
            job_id,
            connection_id: connection.connection_id,
            file_count,
        })
    }

    async fn resolve_connection(
        &self,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Option<Connection> {
        let candidates = self.registry.list_connections(None, None).await;
        for connection in candidates {
            if !connection.is_active {
                continue;
            }
            let Some(connector) = self.registry.get_connector(&connection.connection_id).await else {
                continue;
            };
            let channel_id = {
                let guard = connector.lock().await;
                guard.extract_webhook_channel_id(headers, body)
            };
            let Some(channel_id) = channel_id else { continue };
            if connection.webhook_channel_id.as_deref() == Some(channel_id.as_str()) {
                return Some(connection);
            }
        }
        warn!("webhook delivery did not match any subscribed connection");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use storage::memory::InMemoryIndexStore;
    use tempfile::tempdir;

    async fn router() -> (WebhookRouter, StdArc<ConnectorRegistry>) {
        let dir = tempdir().unwrap();
        let registry = StdArc::new(
            ConnectorRegistry::load(dir.path().join("connections.json"))
                .await
                .unwrap(),
        );
        let store = StdArc::new(InMemoryIndexStore::default());
        let engine = TaskEngine::new(Some(1), 24, 1);
        let pipeline = StdArc::new(IngestionPipeline::new(store, "docs", "default-model"));
        let router = WebhookRouter::new(registry.clone(), engine, pipeline);
        (router, registry)
    }

    #[tokio::test]
    async fn handshake_prefers_explicit_validation_token() {
        let mut query = HashMap::new();
        query.insert("validationToken".to_string(), "tok-1".to_string());
        query.insert("hub.challenge".to_string(), "tok-2".to_string());

        let (router, _registry) = router().await;
        assert_eq!(router.handle_validation(&query).as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn route_ignores_webhook_for_unknown_channel() {
        let (router, _registry) = router().await;
        let body = serde_json::json!({ "value": [{ "subscriptionId": "unknown" }] });
        let outcome = router.route(&HashMap::new(), &body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::IgnoredUnknownChannel);
    }
}
