use alayasiki_core::error::{AlayasikiError, ErrorCode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector authentication failed")]
    AuthFailed,
    #[error("connector is not authenticated")]
    NotAuthenticated,
    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),
    #[error("request to provider failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("invalid connector configuration: {0}")]
    InvalidConfig(String),
}

impl AlayasikiError for ConnectorError {
    fn error_code(&self) -> ErrorCode {
        match self {
            ConnectorError::AuthFailed | ConnectorError::NotAuthenticated => {
                ErrorCode::Unauthenticated
            }
            ConnectorError::FileTooLarge(_) => ErrorCode::FileTooLarge,
            ConnectorError::Upstream(_) => ErrorCode::UpstreamError,
            ConnectorError::InvalidConfig(_) => ErrorCode::InvalidInput,
        }
    }
}

/// ACL as returned by `GetFileContent` (SPEC_FULL.md §4.I supplemental,
/// grounded in the reference connector base class's `DocumentACL`).
/// `allowed_users`/`allowed_groups` on the indexed `Chunk` are derived as
/// the key sets of these two maps rather than stored independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentAcl {
    pub owner: Option<String>,
    #[serde(default)]
    pub user_permissions: HashMap<String, String>,
    #[serde(default)]
    pub group_permissions: HashMap<String, String>,
}

impl DocumentAcl {
    pub fn allowed_users(&self) -> Vec<String> {
        self.user_permissions.keys().cloned().collect()
    }

    pub fn allowed_groups(&self) -> Vec<String> {
        self.group_permissions.keys().cloned().collect()
    }
}

#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: Option<String>,
    pub created_time: Option<String>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListFilesPage {
    pub files: Vec<RemoteFile>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectorDocument {
    pub id: String,
    pub filename: String,
    pub mimetype: String,
    pub content: Vec<u8>,
    pub source_url: Option<String>,
    pub acl: DocumentAcl,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
}

pub const NATIVE_EXPORT_LIMIT_BYTES: u64 = 500 * 1024 * 1024;
pub const REGULAR_FILE_LIMIT_BYTES: u64 = 1000 * 1024 * 1024;

/// `clamp(10s * size_MiB, 60s, 300s)` download timeout (SPEC_FULL.md §4.I).
pub fn download_timeout(size_bytes: u64) -> Duration {
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    let seconds = (size_mb * 10.0).clamp(60.0, 300.0);
    Duration::from_secs_f64(seconds)
}

/// Checks a candidate mimetype against the connector's supported set plus
/// optional user include/exclude overrides (SPEC_FULL.md §4.I `ListFiles`).
pub fn mimetype_in_scope(
    mimetype: &str,
    supported: &[&str],
    include: &[String],
    exclude: &[String],
) -> bool {
    if exclude.iter().any(|m| m == mimetype) {
        return false;
    }
    if !include.is_empty() {
        return include.iter().any(|m| m == mimetype);
    }
    supported.iter().any(|&m| m == mimetype)
}

/// Common contract every connector variant implements (SPEC_FULL.md §4.I).
/// Variants differ only in wire protocol and selection semantics.
#[async_trait]
pub trait Connector: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Loads/refreshes tokens; pre-expands selected folders if `recursive`.
    async fn authenticate(&mut self) -> Result<bool, ConnectorError>;

    async fn list_files(
        &self,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<ListFilesPage, ConnectorError>;

    async fn get_file_content(&self, file_id: &str) -> Result<ConnectorDocument, ConnectorError>;

    /// Registers a push channel with a 24h TTL; returns the subscription id.
    async fn setup_subscription(&mut self, webhook_url: &str) -> Result<String, ConnectorError>;

    /// Extracts a channel id from webhook headers/body, if this payload
    /// carries one at all.
    fn extract_webhook_channel_id(
        &self,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Option<String>;

    /// Resolves the provider's change stream for this channel back to
    /// affected file ids, filtered by selection scope and supported MIME
    /// types. Unknown state codes are ignored.
    async fn handle_webhook(
        &self,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<Vec<String>, ConnectorError>;

    /// Best-effort; requires the persisted resource/subscription id.
    async fn cleanup_subscription(&mut self, subscription_id: &str) -> Result<(), ConnectorError>;
}
