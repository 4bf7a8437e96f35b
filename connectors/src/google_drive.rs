use crate::connector::{
    mimetype_in_scope, Connector, ConnectorDocument, ConnectorError, DocumentAcl, ListFilesPage,
    RemoteFile, NATIVE_EXPORT_LIMIT_BYTES, REGULAR_FILE_LIMIT_BYTES,
};
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

const SUPPORTED_MIMETYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-powerpoint",
    "text/plain",
    "text/html",
    "application/rtf",
    "application/vnd.google-apps.document",
    "application/vnd.google-apps.presentation",
    "application/vnd.google-apps.spreadsheet",
];

fn is_native(mime_type: &str) -> bool {
    mime_type.starts_with("application/vnd.google-apps.")
}

/// Google Drive connector (SPEC_FULL.md §4.I). Grounded on the reference
/// `GoogleDriveConnector`: file/folder scoping, native-format export, and
/// `x-goog-channel-id`/`x-goog-resource-state` push notifications.
pub struct GoogleDriveConnector {
    http: reqwest::Client,
    access_token: Option<String>,
    file_ids: Vec<String>,
    folder_ids: Vec<String>,
    include_mime_types: Vec<String>,
    exclude_mime_types: Vec<String>,
    channel_id: Option<String>,
}

impl GoogleDriveConnector {
    pub fn new(config: serde_json::Value) -> Result<Self, ConnectorError> {
        let as_string_vec = |key: &str| -> Vec<String> {
            config
                .get(key)
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };

        Ok(Self {
            http: reqwest::Client::new(),
            access_token: config.get("access_token").and_then(|v| v.as_str()).map(str::to_string),
            file_ids: as_string_vec("file_ids"),
            folder_ids: as_string_vec("folder_ids"),
            include_mime_types: as_string_vec("include_mime_types"),
            exclude_mime_types: as_string_vec("exclude_mime_types"),
            channel_id: None,
        })
    }

    fn effective_mime_types(&self) -> Vec<&str> {
        SUPPORTED_MIMETYPES
            .iter()
            .copied()
            .filter(|m| mimetype_in_scope(m, SUPPORTED_MIMETYPES, &self.include_mime_types, &self.exclude_mime_types))
            .collect()
    }
}

#[async_trait]
impl Connector for GoogleDriveConnector {
    fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    async fn authenticate(&mut self) -> Result<bool, ConnectorError> {
        Ok(self.access_token.is_some())
    }

    async fn list_files(
        &self,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<ListFilesPage, ConnectorError> {
        if !self.is_authenticated() {
            return Err(ConnectorError::NotAuthenticated);
        }
        let token = self.access_token.as_deref().unwrap();
        let effective_mimes = self.effective_mime_types();

        if !self.file_ids.is_empty() {
            let mut files = Vec::new();
            for file_id in &self.file_ids {
                let metadata: serde_json::Value = self
                    .http
                    .get(format!("https://www.googleapis.com/drive/v3/files/{file_id}"))
                    .query(&[("fields", "id,name,mimeType,modifiedTime,createdTime,webViewLink")])
                    .bearer_auth(token)
                    .send()
                    .await?
                    .json()
                    .await?;

                let mime_type = metadata["mimeType"].as_str().unwrap_or("application/octet-stream");
                if !effective_mimes.contains(&mime_type) {
                    continue;
                }
                files.push(remote_file_from_metadata(&metadata));
            }
            return Ok(ListFilesPage { files, next_page_token: None });
        }

        let mime_query = effective_mimes
            .iter()
            .map(|m| format!("mimeType='{m}'"))
            .collect::<Vec<_>>()
            .join(" or ");
        let mut query = format!("trashed=false and ({mime_query})");
        if !self.folder_ids.is_empty() {
            let parents = self
                .folder_ids
                .iter()
                .map(|id| format!("'{id}' in parents"))
                .collect::<Vec<_>>()
                .join(" or ");
            query.push_str(&format!(" and ({parents})"));
        }

        let mut request = self
            .http
            .get("https://www.googleapis.com/drive/v3/files")
            .query(&[
                ("q", query.as_str()),
                ("pageSize", &limit.min(1000).to_string()),
                ("fields", "nextPageToken,files(id,name,mimeType,modifiedTime,createdTime,webViewLink)"),
            ])
            .bearer_auth(token);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response: serde_json::Value = request.send().await?.json().await?;
        let files = response["files"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(remote_file_from_metadata)
            .collect();
        let next_page_token = response["nextPageToken"].as_str().map(str::to_string);

        Ok(ListFilesPage { files, next_page_token })
    }

    async fn get_file_content(&self, file_id: &str) -> Result<ConnectorDocument, ConnectorError> {
        if !self.is_authenticated() {
            return Err(ConnectorError::NotAuthenticated);
        }
        let token = self.access_token.as_deref().unwrap();

        let metadata: serde_json::Value = self
            .http
            .get(format!("https://www.googleapis.com/drive/v3/files/{file_id}"))
            .query(&[(
                "fields",
                "id,name,mimeType,size,modifiedTime,createdTime,webViewLink,owners,permissions",
            )])
            .bearer_auth(token)
            .send()
            .await?
            .json()
            .await?;

        let mime_type = metadata["mimeType"].as_str().unwrap_or("application/octet-stream").to_string();
        let native = is_native(&mime_type);
        let limit = if native { NATIVE_EXPORT_LIMIT_BYTES } else { REGULAR_FILE_LIMIT_BYTES };
        let size = metadata["size"].as_str().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        if size > limit {
            return Err(ConnectorError::FileTooLarge(size));
        }

        let content_url = if native {
            format!("https://www.googleapis.com/drive/v3/files/{file_id}/export?mimeType=application/pdf")
        } else {
            format!("https://www.googleapis.com/drive/v3/files/{file_id}?alt=media")
        };
        let content = self
            .http
            .get(content_url)
            .bearer_auth(token)
            .send()
            .await?
            .bytes()
            .await?
            .to_vec();

        Ok(ConnectorDocument {
            id: metadata["id"].as_str().unwrap_or(file_id).to_string(),
            filename: metadata["name"].as_str().unwrap_or(file_id).to_string(),
            mimetype: if native { "application/pdf".to_string() } else { mime_type },
            content,
            source_url: metadata["webViewLink"].as_str().map(str::to_string),
            acl: extract_acl(&metadata),
            created_time: metadata["createdTime"].as_str().map(str::to_string),
            modified_time: metadata["modifiedTime"].as_str().map(str::to_string),
        })
    }

    async fn setup_subscription(&mut self, webhook_url: &str) -> Result<String, ConnectorError> {
        if !self.is_authenticated() {
            return Err(ConnectorError::NotAuthenticated);
        }
        let token = self.access_token.as_deref().unwrap();
        let channel_id = Uuid::new_v4().to_string();
        let expiration_ms = (chrono::Utc::now() + chrono::Duration::hours(24))
            .timestamp_millis()
            .to_string();

        let body = serde_json::json!({
            "id": channel_id,
            "type": "web_hook",
            "address": webhook_url,
            "expiration": expiration_ms,
        });

        self.http
            .post("https://www.googleapis.com/drive/v3/changes/watch")
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        self.channel_id = Some(channel_id.clone());
        Ok(channel_id)
    }

    fn extract_webhook_channel_id(
        &self,
        headers: &HashMap<String, String>,
        _body: &serde_json::Value,
    ) -> Option<String> {
        headers.get("x-goog-channel-id").cloned()
    }

    async fn handle_webhook(
        &self,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<Vec<String>, ConnectorError> {
        let state = headers.get("x-goog-resource-state").map(String::as_str).unwrap_or("");
        if !matches!(state, "exists" | "not_exists" | "change") {
            return Ok(Vec::new());
        }

        let effective_mimes = self.effective_mime_types();
        let changes = body["changes"].as_array().cloned().unwrap_or_default();
        let files = changes
            .into_iter()
            .filter(|change| {
                let mime_type = change["file"]["mimeType"].as_str().unwrap_or("");
                let trashed = change["file"]["trashed"].as_bool().unwrap_or(false);
                !trashed && effective_mimes.contains(&mime_type)
            })
            .filter_map(|change| change["fileId"].as_str().map(str::to_string))
            .collect();

        Ok(files)
    }

    async fn cleanup_subscription(&mut self, subscription_id: &str) -> Result<(), ConnectorError> {
        if !self.is_authenticated() {
            return Err(ConnectorError::NotAuthenticated);
        }
        let token = self.access_token.as_deref().unwrap();
        let body = serde_json::json!({ "id": subscription_id, "resourceId": subscription_id });
        self.http
            .post("https://www.googleapis.com/drive/v3/channels/stop")
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        Ok(())
    }
}

fn remote_file_from_metadata(metadata: &serde_json::Value) -> RemoteFile {
    RemoteFile {
        id: metadata["id"].as_str().unwrap_or_default().to_string(),
        name: metadata["name"].as_str().unwrap_or_default().to_string(),
        mime_type: metadata["mimeType"].as_str().unwrap_or("application/octet-stream").to_string(),
        modified_time: metadata["modifiedTime"].as_str().map(str::to_string),
        created_time: metadata["createdTime"].as_str().map(str::to_string),
        source_url: metadata["webViewLink"].as_str().map(str::to_string),
    }
}

/// Owner from `owners[0].emailAddress`; `permissions[]` fold into
/// user/group permission maps, with domain-scoped grants keyed
/// `domain:<domain>` (SPEC_FULL.md §4.I supplemental).
fn extract_acl(metadata: &serde_json::Value) -> DocumentAcl {
    let mut acl = DocumentAcl::default();
    acl.owner = metadata["owners"][0]["emailAddress"].as_str().map(str::to_string);

    if let Some(permissions) = metadata["permissions"].as_array() {
        for permission in permissions {
            let role = permission["role"].as_str().unwrap_or("reader").to_string();
            match permission["type"].as_str() {
                Some("user") => {
                    if let Some(email) = permission["emailAddress"].as_str() {
                        acl.user_permissions.insert(email.to_string(), role);
                    }
                }
                Some("group") => {
                    if let Some(email) = permission["emailAddress"].as_str() {
                        acl.group_permissions.insert(email.to_string(), role);
                    }
                }
                Some("domain") => {
                    if let Some(domain) = permission["domain"].as_str() {
                        acl.group_permissions.insert(format!("domain:{domain}"), role);
                    }
                }
                _ => {}
            }
        }
    }

    acl
}
