use crate::connector::{
    Connector, ConnectorDocument, ConnectorError, ListFilesPage, RemoteFile,
    REGULAR_FILE_LIMIT_BYTES,
};
use crate::onedrive::{expiration_rfc3339, parse_permissions};
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// SharePoint connector over the Microsoft Graph API (SPEC_FULL.md §4.I).
/// Same Graph API family as [`crate::onedrive::OneDriveConnector`] — the
/// reference implementation's SharePoint OAuth client carries no HMAC or
/// signature validation, so the webhook handshake reuses the same
/// `validationToken`/`clientState`/`subscriptionId` mechanics, scoped to
/// a site drive (`/sites/{site_id}/drive`) instead of `/me/drive`.
pub struct SharePointConnector {
    http: reqwest::Client,
    access_token: Option<String>,
    site_id: String,
    client_state: Option<String>,
}

impl SharePointConnector {
    pub fn new(config: serde_json::Value) -> Result<Self, ConnectorError> {
        let site_id = config
            .get("site_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConnectorError::InvalidConfig("missing site_id".to_string()))?
            .to_string();

        Ok(Self {
            http: reqwest::Client::new(),
            access_token: config.get("access_token").and_then(|v| v.as_str()).map(str::to_string),
            site_id,
            client_state: config.get("client_state").and_then(|v| v.as_str()).map(str::to_string),
        })
    }

    fn bearer(&self) -> Result<&str, ConnectorError> {
        self.access_token.as_deref().ok_or(ConnectorError::NotAuthenticated)
    }

    fn drive_resource(&self) -> String {
        format!("/sites/{}/drive", self.site_id)
    }
}

#[async_trait]
impl Connector for SharePointConnector {
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
        let token = self.bearer()?;

        let mut request = self
            .http
            .get(format!("{GRAPH_BASE_URL}{}/root/children", self.drive_resource()))
            .query(&[("$top", limit.to_string().as_str())])
            .bearer_auth(token);
        if let Some(skip) = page_token {
            request = request.query(&[("$skiptoken", skip)]);
        }

        let response: serde_json::Value = request.send().await?.json().await?;
        let files = response["value"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|item| item.get("file").is_some())
            .map(|item| RemoteFile {
                id: item["id"].as_str().unwrap_or_default().to_string(),
                name: item["name"].as_str().unwrap_or_default().to_string(),
                mime_type: item["file"]["mimeType"].as_str().unwrap_or("application/octet-stream").to_string(),
                modified_time: item["lastModifiedDateTime"].as_str().map(str::to_string),
                created_time: item["createdDateTime"].as_str().map(str::to_string),
                source_url: item["webUrl"].as_str().map(str::to_string),
            })
            .collect();

        let next_page_token = response["@odata.nextLink"]
            .as_str()
            .and_then(|link| link.split("$skiptoken=").nth(1))
            .map(str::to_string);

        Ok(ListFilesPage { files, next_page_token })
    }

    async fn get_file_content(&self, file_id: &str) -> Result<ConnectorDocument, ConnectorError> {
        let token = self.bearer()?;
        let drive = self.drive_resource();

        let metadata: serde_json::Value = self
            .http
            .get(format!("{GRAPH_BASE_URL}{drive}/items/{file_id}"))
            .bearer_auth(token)
            .send()
            .await?
            .json()
            .await?;

        let size = metadata["size"].as_u64().unwrap_or(0);
        if size > REGULAR_FILE_LIMIT_BYTES {
            return Err(ConnectorError::FileTooLarge(size));
        }

        let content = self
            .http
            .get(format!("{GRAPH_BASE_URL}{drive}/items/{file_id}/content"))
            .bearer_auth(token)
            .send()
            .await?
            .bytes()
            .await?
            .to_vec();

        let permissions: serde_json::Value = self
            .http
            .get(format!("{GRAPH_BASE_URL}{drive}/items/{file_id}/permissions"))
            .bearer_auth(token)
            .send()
            .await?
            .json()
            .await?;

        Ok(ConnectorDocument {
            id: metadata["id"].as_str().unwrap_or(file_id).to_string(),
            filename: metadata["name"].as_str().unwrap_or(file_id).to_string(),
            mimetype: metadata["file"]["mimeType"].as_str().unwrap_or("application/octet-stream").to_string(),
            content,
            source_url: metadata["webUrl"].as_str().map(str::to_string),
            acl: parse_permissions(&metadata, &permissions),
            created_time: metadata["createdDateTime"].as_str().map(str::to_string),
            modified_time: metadata["lastModifiedDateTime"].as_str().map(str::to_string),
        })
    }

    async fn setup_subscription(&mut self, webhook_url: &str) -> Result<String, ConnectorError> {
        let token = self.bearer()?;
        let client_state = Uuid::new_v4().to_string();

        let body = serde_json::json!({
            "changeType": "created,updated,deleted",
            "notificationUrl": webhook_url,
            "resource": self.drive_resource(),
            "expirationDateTime": expiration_rfc3339(2),
            "clientState": client_state,
        });

        let response: serde_json::Value = self
            .http
            .post(format!("{GRAPH_BASE_URL}/subscriptions"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        self.client_state = Some(client_state);
        Ok(response["id"].as_str().unwrap_or_default().to_string())
    }

    fn extract_webhook_channel_id(
        &self,
        _headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Option<String> {
        body["value"][0]["subscriptionId"].as_str().map(str::to_string)
    }

    async fn handle_webhook(
        &self,
        _headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<Vec<String>, ConnectorError> {
        let values = body["value"].as_array().cloned().unwrap_or_default();
        Ok(values
            .iter()
            .filter_map(|item| item["resourceData"]["id"].as_str().map(str::to_string))
            .collect())
    }

    async fn cleanup_subscription(&mut self, subscription_id: &str) -> Result<(), ConnectorError> {
        let token = self.bearer()?;
        self.http
            .delete(format!("{GRAPH_BASE_URL}/subscriptions/{subscription_id}"))
            .bearer_auth(token)
            .send()
            .await?;
        Ok(())
    }
}
