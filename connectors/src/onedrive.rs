use crate::connector::{
    Connector, ConnectorDocument, ConnectorError, DocumentAcl, ListFilesPage, RemoteFile,
    REGULAR_FILE_LIMIT_BYTES,
};
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use std::collections::HashMap;
use uuid::Uuid;

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// OneDrive connector over the Microsoft Graph API (SPEC_FULL.md §4.I).
/// Grounded on the reference `OneDriveConnector`: `/me/drive` resource
/// scope, `$skiptoken` pagination, and `validationToken`/`clientState`
/// webhook handshake.
pub struct OneDriveConnector {
    http: reqwest::Client,
    access_token: Option<String>,
    client_state: Option<String>,
}

impl OneDriveConnector {
    pub fn new(config: serde_json::Value) -> Result<Self, ConnectorError> {
        Ok(Self {
            http: reqwest::Client::new(),
            access_token: config.get("access_token").and_then(|v| v.as_str()).map(str::to_string),
            client_state: config.get("client_state").and_then(|v| v.as_str()).map(str::to_string),
        })
    }

    fn bearer(&self) -> Result<&str, ConnectorError> {
        self.access_token.as_deref().ok_or(ConnectorError::NotAuthenticated)
    }
}

#[async_trait]
impl Connector for OneDriveConnector {
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
            .get(format!("{GRAPH_BASE_URL}/me/drive/root/children"))
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

        let metadata: serde_json::Value = self
            .http
            .get(format!("{GRAPH_BASE_URL}/me/drive/items/{file_id}"))
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
            .get(format!("{GRAPH_BASE_URL}/me/drive/items/{file_id}/content"))
            .bearer_auth(token)
            .send()
            .await?
            .bytes()
            .await?
            .to_vec();

        let permissions: serde_json::Value = self
            .http
            .get(format!("{GRAPH_BASE_URL}/me/drive/items/{file_id}/permissions"))
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
        let expiration = expiration_rfc3339(2);

        let body = serde_json::json!({
            "changeType": "created,updated,deleted",
            "notificationUrl": webhook_url,
            "resource": "/me/drive/root",
            "expirationDateTime": expiration,
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

/// `validationToken` query-parameter handshake required before Microsoft
/// Graph will deliver change notifications to a new webhook URL.
pub fn handle_validation_handshake(query: &HashMap<String, String>) -> Option<String> {
    query
        .get("validationToken")
        .or_else(|| query.get("validationtoken"))
        .cloned()
}

pub fn parse_permissions(metadata: &serde_json::Value, permissions: &serde_json::Value) -> DocumentAcl {
    let mut acl = DocumentAcl::default();
    acl.owner = metadata["createdBy"]["user"]["email"].as_str().map(str::to_string);

    if let Some(values) = permissions["value"].as_array() {
        for permission in values {
            let role = permission["roles"][0].as_str().unwrap_or("read").to_string();
            let grantee = permission.get("grantedToV2").or_else(|| permission.get("grantedTo"));
            let Some(grantee) = grantee else { continue };

            if let Some(email) = grantee["user"]["email"].as_str() {
                acl.user_permissions.insert(email.to_string(), role.clone());
            }
            if let Some(email) = grantee["group"]["email"].as_str() {
                acl.group_permissions.insert(email.to_string(), role);
            }
        }
    }

    acl
}

/// `(Utc::now() + timedelta(days)).isoformat() + "Z"` equivalent — Graph
/// subscriptions require an RFC3339 `expirationDateTime`.
pub(crate) fn expiration_rfc3339(days: i64) -> String {
    (Utc::now() + Duration::days(days)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_handshake_extracts_token_case_insensitively() {
        let mut query = HashMap::new();
        query.insert("validationToken".to_string(), "abc123".to_string());
        assert_eq!(handle_validation_handshake(&query).as_deref(), Some("abc123"));
    }

    #[test]
    fn parse_permissions_reads_owner_and_grants() {
        let metadata = serde_json::json!({
            "createdBy": { "user": { "email": "owner@example.com" } }
        });
        let permissions = serde_json::json!({
            "value": [{
                "roles": ["write"],
                "grantedToV2": { "user": { "email": "alice@example.com" } }
            }]
        });

        let acl = parse_permissions(&metadata, &permissions);
        assert_eq!(acl.owner.as_deref(), Some("owner@example.com"));
        assert_eq!(acl.user_permissions.get("alice@example.com").unwrap(), "write");
    }

    #[test]
    fn not_authenticated_without_access_token() {
        let connector = OneDriveConnector::new(serde_json::json!({})).unwrap();
        assert!(!connector.is_authenticated());
    }
}
