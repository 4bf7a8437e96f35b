pub mod connector;
pub mod google_drive;
pub mod onedrive;
pub mod registry;
pub mod sharepoint;
pub mod webhook;

pub use connector::{Connector, ConnectorDocument, ConnectorError, DocumentAcl, ListFilesPage, RemoteFile};
pub use google_drive::GoogleDriveConnector;
pub use onedrive::OneDriveConnector;
pub use registry::{Connection, ConnectorRegistry, ConnectorType};
pub use sharepoint::SharePointConnector;
pub use webhook::{WebhookError, WebhookOutcome, WebhookRouter};
