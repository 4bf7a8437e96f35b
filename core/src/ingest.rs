use crate::model::{AccessControl, Provenance};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Either a local filesystem path or bytes handed in directly, with a
/// display filename (SPEC_FULL.md §4.F "Inputs: source").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IngestSource {
    Path {
        path: String,
        display_filename: Option<String>,
    },
    Bytes {
        content: Vec<u8>,
        display_filename: String,
        mime_type: String,
    },
}

impl IngestSource {
    pub fn display_filename(&self) -> Option<&str> {
        match self {
            IngestSource::Path {
                display_filename, ..
            } => display_filename.as_deref(),
            IngestSource::Bytes {
                display_filename, ..
            } => Some(display_filename.as_str()),
        }
    }
}

/// `identity` input of SPEC_FULL.md §4.F. Owner fields are omitted from
/// indexed chunks when `owner_user_id` is `None` (public ingestion mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    pub owner_user_id: Option<String>,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub jwt_token: Option<String>,
}

impl Identity {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn to_access_control(&self) -> AccessControl {
        match &self.owner_user_id {
            None => AccessControl::default(),
            Some(owner) => AccessControl {
                owner: Some(owner.clone()),
                ..Default::default()
            },
        }
    }
}

/// A full ingestion request: source bytes, who owns it, and where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source: IngestSource,
    pub identity: Identity,
    pub provenance: Provenance,
    pub model_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl IngestRequest {
    pub fn upload(
        content: Vec<u8>,
        display_filename: impl Into<String>,
        mime_type: impl Into<String>,
        identity: Identity,
    ) -> Self {
        Self {
            source: IngestSource::Bytes {
                content,
                display_filename: display_filename.into(),
                mime_type: mime_type.into(),
            },
            identity,
            provenance: Provenance::local(),
            model_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn from_path(path: impl Into<String>, identity: Identity) -> Self {
        Self {
            source: IngestSource::Path {
                path: path.into(),
                display_filename: None,
            },
            identity,
            provenance: Provenance::local(),
            model_id: None,
            metadata: HashMap::new(),
        }
    }
}

pub trait ContentHash {
    fn content_hash(&self) -> String;
}

/// Streaming content hash → document id (SPEC_FULL.md §4.A).
///
/// Mixes in the display filename, when present, by appending a `\n` and the
/// UTF-8 bytes of the name before finalising, so that the same bytes under a
/// different name produce a different id. Deterministic and pure.
pub fn hash_document(bytes: &[u8], display_filename: Option<&str>) -> String {
    const CHUNK_SIZE: usize = 1024 * 1024;
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(CHUNK_SIZE.max(1)) {
        hasher.update(chunk);
    }
    if let Some(name) = display_filename {
        hasher.update(b"\n");
        hasher.update(name.as_bytes());
    }
    let digest = hasher.finalize();
    base64_url_truncated(&digest, 24)
}

pub fn base64_url_truncated(digest: &[u8], truncate_len: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    let encoded = URL_SAFE_NO_PAD.encode(digest);
    if truncate_len == 0 || truncate_len >= encoded.len() {
        encoded
    } else {
        encoded[..truncate_len].to_string()
    }
}

impl ContentHash for IngestSource {
    fn content_hash(&self) -> String {
        match self {
            IngestSource::Bytes { content, .. } => hash_document(content, self.display_filename()),
            IngestSource::Path { .. } => {
                // Callers resolve path sources to bytes before hashing; this
                // branch only exists so `ContentHash` is total over the enum.
                hash_document(&[], self.display_filename())
            }
        }
    }
}
