use sha2::{Digest, Sha256};

/// Deterministic fake embedding used by the in-memory test doubles
/// (SPEC_FULL.md §10.4) and nowhere else; no production `Embedder`
/// implementation should call this.
pub fn deterministic_embedding(text: &str, model_id: &str, dims: usize) -> Vec<f32> {
    let dims = dims.max(1);

    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let mut out = Vec::with_capacity(dims);
    for i in 0..dims {
        let byte = digest[i % digest.len()];
        let value = (byte as f32 / 127.5) - 1.0;
        out.push(value);
    }

    out
}

/// Convert an embedding model name to a valid OpenSearch field-name suffix.
///
/// Grounded on `original_source/src/utils/embedding_fields.py::normalize_model_name`:
/// lowercase, collapse `-`/`:`/`/`/`.` and any other non-alphanumeric run to a
/// single `_`, trim leading/trailing `_`.
pub fn normalize_model_name(model_name: &str) -> String {
    let lowered = model_name.to_lowercase();
    let mut normalized = String::with_capacity(lowered.len());
    let mut last_was_underscore = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            normalized.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            normalized.push('_');
            last_was_underscore = true;
        }
    }
    normalized.trim_matches('_').to_string()
}

pub fn embedding_field_name(model_name: &str) -> String {
    format!("chunk_embedding_{}", normalize_model_name(model_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_embedding_is_reproducible_for_same_inputs() {
        let a = deterministic_embedding("hello", "embedding-default-v1", 8);
        let b = deterministic_embedding("hello", "embedding-default-v1", 8);
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_embedding_changes_when_model_changes() {
        let a = deterministic_embedding("hello", "embedding-default-v1", 8);
        let b = deterministic_embedding("hello", "embedding-alt-v1", 8);
        assert_ne!(a, b);
    }

    #[test]
    fn normalize_model_name_handles_common_separators() {
        assert_eq!(
            normalize_model_name("text-embedding-3-small"),
            "text_embedding_3_small"
        );
        assert_eq!(
            normalize_model_name("nomic-embed-text:latest"),
            "nomic_embed_text_latest"
        );
        assert_eq!(
            normalize_model_name("ibm/slate-125m-english-rtrvr"),
            "ibm_slate_125m_english_rtrvr"
        );
    }

    #[test]
    fn normalize_model_name_is_idempotent() {
        for name in ["text-embedding-3-small", "nomic-embed-text:latest", "Already_Normal"] {
            let once = normalize_model_name(name);
            let twice = normalize_model_name(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalize_model_name_is_url_safe() {
        let normalized = normalize_model_name("Weird!!Name///With..Dots");
        assert!(normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn embedding_field_name_has_expected_prefix() {
        assert_eq!(
            embedding_field_name("text-embedding-3-small"),
            "chunk_embedding_text_embedding_3_small"
        );
    }
}
