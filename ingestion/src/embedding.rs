use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// Embedding backend contract (SPEC_FULL.md §4.F/§4.K). Implementations own
/// whatever HTTP or local-model call is needed; the pipeline only sees
/// batches in, vectors out.
pub trait Embedder: Send + Sync {
    fn dim(&self, model_id: &str) -> usize;
    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
        model_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, EmbeddingError>>;
}

pub struct DeterministicEmbedder {
    dims: usize,
}

impl DeterministicEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new(768)
    }
}

impl Embedder for DeterministicEmbedder {
    fn dim(&self, _model_id: &str) -> usize {
        self.dims
    }

    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
        model_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, EmbeddingError>> {
        let texts = texts.to_vec();
        let model_id = model_id.to_string();
        let dims = self.dims;

        Box::pin(async move {
            Ok(texts
                .iter()
                .map(|text| alayasiki_core::embedding::deterministic_embedding(text, &model_id, dims))
                .collect())
        })
    }
}

/// Rough token estimate used when a model's real tokenizer isn't available.
/// Matches the "unknown model -> fall back tokenizer" allowance of
/// SPEC_FULL.md §4.F.5: approximately four characters per token, with a
/// floor of one token for any non-empty string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() / 4).max(1)
}

/// Splits a single oversized text into pieces whose estimated token count
/// each stays at or below `max_batch_tokens`, preserving character order
/// (SPEC_FULL.md §4.F.5).
pub fn split_oversized(text: &str, max_batch_tokens: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let max_chars = (max_batch_tokens.max(1) * 4).max(1);

    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect::<String>())
        .collect()
}

/// Groups item indices into batches whose estimated token sum stays at or
/// below `max_batch_tokens`, preserving relative order. Assumes no single
/// item's token count exceeds the bound (callers pre-split oversized items
/// with [`split_oversized`] before calling this).
pub fn group_by_token_budget(token_counts: &[usize], max_batch_tokens: usize) -> Vec<Vec<usize>> {
    let max_batch_tokens = max_batch_tokens.max(1);
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_tokens = 0usize;

    for (i, &tokens) in token_counts.iter().enumerate() {
        if current_tokens + tokens > max_batch_tokens && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push(i);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

/// Retries an embedding call up to 3 attempts with exponential backoff
/// capped at 8s, matching SPEC_FULL.md §4.F.5 and §7.
pub async fn embed_with_retry<'a>(
    embedder: &'a dyn Embedder,
    texts: &'a [String],
    model_id: &'a str,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    const MAX_ATTEMPTS: u32 = 3;
    const CAP: Duration = Duration::from_secs(8);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match embedder.embed_batch(texts, model_id).await {
            Ok(vectors) => return Ok(vectors),
            Err(err) if attempt < MAX_ATTEMPTS => {
                let delay = Duration::from_secs(1 << (attempt - 1)).min(CAP);
                warn!(attempt, error = %err, "embedding call failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
