//! Embedding Providers for Semantic Search
//!
//! The core only depends on the `Embedder` contract: text in, fixed-dimension
//! vector out. Calls are bounded by a timeout; when the provider is slow,
//! failing or absent, `DeterministicEmbedder` supplies a stable bag-of-words
//! hash vector instead (no claim to semantic accuracy).
//!
//! With the `fastembed` feature, `FastEmbedder` runs all-MiniLM-L6-v2
//! locally (384 dimensions, lazily loaded).

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::entity::VectorSource;

/// Embedding dimensions for all-MiniLM-L6-v2
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Embedding provider failures
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("no embedding model configured")]
    NoModel,

    #[error("embedding model error: {0}")]
    Model(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Pluggable text embedding function
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Length of every vector this provider returns
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Lowercased alphanumeric tokens
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Stable pseudo-random vectors derived from SHA-256 of each token.
///
/// Token vectors are summed, so texts sharing words score higher. Each
/// component is a multiple of 1/256, which keeps vectors exact through
/// serialization.
#[derive(Debug, Clone)]
pub struct DeterministicEmbedder {
    dimensions: usize,
}

impl DeterministicEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let mut filled = 0;
            let mut block = 0u32;
            while filled < self.dimensions {
                let mut hasher = Sha256::new();
                hasher.update(token.as_bytes());
                hasher.update(block.to_be_bytes());
                for byte in hasher.finalize() {
                    if filled == self.dimensions {
                        break;
                    }
                    vector[filled] += (2.0 * byte as f32 - 255.0) / 256.0;
                    filled += 1;
                }
                block += 1;
            }
        }
        vector
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    fn name(&self) -> &str {
        "deterministic"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector(text))
    }
}

/// Compute cosine similarity between two vectors
///
/// Returns a value between -1.0 and 1.0; 0.0 when lengths differ or either
/// vector is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// A vector and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub source: VectorSource,
}

/// Timeout-bounded embedding with deterministic fallback
#[derive(Clone)]
pub struct EmbeddingPipeline {
    model: Option<std::sync::Arc<dyn Embedder>>,
    fallback: DeterministicEmbedder,
    timeout: Duration,
}

impl EmbeddingPipeline {
    pub fn new(
        model: Option<std::sync::Arc<dyn Embedder>>,
        fallback_dimensions: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            fallback: DeterministicEmbedder::new(fallback_dimensions),
            timeout,
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Deterministic vector for `text`, comparable with other fallback vectors
    pub fn fallback_vector(&self, text: &str) -> Vec<f32> {
        self.fallback.vector(text)
    }

    /// Embed `text`, degrading to the fallback vector unless `require_real`
    pub async fn embed(&self, text: &str, require_real: bool) -> Result<Embedding, EmbeddingError> {
        let error = match &self.model {
            Some(model) => match tokio::time::timeout(self.timeout, model.embed(text)).await {
                Ok(Ok(vector)) if vector.len() == model.dimensions() => {
                    return Ok(Embedding {
                        vector,
                        source: VectorSource::Model,
                    });
                }
                Ok(Ok(vector)) => EmbeddingError::DimensionMismatch {
                    expected: model.dimensions(),
                    actual: vector.len(),
                },
                Ok(Err(e)) => e,
                Err(_) => EmbeddingError::Timeout(self.timeout),
            },
            None => EmbeddingError::NoModel,
        };

        if require_real {
            return Err(error);
        }
        if !matches!(error, EmbeddingError::NoModel) {
            warn!(error = %error, "embedding provider failed, using fallback vector");
        }
        Ok(Embedding {
            vector: self.fallback.vector(text),
            source: VectorSource::Fallback,
        })
    }
}

impl std::fmt::Debug for EmbeddingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingPipeline")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Local all-MiniLM-L6-v2 model via `fastembed`
#[cfg(feature = "fastembed")]
pub struct FastEmbedder {
    model: std::sync::Arc<tokio::sync::RwLock<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "fastembed")]
impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "fastembed")]
impl FastEmbedder {
    pub fn new() -> Self {
        Self {
            model: std::sync::Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    /// Initialize the embedding model (lazy loading)
    async fn ensure_model(&self) -> Result<(), EmbeddingError> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        if self.model.read().await.is_some() {
            return Ok(());
        }

        let mut model_guard = self.model.write().await;
        if model_guard.is_some() {
            return Ok(());
        }

        tracing::info!("Loading embedding model: all-MiniLM-L6-v2");
        let start = std::time::Instant::now();

        let mut init_options = InitOptions::default();
        init_options.model_name = EmbeddingModel::AllMiniLML6V2;
        init_options.show_download_progress = false;

        let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(init_options))
            .await
            .map_err(|e| EmbeddingError::Model(e.to_string()))?
            .map_err(|e| EmbeddingError::Model(format!("failed to load model: {}", e)))?;

        tracing::info!("Embedding model loaded in {:?}", start.elapsed());
        *model_guard = Some(model);
        Ok(())
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }
}

#[cfg(feature = "fastembed")]
#[async_trait]
impl Embedder for FastEmbedder {
    fn name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.ensure_model().await?;

        // Inference is CPU-bound; keep it off the async workers
        let model = self.model.clone();
        let text = text.to_string();
        let embeddings = tokio::task::spawn_blocking(move || {
            let guard = model.blocking_read();
            let model = guard
                .as_ref()
                .ok_or_else(|| EmbeddingError::Model("model not initialized".into()))?;
            model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Model(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Model(e.to_string()))??;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Model("no embedding generated".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn name(&self) -> &str {
            "slow"
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![1.0; 8])
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.001);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 0.001);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_deterministic_vectors() {
        let embedder = DeterministicEmbedder::new(64);
        let a = embedder.vector("Churn reduction playbook");
        assert_eq!(a.len(), 64);
        assert_eq!(a, embedder.vector("churn   REDUCTION playbook"));

        let related = embedder.vector("churn reduction");
        let unrelated = embedder.vector("quarterly tax filing");
        assert!(cosine_similarity(&a, &related) > cosine_similarity(&a, &unrelated));

        assert!(embedder.vector("").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_fallback_vectors_survive_json() {
        let vector = DeterministicEmbedder::default().vector("net revenue retention");
        let json = serde_json::to_string(&vector).unwrap();
        let back: Vec<f32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vector);
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_fallback() {
        let pipeline = EmbeddingPipeline::new(
            Some(Arc::new(SlowEmbedder)),
            8,
            Duration::from_millis(20),
        );
        let embedding = pipeline.embed("pricing objections", false).await.unwrap();
        assert_eq!(embedding.source, VectorSource::Fallback);
        assert_eq!(embedding.vector, DeterministicEmbedder::new(8).vector("pricing objections"));

        let strict = pipeline.embed("pricing objections", true).await;
        assert!(matches!(strict, Err(EmbeddingError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_model_vectors_used_when_available() {
        let pipeline = EmbeddingPipeline::new(
            Some(Arc::new(DeterministicEmbedder::new(16))),
            16,
            Duration::from_secs(1),
        );
        let embedding = pipeline.embed("renewal risk", true).await.unwrap();
        assert_eq!(embedding.source, VectorSource::Model);

        let no_model = EmbeddingPipeline::new(None, 16, Duration::from_secs(1));
        assert!(matches!(
            no_model.embed("renewal risk", true).await,
            Err(EmbeddingError::NoModel)
        ));
        assert_eq!(
            no_model.embed("renewal risk", false).await.unwrap().source,
            VectorSource::Fallback
        );
    }

    #[cfg(feature = "fastembed")]
    #[tokio::test]
    #[ignore = "requires model download (~90MB)"]
    async fn test_fastembed_single() {
        let embedder = FastEmbedder::new();
        let vector = embedder.embed("hello world").await.unwrap();
        assert_eq!(vector.len(), EMBEDDING_DIMENSIONS);
        assert!(embedder.is_loaded().await);
    }
}
