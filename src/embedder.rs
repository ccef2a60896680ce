//! Local embedding generation using fastembed (ONNX runtime)
//!
//! Embeddings are computed on this machine for both model types; only the
//! chat completion may leave it. Models are downloaded once and cached.

use crate::config::EmbeddingModel;
use crate::error::{Result, TalkError};
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tracing::info;

/// Local embedder, cheap to clone
#[derive(Clone)]
pub struct Embedder {
    model: Arc<TextEmbedding>,
    kind: EmbeddingModel,
}

impl Embedder {
    /// Load the given model, downloading it on first use
    pub fn new(kind: &EmbeddingModel) -> Result<Self> {
        info!("Loading embedding model: {}", kind.model_name());

        let fastembed_model = match kind {
            EmbeddingModel::AllMiniLmL6V2 => FastEmbedModel::AllMiniLML6V2,
            EmbeddingModel::BgeSmallEnV15 => FastEmbedModel::BGESmallENV15,
            EmbeddingModel::NomicEmbedTextV15 => FastEmbedModel::NomicEmbedTextV15,
        };

        // Download progress goes to stderr; stdout belongs to the protocol.
        let model = TextEmbedding::try_new(
            InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| TalkError::Embedding(e.to_string()))?;

        info!("Model loaded (dimension: {})", kind.dimension());

        Ok(Self {
            model: Arc::new(model),
            kind: kind.clone(),
        })
    }

    pub fn kind(&self) -> &EmbeddingModel {
        &self.kind
    }

    /// Embed a single text string
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self
            .model
            .embed(vec![text], None)
            .map_err(|e| TalkError::Embedding(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| TalkError::Embedding("No embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        self.model
            .embed(texts, None)
            .map_err(|e| TalkError::Embedding(e.to_string()))
    }

    /// Embed texts in batches, reporting `(done, total)` after each batch
    pub fn embed_batch_with_progress<F>(
        &self,
        texts: &[String],
        batch_size: usize,
        mut progress: F,
    ) -> Result<Vec<Vec<f32>>>
    where
        F: FnMut(usize, usize),
    {
        let total = texts.len();
        let mut all_embeddings = Vec::with_capacity(total);

        for batch in texts.chunks(batch_size) {
            let batch_refs: Vec<&str> = batch.iter().map(|s| s.as_str()).collect();
            all_embeddings.extend(self.embed_batch(batch_refs)?);
            progress(all_embeddings.len(), total);
        }

        Ok(all_embeddings)
    }
}
