//! Retrieval-augmented query engine over a local vector store

use super::{QueryEngine, QueryResponse};
use crate::config::{EmbeddingModel, ValidatedConfig};
use crate::embedder::Embedder;
use crate::error::{Result, TalkError};
use crate::index::{IndexConfig, VectorIndex};
use crate::indexer::Indexer;
use crate::llm::{chat_model, ChatModel};
use crate::searcher::Searcher;
use std::path::Path;
use tracing::{debug, info, warn};

/// Query engine backed by [`Indexer`], [`Searcher`], and a [`ChatModel`].
///
/// The embedding model is loaded once and reused across rebuilds.
#[derive(Default)]
pub struct RetrievalEngine {
    embedder: Option<Embedder>,
}

/// Loaded vector store plus the model that answers from it
pub struct RetrievalHandle {
    searcher: Searcher,
    model: Box<dyn ChatModel>,
    k: usize,
}

impl RetrievalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn embedder_for(&mut self, kind: &EmbeddingModel) -> Result<Embedder> {
        match &self.embedder {
            Some(embedder) if embedder.kind() == kind => Ok(embedder.clone()),
            _ => {
                let embedder = Embedder::new(kind)?;
                self.embedder = Some(embedder.clone());
                Ok(embedder)
            }
        }
    }
}

impl QueryEngine for RetrievalEngine {
    type Handle = RetrievalHandle;

    fn build(
        &mut self,
        root_dir: &Path,
        config: &ValidatedConfig,
        force_recreate: bool,
    ) -> Result<RetrievalHandle> {
        let settings = config.settings();

        let root = root_dir
            .canonicalize()
            .map_err(|e| TalkError::InvalidPath(format!("{:?}: {}", root_dir, e)))?;
        if !root.is_dir() {
            return Err(TalkError::InvalidPath(format!(
                "{:?} is not a directory",
                root
            )));
        }

        // Resolve the model first so a bad credential or path fails before indexing.
        let model = chat_model(settings)?;
        let embedder = self.embedder_for(&settings.embedding_model)?;

        let index = open_index(
            IndexConfig::new(root, settings),
            embedder.clone(),
            force_recreate,
        )?;
        let searcher = Searcher::new(index, embedder);

        info!(
            "Vector store ready: {}; answering with {}",
            searcher.stats(),
            model.name()
        );

        Ok(RetrievalHandle {
            searcher,
            model,
            k: settings.k,
        })
    }

    fn query(&mut self, handle: &mut RetrievalHandle, text: &str) -> Result<QueryResponse> {
        let results = handle.searcher.search(text, handle.k)?;
        debug!("Retrieved {} chunks for query", results.len());
        for result in &results {
            debug!("  {} ({:.2})", result.chunk.location(), result.score);
        }

        let answer = handle.model.answer(text, &results)?;
        Ok(QueryResponse::success(answer))
    }
}

/// What to do with the index stored under the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexPlan {
    /// Load the stored index
    Reuse,
    /// Nothing is stored yet
    Build,
    /// The stored index is forced out, incomplete, or built differently
    PurgeAndBuild,
}

fn plan_index(config: &IndexConfig, force_recreate: bool) -> IndexPlan {
    if force_recreate {
        info!("Recreating vector store");
        return IndexPlan::PurgeAndBuild;
    }

    if !config.exists() {
        if config.index_dir.exists() {
            warn!("Stored vector store is incomplete, rebuilding");
            return IndexPlan::PurgeAndBuild;
        }
        return IndexPlan::Build;
    }

    match IndexConfig::load_stored(&config.index_dir) {
        Ok(stored) if config.is_compatible_with(&stored) => IndexPlan::Reuse,
        Ok(_) => {
            info!("Stored vector store was built with different settings, rebuilding");
            IndexPlan::PurgeAndBuild
        }
        Err(e) => {
            warn!("Could not read stored vector store settings: {}", e);
            IndexPlan::PurgeAndBuild
        }
    }
}

/// Reuse a compatible stored index, otherwise build one.
/// A stored index that fails to load is purged and rebuilt.
fn open_index(config: IndexConfig, embedder: Embedder, force_recreate: bool) -> Result<VectorIndex> {
    let plan = plan_index(&config, force_recreate);
    debug!("Vector store plan: {:?}", plan);

    if plan == IndexPlan::Reuse {
        match VectorIndex::load(config.clone()) {
            Ok(index) => return Ok(index),
            Err(e) => warn!("Stored vector store is unreadable, rebuilding: {}", e),
        }
    }

    if plan != IndexPlan::Build {
        config.purge()?;
    }

    Indexer::new(config, embedder).build_index()
}
