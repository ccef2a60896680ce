//! Persistent vector store using usearch (HNSW algorithm)
//!
//! The store lives in `<root>/.talk_codebase/` and consists of the HNSW
//! vectors, the chunk metadata (bincode), and the index settings (JSON).

use crate::chunker::Chunk;
use crate::config::{EmbeddingModel, Settings};
use crate::error::{Result, TalkError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// Name of the per-repository store directory
pub const STORE_DIR_NAME: &str = ".talk_codebase";

/// Where the index lives and how it was built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Root directory being indexed
    pub root_path: PathBuf,
    /// Directory holding the index files
    pub index_dir: PathBuf,
    /// Embedding model used for the vectors
    pub model: EmbeddingModel,
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
    /// Files above this size (bytes) are skipped
    pub max_file_size: u64,
}

impl IndexConfig {
    pub fn new(root_path: PathBuf, settings: &Settings) -> Self {
        let index_dir = root_path.join(STORE_DIR_NAME);
        Self {
            root_path,
            index_dir,
            model: settings.embedding_model.clone(),
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            max_file_size: 10 * 1024 * 1024,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join("vectors.usearch")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.index_dir.join("metadata.bin")
    }

    pub fn config_path(&self) -> PathBuf {
        self.index_dir.join("config.json")
    }

    /// True when all index files are on disk
    pub fn exists(&self) -> bool {
        self.index_path().exists() && self.metadata_path().exists() && self.config_path().exists()
    }

    /// Read the settings a stored index was built with
    pub fn load_stored(index_dir: &Path) -> Result<Self> {
        let config_path = index_dir.join("config.json");
        if !config_path.exists() {
            return Err(TalkError::NoIndex);
        }
        let json = std::fs::read_to_string(config_path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// A stored index can be reused when it was built the same way
    pub fn is_compatible_with(&self, stored: &IndexConfig) -> bool {
        self.model == stored.model
            && self.chunk_size == stored.chunk_size
            && self.chunk_overlap == stored.chunk_overlap
    }

    fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.index_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(self.config_path(), json)?;
        Ok(())
    }

    /// Delete every stored index file
    pub fn purge(&self) -> Result<()> {
        if self.index_dir.exists() {
            info!("Removing vector store at {:?}", self.index_dir);
            std::fs::remove_dir_all(&self.index_dir)?;
        }
        Ok(())
    }
}

/// Metadata for all indexed chunks
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexMetadata {
    /// All chunks in the index
    pub chunks: Vec<Chunk>,
    /// Map of file paths to their hashes
    pub file_hashes: HashMap<String, String>,
    /// Next chunk ID to assign
    pub next_id: u64,
    /// Model name used to create embeddings
    pub model_name: String,
    /// Embedding vector dimension
    pub dimension: usize,
}

/// Vector index for semantic retrieval
pub struct VectorIndex {
    index: Index,
    metadata: IndexMetadata,
    config: IndexConfig,
}

fn index_options(dimensions: usize) -> IndexOptions {
    IndexOptions {
        dimensions,
        metric: MetricKind::Cos,
        quantization: ScalarKind::F32,
        connectivity: 16,
        expansion_add: 128,
        expansion_search: 64,
        multi: false,
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| TalkError::InvalidPath(format!("{:?}", path)))
}

impl VectorIndex {
    /// Create a new empty index
    pub fn new(config: IndexConfig) -> Result<Self> {
        let dimension = config.model.dimension();
        let index =
            Index::new(&index_options(dimension)).map_err(|e| TalkError::Index(e.to_string()))?;

        let metadata = IndexMetadata {
            model_name: config.model.model_name().to_string(),
            dimension,
            ..Default::default()
        };

        Ok(Self {
            index,
            metadata,
            config,
        })
    }

    /// Load an existing index from disk
    pub fn load(config: IndexConfig) -> Result<Self> {
        if !config.exists() {
            return Err(TalkError::NoIndex);
        }

        let index_path = config.index_path();
        info!("Loading vector store from {:?}", index_path);

        let metadata_bytes = std::fs::read(config.metadata_path())?;
        let metadata: IndexMetadata = bincode::deserialize(&metadata_bytes)?;

        let index = Index::new(&index_options(metadata.dimension))
            .map_err(|e| TalkError::Index(e.to_string()))?;
        index
            .load(path_str(&index_path)?)
            .map_err(|e| TalkError::Index(e.to_string()))?;

        info!(
            "Loaded {} vectors, {} chunks",
            index.size(),
            metadata.chunks.len()
        );

        Ok(Self {
            index,
            metadata,
            config,
        })
    }

    /// Save index, metadata, and settings to disk
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.index_dir)?;

        let index_path = self.config.index_path();
        info!("Saving vector store to {:?}", index_path);

        self.index
            .save(path_str(&index_path)?)
            .map_err(|e| TalkError::Index(e.to_string()))?;

        let metadata_bytes = bincode::serialize(&self.metadata)?;
        std::fs::write(self.config.metadata_path(), metadata_bytes)?;

        self.config.save()?;

        Ok(())
    }

    /// Add chunks with their embeddings to the index
    pub fn add_chunks(&mut self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(TalkError::Index(
                "Chunks and embeddings count mismatch".to_string(),
            ));
        }

        self.index
            .reserve(self.index.size() + chunks.len())
            .map_err(|e| TalkError::Index(e.to_string()))?;

        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            self.index
                .add(chunk.id, embedding)
                .map_err(|e| TalkError::Index(e.to_string()))?;
            debug!("Added chunk {} from {}", chunk.id, chunk.file_path);
        }

        for chunk in chunks {
            self.metadata.next_id = self.metadata.next_id.max(chunk.id + 1);
            self.metadata
                .file_hashes
                .insert(chunk.file_path.clone(), chunk.file_hash.clone());
            self.metadata.chunks.push(chunk);
        }

        Ok(())
    }

    /// Nearest chunks to the query embedding, best first
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if self.index.size() == 0 {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(query_embedding, top_k)
            .map_err(|e| TalkError::Index(e.to_string()))?;

        let mut results: Vec<SearchResult> = matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(key, distance)| {
                self.metadata
                    .chunks
                    .iter()
                    .find(|c| c.id == *key)
                    .map(|chunk| SearchResult {
                        chunk: chunk.clone(),
                        score: 1.0 - distance,
                    })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));

        Ok(results)
    }

    pub fn chunk_count(&self) -> usize {
        self.metadata.chunks.len()
    }

    pub fn file_count(&self) -> usize {
        self.metadata.file_hashes.len()
    }

    pub fn next_id(&self) -> u64 {
        self.metadata.next_id
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }
}

/// Retrieved chunk with its similarity score
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matched chunk
    pub chunk: Chunk,
    /// Similarity score (0.0 to 1.0, higher is better)
    pub score: f32,
}
