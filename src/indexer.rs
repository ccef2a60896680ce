//! File discovery and index construction
//!
//! Walks the repository respecting .gitignore and the exclusion lists,
//! chunks files, generates embeddings, and writes the vector store.

use crate::chunker::Chunker;
use crate::config::{is_excluded_dir, should_index_file};
use crate::embedder::Embedder;
use crate::error::{Result, TalkError};
use crate::index::{IndexConfig, VectorIndex};
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const EMBED_BATCH_SIZE: usize = 32;

/// File to be indexed with content and hash
#[derive(Debug)]
struct SourceFile {
    relative_path: String,
    content: String,
    hash: String,
}

/// Builds the vector store for one repository
pub struct Indexer {
    config: IndexConfig,
    embedder: Embedder,
    chunker: Chunker,
}

impl Indexer {
    pub fn new(config: IndexConfig, embedder: Embedder) -> Self {
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap);
        Self {
            config,
            embedder,
            chunker,
        }
    }

    /// Build a fresh index from scratch and save it
    pub fn build_index(&self) -> Result<VectorIndex> {
        info!("Building vector store for {:?}", self.config.root_path);

        let mut index = VectorIndex::new(self.config.clone())?;
        let files = self.discover_files()?;

        if files.is_empty() {
            info!("No files to index");
        } else {
            self.index_files(&mut index, files)?;
        }

        index.save()?;
        Ok(index)
    }

    /// Discover and read all indexable files under the root directory
    fn discover_files(&self) -> Result<Vec<SourceFile>> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(spinner_style());
        pb.set_message("Discovering files...");

        let root = self
            .config
            .root_path
            .canonicalize()
            .map_err(|e| TalkError::InvalidPath(format!("{:?}: {}", self.config.root_path, e)))?;

        let walker = WalkBuilder::new(&root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .parents(true)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                !(is_dir && entry.file_name().to_str().map(is_excluded_dir).unwrap_or(false))
            })
            .build();

        let max_file_size = self.config.max_file_size;
        let file_paths: Vec<PathBuf> = walker
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().map(|ft| ft.is_file()).unwrap_or(false)
                    && should_index_file(entry.path())
            })
            .filter(|entry| {
                entry
                    .metadata()
                    .map(|m| m.len() <= max_file_size)
                    .unwrap_or(false)
            })
            .map(|entry| entry.path().to_path_buf())
            .collect();

        pb.set_message(format!("Found {} files, reading...", file_paths.len()));

        let files: Vec<SourceFile> = file_paths
            .par_iter()
            .filter_map(|path| read_source_file(&root, path))
            .collect();

        pb.finish_with_message("File discovery complete");
        info!("Discovered {} indexable files", files.len());

        Ok(files)
    }

    /// Chunk, embed, and add files to the index
    fn index_files(&self, index: &mut VectorIndex, files: Vec<SourceFile>) -> Result<()> {
        let mut all_chunks = Vec::new();
        let mut next_id = index.next_id();

        for file in &files {
            let chunks =
                self.chunker
                    .chunk_text(&file.content, &file.relative_path, &file.hash, next_id);
            next_id += chunks.len() as u64;
            all_chunks.extend(chunks);
        }

        info!(
            "Created {} chunks from {} files",
            all_chunks.len(),
            files.len()
        );

        if all_chunks.is_empty() {
            return Ok(());
        }

        let pb = ProgressBar::new(all_chunks.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks embedded")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let texts: Vec<String> = all_chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings =
            self.embedder
                .embed_batch_with_progress(&texts, EMBED_BATCH_SIZE, |done, _total| {
                    pb.set_position(done as u64);
                })?;

        pb.finish_with_message("Embeddings generated");

        index.add_chunks(all_chunks, embeddings)
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn read_source_file(root: &Path, path: &Path) -> Option<SourceFile> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Skipping unreadable file {:?}: {}", path, e);
            return None;
        }
    };

    let relative_path = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    Some(SourceFile {
        relative_path,
        hash: compute_hash(&content),
        content,
    })
}

/// Compute SHA-256 hash of content
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
