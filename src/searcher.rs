//! Retrieval over the vector store and formatting of retrieved passages

use crate::embedder::Embedder;
use crate::error::Result;
use crate::index::{SearchResult, VectorIndex};
use std::fmt::Write;

/// Semantic searcher
pub struct Searcher {
    index: VectorIndex,
    embedder: Embedder,
}

impl Searcher {
    pub fn new(index: VectorIndex, embedder: Embedder) -> Self {
        Self { index, embedder }
    }

    /// Chunks most similar to the query, best first
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedder.embed_one(query)?;
        self.index.search(&query_embedding, top_k)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            files: self.index.file_count(),
            chunks: self.index.chunk_count(),
            model: self.index.config().model.model_name().to_string(),
        }
    }
}

/// Index statistics
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Number of indexed files
    pub files: usize,
    /// Number of chunks
    pub chunks: usize,
    /// Model name used for embeddings
    pub model: String,
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} files, {} chunks ({})",
            self.files, self.chunks, self.model
        )
    }
}

/// Render retrieved chunks as fenced, located passages.
///
/// Stops before a passage would push the text past `max_chars`; the first
/// passage is always kept, truncated if necessary.
pub fn format_context(results: &[SearchResult], max_chars: usize) -> String {
    let mut output = String::new();

    for result in results {
        let chunk = &result.chunk;
        let mut passage = String::new();
        let _ = writeln!(passage, "// {} (score {:.2})", chunk.location(), result.score);
        let _ = writeln!(passage, "```{}", chunk.language.as_deref().unwrap_or(""));
        passage.push_str(chunk.text.trim_end());
        passage.push_str("\n```\n\n");

        if output.len() + passage.len() > max_chars {
            if output.is_empty() {
                output.extend(passage.chars().take(max_chars));
            }
            break;
        }
        output.push_str(&passage);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;

    fn result(path: &str, start: usize, text: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: 0,
                text: text.to_string(),
                file_path: path.to_string(),
                start_line: start,
                end_line: start + text.lines().count() - 1,
                file_hash: "hash".to_string(),
                language: Some("rust".to_string()),
            },
            score,
        }
    }

    #[test]
    fn test_format_context_includes_locations() {
        let results = vec![
            result("src/foo.rs", 10, "fn foo() -> u32 {\n    42\n}", 0.91),
            result("src/bar.rs", 1, "fn bar() {}", 0.55),
        ];

        let context = format_context(&results, 10_000);
        assert!(context.contains("// src/foo.rs:10-12 (score 0.91)"));
        assert!(context.contains("```rust\nfn foo() -> u32 {"));
        assert!(context.contains("// src/bar.rs:1 (score 0.55)"));
        assert!(context.find("foo.rs").unwrap() < context.find("bar.rs").unwrap());
    }

    #[test]
    fn test_format_context_respects_budget() {
        let results = vec![
            result("a.rs", 1, &"x".repeat(100), 0.9),
            result("b.rs", 1, &"y".repeat(100), 0.8),
        ];

        let context = format_context(&results, 150);
        assert!(context.contains("a.rs"));
        assert!(!context.contains("b.rs"));

        let truncated = format_context(&results, 20);
        assert_eq!(truncated.chars().count(), 20);
    }

    #[test]
    fn test_format_context_empty() {
        assert!(format_context(&[], 100).is_empty());
    }
}
