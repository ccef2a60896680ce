//! Text chunking for retrieval
//!
//! Splits source files into overlapping, line-aligned chunks suitable for
//! embedding. Line numbers are kept so answers can cite their sources.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// A chunk of source text with its location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier for this chunk
    pub id: u64,
    /// The text content
    pub text: String,
    /// Source file path (relative to the repository root)
    pub file_path: String,
    /// Starting line number (1-indexed)
    pub start_line: usize,
    /// Ending line number (1-indexed)
    pub end_line: usize,
    /// SHA-256 hash of the source file
    pub file_hash: String,
    /// Language hint used when quoting the chunk in a prompt
    pub language: Option<String>,
}

impl Chunk {
    /// `path:start-end`, or `path:line` for single-line chunks
    pub fn location(&self) -> String {
        if self.start_line == self.end_line {
            format!("{}:{}", self.file_path, self.start_line)
        } else {
            format!("{}:{}-{}", self.file_path, self.start_line, self.end_line)
        }
    }
}

/// Splits text into overlapping chunks
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// `chunk_size` and `overlap` are in characters
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self { chunk_size, overlap }
    }

    /// Split text into chunks with ids starting at `start_id`.
    ///
    /// Chunks break on line boundaries; a chunk ends before the line that
    /// would push it past `chunk_size`, and the next one starts with the
    /// trailing lines that fit in `overlap`.
    pub fn chunk_text(
        &self,
        text: &str,
        file_path: &str,
        file_hash: &str,
        start_id: u64,
    ) -> Vec<Chunk> {
        let language = detect_language(file_path);
        let lines: Vec<&str> = text.lines().collect();

        if lines.iter().all(|l| l.trim().is_empty()) {
            return vec![];
        }

        let mut chunks = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut window_size = 0;
        let mut window_start = 1;
        let mut next_id = start_id;

        let mut flush = |window: &[&str], window_start: usize, next_id: &mut u64| {
            let body = window.join("\n");
            if body.trim().is_empty() {
                return;
            }
            chunks.push(Chunk {
                id: *next_id,
                text: body,
                file_path: file_path.to_string(),
                start_line: window_start,
                end_line: window_start + window.len() - 1,
                file_hash: file_hash.to_string(),
                language: language.clone(),
            });
            *next_id += 1;
        };

        for (i, line) in lines.iter().enumerate() {
            let line_len = line.len() + 1;

            if window_size + line_len > self.chunk_size && !window.is_empty() {
                flush(&window, window_start, &mut next_id);

                let keep = self.overlap_lines(&window).min(window.len() - 1);
                window.drain(..window.len() - keep);
                window_size = window.iter().map(|l| l.len() + 1).sum();
                window_start = i + 1 - keep;
            }

            window.push(line);
            window_size += line_len;
        }

        if !window.is_empty() {
            flush(&window, window_start, &mut next_id);
        }

        chunks
    }

    /// Number of trailing lines that fit in the overlap budget
    fn overlap_lines(&self, lines: &[&str]) -> usize {
        let mut size = 0;
        let mut count = 0;

        for line in lines.iter().rev() {
            size += line.len() + 1;
            if size > self.overlap {
                break;
            }
            count += 1;
        }

        count
    }
}

/// Detect the language from the file extension
fn detect_language(file_path: &str) -> Option<String> {
    let ext = Path::new(file_path).extension()?.to_str()?;

    let lang = match ext.to_lowercase().as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" => "javascript",
        "ts" => "typescript",
        "tsx" => "tsx",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "c" | "h" => "c",
        "cpp" => "cpp",
        "cs" => "csharp",
        "m" => "objectivec",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" => "shell",
        "pl" | "pm" => "perl",
        "lua" => "lua",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "less" => "less",
        "json" => "json",
        "md" => "markdown",
        "csv" => "csv",
        "gml" => "gml",
        _ => return None,
    };

    Some(lang.to_string())
}
