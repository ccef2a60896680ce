//! # talk-codebase - Chat with a codebase from your editor
//!
//! A stdin/stdout bridge between an editor plugin and a retrieval-augmented
//! question answering engine. The plugin writes queries terminated by
//! `END`; every response is a JSON status record followed by an
//! `END_OF_RESPONSE` line.
//!
//! ## Features
//!
//! - **Line protocol**: Multi-line queries, control tokens, framed responses
//! - **Persistent configuration**: YAML file completed with defaults on every run
//! - **Local vector store**: Embeddings computed on your machine with ONNX runtime
//! - **Pluggable answers**: OpenAI chat models or a local model file
//!
//! ## Example
//!
//! ```no_run
//! use talk_codebase::{ConfigStore, ProtocolMode, ResponseWriter, RetrievalEngine, Session};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = ConfigStore::default_location()?;
//!     let mut out = ResponseWriter::new(std::io::stdout());
//!
//!     let mut session = Session::start(
//!         &store,
//!         Path::new("."),
//!         RetrievalEngine::new(),
//!         ProtocolMode::Sentinel,
//!         &mut out,
//!     )?;
//!     session.run(std::io::stdin().lock(), &mut out);
//!
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod protocol;
pub mod searcher;
pub mod session;

// Re-export commonly used types
pub use chunker::{Chunk, Chunker};
pub use config::{fill_defaults, validate, ConfigStore, Configuration, ModelType, ValidatedConfig};
pub use embedder::Embedder;
pub use engine::{QueryEngine, QueryResponse, RetrievalEngine};
pub use error::{Result, TalkError};
pub use index::{SearchResult, VectorIndex};
pub use indexer::Indexer;
pub use protocol::{MessageDecoder, ProtocolMode, ResponseWriter, Status, StatusRecord};
pub use searcher::{IndexStats, Searcher};
pub use session::{Session, SessionState, StopReason, READY_TARGET};
