//! Query engine contract
//!
//! The session only talks to the index and the language model through
//! [`QueryEngine`]. [`RetrievalEngine`] is the implementation the binary
//! uses; tests drive the session with scripted engines.

mod retrieval;

pub use retrieval::{RetrievalEngine, RetrievalHandle};

use crate::config::ValidatedConfig;
use crate::error::Result;
use crate::protocol::{Status, StatusRecord};
use std::path::Path;

/// Answer produced by a query engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub status: Status,
    pub message: String,
}

impl QueryResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }
}

impl From<QueryResponse> for StatusRecord {
    fn from(response: QueryResponse) -> Self {
        match response.status {
            Status::Success => StatusRecord::answer(response.message),
            Status::Error => StatusRecord::error(response.message),
        }
    }
}

/// Builds retrieval indexes and answers queries against them
pub trait QueryEngine {
    /// Live index plus model client; owned by exactly one session
    type Handle;

    /// Build or load the index for `root_dir`.
    ///
    /// With `force_recreate` any cached index is discarded and rebuilt from
    /// source files.
    fn build(
        &mut self,
        root_dir: &Path,
        config: &ValidatedConfig,
        force_recreate: bool,
    ) -> Result<Self::Handle>;

    /// Answer one natural-language query
    fn query(&mut self, handle: &mut Self::Handle, text: &str) -> Result<QueryResponse>;
}
