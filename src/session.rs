//! Chat session state machine
//!
//! A session validates the configuration, acquires a query-engine handle,
//! then reads messages one at a time: each query is answered before the next
//! line is read, and a recreation request rebuilds the index synchronously.
//!
//! ```text
//! AwaitingConfig -> Validating -> Ready <-> Dispatching
//!                        |          ^ \
//!                        v          |  -> Recreating
//!                   Terminated <----+
//! ```

use crate::config::{fill_defaults, validate, ConfigStore, ValidatedConfig};
use crate::engine::QueryEngine;
use crate::error::{Result, TalkError};
use crate::protocol::{Message, MessageDecoder, ProtocolMode, ResponseWriter, StatusRecord};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Log target of the readiness line; the editor plugin waits for it on stderr
/// and the subscriber keeps it enabled whatever the filter says.
pub const READY_TARGET: &str = "talk_codebase::ready";

/// Lifecycle states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingConfig,
    Validating,
    Ready,
    Dispatching,
    Recreating,
    Terminated,
}

/// Why the read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `exit` or `quit` was received
    ExitCommand,
    /// Input closed or became unreadable
    EndOfInput,
    /// The protocol stream could not be written
    OutputClosed,
}

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Queries answered by the engine
    pub queries: usize,
    /// Dispatches that produced an error record
    pub failures: usize,
    /// Successful forced recreations
    pub recreations: usize,
}

/// One chat invocation against one repository
pub struct Session<E: QueryEngine> {
    root_dir: PathBuf,
    config: ValidatedConfig,
    engine: E,
    handle: Option<E::Handle>,
    decoder: MessageDecoder,
    state: SessionState,
    stats: SessionStats,
    stop_reason: Option<StopReason>,
}

enum Step {
    Respond(StatusRecord),
    Stop,
}

impl<E: QueryEngine> Session<E> {
    /// Validate the configuration and acquire the first handle.
    ///
    /// A configuration problem is written to `out` as an error record and
    /// returned as a fatal [`TalkError::Config`]; the engine is never asked to
    /// build in that case. A failed initial build is reported the same way as
    /// a failed recreation and leaves the session ready without a handle.
    pub fn start<W: Write>(
        store: &ConfigStore,
        root_dir: &Path,
        mut engine: E,
        mode: ProtocolMode,
        out: &mut ResponseWriter<W>,
    ) -> Result<Self> {
        let mut state = SessionState::AwaitingConfig;
        transition(&mut state, SessionState::Validating);

        let config = match load_validated(store) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                transition(&mut state, SessionState::Terminated);
                out.emit(&StatusRecord::error(user_message("Cannot start chat", &e)))?;
                return Err(e);
            }
        };

        transition(&mut state, SessionState::Ready);

        let mut stats = SessionStats::default();
        let handle = match engine.build(root_dir, &config, false) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to load vector store: {}", e);
                stats.failures += 1;
                out.emit(&StatusRecord::error(user_message(
                    "Failed to load vector store",
                    &e,
                )))?;
                None
            }
        };

        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            config,
            engine,
            handle,
            decoder: MessageDecoder::new(mode),
            state,
            stats,
            stop_reason: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Read and dispatch messages until exit, end of input, or a write failure
    pub fn run<R: BufRead, W: Write>(
        &mut self,
        input: R,
        out: &mut ResponseWriter<W>,
    ) -> StopReason {
        if let Some(reason) = self.stop_reason {
            return reason;
        }

        info!(target: READY_TARGET, "Entered loop for queries...");
        let mut lines = input.lines();

        let reason = loop {
            let line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!("Input stream failed, treating as end of input: {}", e);
                    break StopReason::EndOfInput;
                }
                None => break StopReason::EndOfInput,
            };

            let Some(message) = self.decoder.push_line(&line) else {
                continue;
            };

            match self.handle_message(message) {
                Step::Respond(record) => {
                    if let Err(e) = out.emit(&record) {
                        error!("Cannot write response: {}", e);
                        break StopReason::OutputClosed;
                    }
                }
                Step::Stop => break StopReason::ExitCommand,
            }
        };

        if reason == StopReason::EndOfInput {
            if let Some(partial) = self.decoder.discard_pending() {
                warn!("Input closed mid-query, discarding {:?}", partial.trim_end());
            }
        }

        self.terminate(reason);
        reason
    }

    fn handle_message(&mut self, message: Message) -> Step {
        match message {
            Message::Query(text) => Step::Respond(self.dispatch_query(&text)),
            Message::RecreateVectorStore => Step::Respond(self.recreate()),
            Message::Invalid(reason) => {
                warn!("Rejected request: {}", reason);
                self.stats.failures += 1;
                Step::Respond(StatusRecord::error(format!("Invalid request: {}", reason)))
            }
            Message::Exit => {
                info!("User requested exit");
                Step::Stop
            }
        }
    }

    fn dispatch_query(&mut self, text: &str) -> StatusRecord {
        self.set_state(SessionState::Dispatching);
        debug!("Dispatching query: {:?}", text);

        let record = match self.handle.as_mut() {
            None => {
                self.stats.failures += 1;
                StatusRecord::error(
                    "No vector store is loaded; send RECREATE_VECTOR_STORE to rebuild it",
                )
            }
            Some(handle) => match self.engine.query(handle, text) {
                Ok(response) => {
                    self.stats.queries += 1;
                    let record = StatusRecord::from(response);
                    if !record.is_success() {
                        self.stats.failures += 1;
                    }
                    record
                }
                Err(e) => {
                    error!("Query failed: {}", e);
                    self.stats.failures += 1;
                    StatusRecord::error(user_message("Query failed", &e))
                }
            },
        };

        self.set_state(SessionState::Ready);
        record
    }

    fn recreate(&mut self) -> StatusRecord {
        self.set_state(SessionState::Recreating);
        info!("Recreating vector store...");

        // The old handle is gone before the rebuild starts, so a failed
        // rebuild can never fall back to it.
        drop(self.handle.take());

        let record = match self.engine.build(&self.root_dir, &self.config, true) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.stats.recreations += 1;
                info!("Vector store recreated");
                StatusRecord::success("Vector store recreated")
            }
            Err(e) => {
                error!("Vector store recreation failed: {}", e);
                self.stats.failures += 1;
                StatusRecord::error(user_message("Vector store recreation failed", &e))
            }
        };

        self.set_state(SessionState::Ready);
        record
    }

    fn terminate(&mut self, reason: StopReason) {
        drop(self.handle.take());
        self.set_state(SessionState::Terminated);
        self.stop_reason = Some(reason);
        info!(
            "Session ended ({:?}): {} queries, {} failures, {} recreations",
            reason, self.stats.queries, self.stats.failures, self.stats.recreations
        );
    }

    fn set_state(&mut self, next: SessionState) {
        transition(&mut self.state, next);
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug!("Session state {:?} -> {:?}", state, next);
    *state = next;
}

/// Load, complete, validate, and persist the configuration
fn load_validated(store: &ConfigStore) -> Result<ValidatedConfig> {
    let loaded = store.load().map_err(|e| match e {
        TalkError::Config(_) => e,
        other => TalkError::Config(format!(
            "Cannot read {}: {}",
            store.path().display(),
            other
        )),
    })?;

    let config = validate(&fill_defaults(loaded.unwrap_or_default()))?;

    store.persist(config.configuration()).map_err(|e| {
        TalkError::Config(format!("Cannot write {}: {}", store.path().display(), e))
    })?;

    Ok(config)
}

/// Short description for the protocol stream; details stay on stderr
fn user_message(context: &str, err: &TalkError) -> String {
    let reason = match err {
        TalkError::Config(msg) => msg.as_str(),
        TalkError::InvalidPath(_) => "a configured path does not exist",
        TalkError::Model(_) | TalkError::Http(_) => "the language model request failed",
        TalkError::Embedding(_) => "the embedding model failed",
        TalkError::Index(_) | TalkError::NoIndex | TalkError::Serialization(_) => {
            "the vector store could not be used"
        }
        TalkError::Io(_) => "a file could not be read or written",
        _ => "an internal error occurred",
    };
    format!("{}: {}", context, reason)
}
