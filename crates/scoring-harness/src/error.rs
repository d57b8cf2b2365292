//! Error types for the scoring harness

use crate::endpoint::ServerEndpoint;
use crate::records::Label;
use thiserror::Error;

/// Two clusterings disagree on a row.
///
/// `row` is the zero-based index of the offending row in the reference
/// sequence; the violation is raised on the first conflicting occurrence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EquivalenceViolation {
    /// One reference group was split across two observed labels.
    #[error(
        "row {row}: reference label {reference} previously scored as {expected}, now scored as {actual}"
    )]
    Split {
        row: usize,
        reference: Label,
        expected: Label,
        actual: Label,
    },

    /// Two reference groups collapsed into one observed label.
    #[error(
        "row {row}: observed label {observed} already stands for reference label {previous}, now also for {reference}"
    )]
    Merged {
        row: usize,
        observed: Label,
        previous: Label,
        reference: Label,
    },

    /// Labels were required to match verbatim and did not.
    #[error("row {row}: expected label {reference}, server scored {actual}")]
    Mismatch {
        row: usize,
        reference: Label,
        actual: Label,
    },
}

impl EquivalenceViolation {
    pub fn row(&self) -> usize {
        match self {
            EquivalenceViolation::Split { row, .. }
            | EquivalenceViolation::Merged { row, .. }
            | EquivalenceViolation::Mismatch { row, .. } => *row,
        }
    }
}

/// Errors that can occur while driving a server-under-test
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The server process could not be spawned
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The readiness probe gave up before the server accepted connections
    #[error("server at {endpoint} not ready after {waited_ms}ms")]
    NotReady {
        endpoint: ServerEndpoint,
        waited_ms: u64,
    },

    /// The server process exited before it became ready
    #[error("server exited before becoming ready: {status}")]
    ServerExited { status: String },

    /// A server is already running in this slot
    #[error("a server is already running at {0}")]
    AlreadyRunning(ServerEndpoint),

    /// The harness already shut its server down; it does not restart
    #[error("server at {0} was already shut down")]
    AlreadyStopped(ServerEndpoint),

    /// Network-level failure reaching the server
    #[error("transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status (typed client only)
    #[error("server returned HTTP {status}: {body}")]
    Protocol { status: u16, body: String },

    /// Success status but the body is not a scoring envelope
    #[error("malformed scoring response: {0}")]
    MalformedResponse(String),

    /// Two clusterings disagree on grouping
    #[error("cluster labels are not equivalent: {0}")]
    Equivalence(#[from] EquivalenceViolation),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Whether the error is a connection-level failure (refused, timed out).
    pub fn is_transport(&self) -> bool {
        matches!(self, HarnessError::Transport { .. })
    }
}

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;
