//! Scoring Harness: conformance testing for model-scoring HTTP servers
//!
//! This crate drives a scoring server-under-test end to end:
//!
//! - [`lifecycle`]: spawns the server in its own process group, waits for it
//!   to accept connections and kills the whole group on teardown
//! - [`client`]: the `/uploadMarBytes`, `/uploadMarFile` and `/v2/score`
//!   protocol, with raw and typed response handling
//! - [`equivalence`]: checks that server cluster labels group rows the same
//!   way a reference result does, whatever the label ids
//! - [`harness`]: ties the three together as a scoped resource
//!
//! ```ignore
//! let config = HarnessConfig::from_env()?;
//! with_harness(config, None, |client| async move {
//!     client.upload_model_bytes(std::fs::read("Kmeans.mar")?).await?;
//!     let report = EquivalenceChecker::default().check(&client, &rows).await?;
//!     Ok::<_, HarnessError>(report)
//! })
//! .await?;
//! ```

pub mod artifact;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod equivalence;
pub mod error;
pub mod harness;
pub mod lifecycle;
pub mod obs;
pub mod records;
pub mod telemetry;

pub use artifact::{artifact_digest, ModelArtifact};
pub use client::{ScoringClient, TypedScoringClient};
pub use config::{ClientConfig, HarnessConfig, LaunchConfig, ReadinessProbe};
pub use endpoint::ServerEndpoint;
pub use equivalence::{
    parse_reference_jsonl, read_reference_jsonl, EquivalenceChecker, EquivalenceReport,
    LabelEquivalenceMap, LabelPair, LabelScorer, MatchMode, ReferenceRow,
};
pub use error::{EquivalenceViolation, HarnessError, Result};
pub use harness::{with_harness, ScoringHarness};
pub use lifecycle::{ServerHandle, ServerLauncher, ServerSlot, ServerState};
pub use records::{Label, ScoreRecord, ScoreResponse, ScoredRow};
pub use telemetry::init_tracing;
