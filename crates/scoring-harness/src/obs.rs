//! Structured tracing events for the harness lifecycle.
//!
//! Every event carries an `event` field (`server.launched`, `score.sent`, ...)
//! so log pipelines can filter on it. Levels follow severity: lifecycle and
//! verdicts at `info!`, per-request traffic at `debug!`, cleanup problems at
//! `warn!`.

use tracing::{debug, info, warn};

/// Span tagging every event of one harness session with its id.
///
/// Returned un-entered: attach it with `Instrument::instrument` in async code.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("scoring_harness.session", session_id = %session_id)
}

pub fn emit_server_launched(pid: u32, program: &str, endpoint: &str) {
    info!(event = "server.launched", pid = pid, program = %program, endpoint = %endpoint);
}

pub fn emit_server_ready(endpoint: &str, waited_ms: u64) {
    info!(event = "server.ready", endpoint = %endpoint, waited_ms = waited_ms);
}

pub fn emit_server_stopped(pid: u32, pgid: Option<i32>, drain_ms: u64) {
    info!(event = "server.stopped", pid = pid, pgid = ?pgid, drain_ms = drain_ms);
}

/// Emit event: teardown hit an error it could not act on (warning level).
pub fn emit_teardown_error(pid: u32, error: &dyn std::fmt::Display) {
    warn!(event = "server.teardown_error", pid = pid, error = %error);
}

pub fn emit_model_uploaded(route: &str, digest: &str, size: usize, status: u16) {
    info!(
        event = "model.uploaded",
        route = %route,
        digest = %digest.get(..12).unwrap_or(digest),
        size = size,
        status = status,
    );
}

pub fn emit_score_sent(rows: usize, status: u16, elapsed_ms: u64) {
    debug!(event = "score.sent", rows = rows, status = status, elapsed_ms = elapsed_ms);
}

pub fn emit_equivalence_checked(rows: usize, distinct_labels: usize, passed: bool) {
    info!(
        event = "equivalence.checked",
        rows = rows,
        distinct_labels = distinct_labels,
        passed = passed,
    );
}
