//! Scoped harness: one server-under-test plus a client bound to it.

use crate::client::{ScoringClient, TypedScoringClient};
use crate::config::HarnessConfig;
use crate::endpoint::ServerEndpoint;
use crate::error::{HarnessError, Result};
use crate::lifecycle::{ServerLauncher, ServerSlot, ServerState};
use crate::obs;
use crate::records::{ScoreRecord, ScoreResponse};
use std::future::Future;
use std::path::Path;
use tracing::{info, Instrument};
use uuid::Uuid;

/// A server-under-test and the client session talking to it.
///
/// Holds at most one running server. [`ScoringHarness::shutdown`] performs the
/// full teardown; dropping the harness without it still kills the server's
/// process group.
#[derive(Debug)]
pub struct ScoringHarness {
    session_id: String,
    endpoint: ServerEndpoint,
    launcher: ServerLauncher,
    slot: ServerSlot,
    client: ScoringClient,
    span: tracing::Span,
}

impl ScoringHarness {
    /// Build a harness without starting anything.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let span = obs::session_span(&session_id);
        let client = ScoringClient::new(config.endpoint.clone(), &config.client)?;

        Ok(Self {
            session_id,
            launcher: ServerLauncher::from_config(&config),
            endpoint: config.endpoint,
            slot: ServerSlot::new(),
            client,
            span,
        })
    }

    /// Build a harness and start its server, optionally pre-loaded with a
    /// model archive.
    pub async fn launch(config: HarnessConfig, model: Option<&Path>) -> Result<Self> {
        let mut harness = Self::new(config)?;
        harness.start(model).await?;
        Ok(harness)
    }

    /// Start the server and wait until it is ready.
    ///
    /// A harness owns one server for its whole life: starting again after
    /// [`ScoringHarness::shutdown`] fails with [`HarnessError::AlreadyStopped`].
    pub async fn start(&mut self, model: Option<&Path>) -> Result<()> {
        if self.slot.state() == ServerState::Stopped {
            return Err(HarnessError::AlreadyStopped(self.endpoint.clone()));
        }
        let span = self.span.clone();
        async {
            info!(endpoint = %self.endpoint, model = ?model, "starting scoring server");
            self.slot
                .start(&self.launcher, model, &self.endpoint)
                .await
                .map(|_| ())
        }
        .instrument(span)
        .await
    }

    /// Kill the server's process group and wait out the drain delay.
    /// Idempotent.
    pub async fn shutdown(&mut self) -> Result<()> {
        let span = self.span.clone();
        self.slot.stop().instrument(span).await
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ServerState {
        self.slot.state()
    }

    pub fn pid(&self) -> Option<u32> {
        self.slot.handle().map(|h| h.pid())
    }

    /// Raw-response client.
    pub fn client(&self) -> &ScoringClient {
        &self.client
    }

    /// Client that turns error statuses into [`HarnessError::Protocol`].
    pub fn typed(&self) -> TypedScoringClient<'_> {
        self.client.typed()
    }

    pub async fn upload_model_bytes(&self, bytes: impl Into<Vec<u8>>) -> Result<ScoreResponse> {
        self.client
            .upload_model_bytes(bytes)
            .instrument(self.span.clone())
            .await
    }

    pub async fn upload_model_file(&self, path: &Path) -> Result<ScoreResponse> {
        self.client
            .upload_model_file(path)
            .instrument(self.span.clone())
            .await
    }

    pub async fn score(&self, rows: &[ScoreRecord]) -> Result<ScoreResponse> {
        self.client.score(rows).instrument(self.span.clone()).await
    }
}

/// Run `body` against a freshly started server, then shut it down.
///
/// Shutdown runs whether `body` succeeds or fails; a panic inside `body` still
/// kills the process group when the harness is dropped. The body's error wins
/// over a shutdown error.
pub async fn with_harness<F, Fut, T, E>(
    config: HarnessConfig,
    model: Option<&Path>,
    body: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(ScoringClient) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<HarnessError>,
{
    let mut harness = ScoringHarness::launch(config, model).await?;
    let span = harness.span.clone();
    let outcome = body(harness.client().clone()).instrument(span).await;
    let stopped = harness.shutdown().await;

    let value = outcome?;
    stopped?;
    Ok(value)
}
