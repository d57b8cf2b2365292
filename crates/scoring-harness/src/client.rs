//! Scoring protocol client
//!
//! Two flavours over the same HTTP session:
//! - [`ScoringClient`] returns every reply as a raw [`ScoreResponse`], error
//!   statuses included, so callers can assert on exact wire behavior.
//! - [`TypedScoringClient`] turns non-success statuses into
//!   [`HarnessError::Protocol`] and parses labels out of the envelope.
//!
//! Transport failures (refused, timed out) surface as
//! [`HarnessError::Transport`] from both; nothing is retried.

use crate::artifact::{artifact_digest, ModelArtifact};
use crate::config::ClientConfig;
use crate::endpoint::ServerEndpoint;
use crate::error::{HarnessError, Result};
use crate::obs;
use crate::records::{records_envelope, Label, ScoreRecord, ScoreResponse, ScoredRow};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

pub const UPLOAD_BYTES_PATH: &str = "/uploadMarBytes";
pub const UPLOAD_FILE_PATH: &str = "/uploadMarFile";
pub const SCORE_PATH: &str = "/v2/score";

/// Multipart field carrying the archive in file uploads.
pub const UPLOAD_FILE_FIELD: &str = "file";

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const APPLICATION_JSON: &str = "application/json";

/// The server's content negotiation only answers scoring requests that
/// accept both JSON and plain text.
pub const SCORE_ACCEPT: &str = "application/json,text/plain";

/// Raw-response client for one server-under-test.
#[derive(Debug, Clone)]
pub struct ScoringClient {
    endpoint: ServerEndpoint,
    http: reqwest::Client,
}

impl ScoringClient {
    pub fn new(endpoint: ServerEndpoint, config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Typed view over this client.
    pub fn typed(&self) -> TypedScoringClient<'_> {
        TypedScoringClient { client: self }
    }

    /// POST the archive as a raw octet-stream to `/uploadMarBytes`.
    pub async fn upload_model_bytes(&self, bytes: impl Into<Vec<u8>>) -> Result<ScoreResponse> {
        let bytes = bytes.into();
        let digest = artifact_digest(&bytes);
        let size = bytes.len();
        let url = self.endpoint.url(UPLOAD_BYTES_PATH);

        let request = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(bytes);
        let response = self.send(url, request).await?;

        obs::emit_model_uploaded(UPLOAD_BYTES_PATH, &digest, size, response.status().as_u16());
        Ok(response)
    }

    /// POST the archive at `path` as multipart field `file` to `/uploadMarFile`.
    pub async fn upload_model_file(&self, path: &Path) -> Result<ScoreResponse> {
        let artifact = ModelArtifact::from_path(path);
        let bytes = artifact.load().await?;
        self.upload_file_part(artifact.file_name(), bytes).await
    }

    /// Upload by file for path-backed artifacts, by bytes otherwise.
    pub async fn upload_model(&self, artifact: &ModelArtifact) -> Result<ScoreResponse> {
        match artifact {
            ModelArtifact::Path(path) => self.upload_model_file(path).await,
            ModelArtifact::Bytes(bytes) => self.upload_model_bytes(bytes.clone()).await,
        }
    }

    async fn upload_file_part(&self, file_name: String, bytes: Vec<u8>) -> Result<ScoreResponse> {
        let digest = artifact_digest(&bytes);
        let size = bytes.len();
        let url = self.endpoint.url(UPLOAD_FILE_PATH);

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(OCTET_STREAM)
            .map_err(|e| HarnessError::Config(format!("invalid multipart mime type: {}", e)))?;
        let request = self
            .http
            .post(&url)
            .multipart(Form::new().part(UPLOAD_FILE_FIELD, part));
        let response = self.send(url, request).await?;

        obs::emit_model_uploaded(UPLOAD_FILE_PATH, &digest, size, response.status().as_u16());
        Ok(response)
    }

    /// POST `{"records": rows}` to `/v2/score` and hand back the reply as-is.
    pub async fn score(&self, rows: &[ScoreRecord]) -> Result<ScoreResponse> {
        let url = self.endpoint.url(SCORE_PATH);
        let body = serde_json::to_vec(&records_envelope(rows))?;
        let start = Instant::now();

        let request = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .header(ACCEPT, SCORE_ACCEPT)
            .body(body);
        let response = self.send(url, request).await?;

        obs::emit_score_sent(
            rows.len(),
            response.status().as_u16(),
            start.elapsed().as_millis() as u64,
        );
        Ok(response)
    }

    async fn send(&self, url: String, request: RequestBuilder) -> Result<ScoreResponse> {
        let response = match request.send().await {
            Ok(r) => r,
            Err(source) => return Err(HarnessError::Transport { url, source }),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(source) => return Err(HarnessError::Transport { url, source }),
        };

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "response received");
        Ok(ScoreResponse::new(status, content_type, body))
    }
}

/// Client flavour that treats non-success statuses as errors.
#[derive(Debug, Clone, Copy)]
pub struct TypedScoringClient<'a> {
    client: &'a ScoringClient,
}

impl<'a> TypedScoringClient<'a> {
    /// Upload an artifact, failing on a non-success status.
    pub async fn upload_model(&self, artifact: &ModelArtifact) -> Result<()> {
        let response = self.client.upload_model(artifact).await?;
        ensure_success(&response)
    }

    /// Score rows and parse the returned envelope.
    pub async fn score(&self, rows: &[ScoreRecord]) -> Result<Vec<ScoredRow>> {
        self.client.score(rows).await?.scored_rows()
    }

    /// Score a single row on its own and return its label.
    pub async fn score_label(&self, record: &ScoreRecord) -> Result<Label> {
        let rows = self.score(std::slice::from_ref(record)).await?;
        rows.into_iter()
            .next()
            .map(|row| row.score)
            .ok_or_else(|| HarnessError::MalformedResponse("empty data array".to_string()))
    }
}

fn ensure_success(response: &ScoreResponse) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(HarnessError::Protocol {
            status: response.status().as_u16(),
            body: response.text().into_owned(),
        })
    }
}
