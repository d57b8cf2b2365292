//! In-process fake scoring server for integration tests.
//!
//! Speaks the same protocol as the real server. A "model archive" here is a
//! JSON document: 1-D k-means centroids plus the label each centroid reports.
//! Scoring picks the nearest centroid to the record's `data` field.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use scoring_harness::ServerEndpoint;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeModel {
    pub centroids: Vec<f64>,
    pub labels: Vec<i64>,
    /// Zero-based score request that answers with label 99 instead.
    #[serde(default)]
    pub glitch_on_request: Option<usize>,
}

impl FakeModel {
    pub fn new(centroids: &[f64], labels: &[i64]) -> Self {
        Self {
            centroids: centroids.to_vec(),
            labels: labels.to_vec(),
            glitch_on_request: None,
        }
    }

    pub fn glitching_on(mut self, request: usize) -> Self {
        self.glitch_on_request = Some(request);
        self
    }

    pub fn to_archive(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    fn predict(&self, x: f64) -> i64 {
        let nearest = self
            .centroids
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (x - **a).abs().total_cmp(&(x - **b).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.labels[nearest]
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub model: Option<FakeModel>,
    pub uploaded_file_names: Vec<String>,
    pub score_requests: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: FakeModel) -> Self {
        let server = Self::new();
        server.state.lock().unwrap().model = Some(model);
        server
    }

    pub fn score_requests(&self) -> usize {
        self.state.lock().unwrap().score_requests
    }

    pub fn uploaded_file_names(&self) -> Vec<String> {
        self.state.lock().unwrap().uploaded_file_names.clone()
    }

    /// Serve on an ephemeral localhost port.
    pub async fn spawn(self) -> (ServerEndpoint, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let app = Router::new()
            .route("/uploadMarBytes", post(upload_bytes))
            .route("/uploadMarFile", post(upload_file))
            .route("/v2/score", post(score))
            .with_state(self);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (ServerEndpoint::new("127.0.0.1", port), handle)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

async fn upload_bytes(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if header_str(&headers, header::CONTENT_TYPE) != "application/octet-stream" {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE;
    }
    match serde_json::from_slice::<FakeModel>(&body) {
        Ok(model) => {
            server.state.lock().unwrap().model = Some(model);
            StatusCode::OK
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

async fn upload_file(State(server): State<FakeServer>, mut multipart: Multipart) -> StatusCode {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let Ok(data) = field.bytes().await else {
            return StatusCode::BAD_REQUEST;
        };
        let Ok(model) = serde_json::from_slice::<FakeModel>(&data) else {
            return StatusCode::BAD_REQUEST;
        };
        let mut state = server.state.lock().unwrap();
        state.model = Some(model);
        state.uploaded_file_names.push(file_name);
        return StatusCode::OK;
    }
    StatusCode::BAD_REQUEST
}

async fn score(State(server): State<FakeServer>, headers: HeaderMap, body: Bytes) -> Response {
    let accept = header_str(&headers, header::ACCEPT);
    if header_str(&headers, header::CONTENT_TYPE) != "application/json"
        || !accept.contains("application/json")
        || !accept.contains("text/plain")
    {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    let mut state = server.state.lock().unwrap();
    let request_index = state.score_requests;
    state.score_requests += 1;

    let Some(model) = state.model.clone() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "no model loaded").into_response();
    };

    let Ok(envelope) = serde_json::from_slice::<Value>(&body) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "malformed JSON").into_response();
    };
    let Some(records) = envelope.get("records").and_then(Value::as_array) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "missing records").into_response();
    };

    let mut data = Vec::with_capacity(records.len());
    for record in records {
        let Some(x) = record.get("data").and_then(Value::as_f64) else {
            return (StatusCode::INTERNAL_SERVER_ERROR, "invalid row data").into_response();
        };
        let label = if model.glitch_on_request == Some(request_index) {
            99
        } else {
            model.predict(x)
        };
        let mut row: Map<String, Value> = record.as_object().cloned().unwrap_or_default();
        row.insert("score".to_string(), json!(label));
        data.push(Value::Object(row));
    }

    Json(json!({ "data": data })).into_response()
}
