//! Wire types for the scoring protocol.
//!
//! - [`ScoreRecord`]: one named-field row sent for scoring
//! - [`ScoreResponse`]: the raw HTTP reply, handed back unmodified
//! - [`ScoredRow`] / [`Label`]: the parsed `{"data": [...]}` envelope

use crate::error::{HarnessError, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Top-level key of the scoring request envelope.
pub const RECORDS_KEY: &str = "records";

/// Top-level key of the scoring response envelope.
pub const DATA_KEY: &str = "data";

/// Per-row key carrying the assigned label.
pub const SCORE_KEY: &str = "score";

// ---------------------------------------------------------------------------
// ScoreRecord
// ---------------------------------------------------------------------------

/// One row to be scored: named numeric/string fields in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreRecord(Map<String, Value>);

impl ScoreRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, replacing any earlier value under the same name.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Build a record by zipping column names with values.
    pub fn from_columns<N, V>(names: &[N], values: impl IntoIterator<Item = V>) -> Self
    where
        N: AsRef<str>,
        V: Into<Value>,
    {
        let fields = names
            .iter()
            .zip(values)
            .map(|(name, value)| (name.as_ref().to_string(), value.into()))
            .collect();
        Self(fields)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field names in wire order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl From<Map<String, Value>> for ScoreRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for ScoreRecord {
    type Error = HarnessError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(HarnessError::Config(format!(
                "score record must be a JSON object, got {}",
                other
            ))),
        }
    }
}

/// Build the `{"records": [...]}` request body.
pub fn records_envelope(rows: &[ScoreRecord]) -> Value {
    let mut envelope = Map::new();
    envelope.insert(
        RECORDS_KEY.to_string(),
        Value::Array(rows.iter().map(|r| Value::Object(r.0.clone())).collect()),
    );
    Value::Object(envelope)
}

// ---------------------------------------------------------------------------
// Label
// ---------------------------------------------------------------------------

/// A cluster or prediction label.
///
/// Integral numbers collapse to [`Label::Int`] whatever their JSON spelling, so
/// `1` and `1.0` compare equal. Other scalars are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Label {
    Int(i64),
    Text(String),
}

impl Label {
    /// Normalize a JSON scalar into a label.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Label::Int(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                        Ok(Label::Int(f as i64))
                    }
                    _ => Ok(Label::Text(n.to_string())),
                }
            }
            Value::String(s) => Ok(Label::Text(s.clone())),
            Value::Bool(b) => Ok(Label::Text(b.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => Err(
                HarnessError::MalformedResponse(format!("unsupported label value: {}", value)),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Label::from_json(&value).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Int(i) => write!(f, "{}", i),
            Label::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Label {
    fn from(value: i64) -> Self {
        Label::Int(value)
    }
}

impl From<i32> for Label {
    fn from(value: i32) -> Self {
        Label::Int(value.into())
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Label::Text(value.to_string())
    }
}

impl From<String> for Label {
    fn from(value: String) -> Self {
        Label::Text(value)
    }
}

// ---------------------------------------------------------------------------
// Scored rows
// ---------------------------------------------------------------------------

/// One entry of the response `data` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    /// Label assigned by the server.
    pub score: Label,
    /// Every other field the server echoed back.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct ScoreEnvelope {
    data: Vec<ScoredRow>,
}

// ---------------------------------------------------------------------------
// ScoreResponse
// ---------------------------------------------------------------------------

/// Raw HTTP reply from the server-under-test.
///
/// Non-success statuses are data here, not errors: callers assert on
/// [`ScoreResponse::status`] and [`ScoreResponse::text`] directly.
#[derive(Debug, Clone)]
pub struct ScoreResponse {
    status: StatusCode,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl ScoreResponse {
    pub fn new(status: StatusCode, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserialize the body as JSON, regardless of status.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parse the `{"data": [...]}` envelope.
    ///
    /// Fails with [`HarnessError::Protocol`] on a non-success status and with
    /// [`HarnessError::MalformedResponse`] when the body is not an envelope.
    pub fn scored_rows(&self) -> Result<Vec<ScoredRow>> {
        if !self.is_success() {
            return Err(HarnessError::Protocol {
                status: self.status.as_u16(),
                body: self.text().into_owned(),
            });
        }
        let envelope: ScoreEnvelope = serde_json::from_slice(&self.body).map_err(|e| {
            HarnessError::MalformedResponse(format!(
                "expected {{\"{}\": [{{\"{}\": ...}}]}}: {}",
                DATA_KEY, SCORE_KEY, e
            ))
        })?;
        Ok(envelope.data)
    }

    /// Labels of every scored row, in response order.
    pub fn labels(&self) -> Result<Vec<Label>> {
        Ok(self.scored_rows()?.into_iter().map(|row| row.score).collect())
    }
}
