//! Cluster-label equivalence checking.
//!
//! Clustering assigns arbitrary ids to groups, so a reference result and a
//! server may call the same group `0` and `2`. The checker only requires the
//! relation reference label → observed label to be a function: every row
//! with a given reference label must score the same observed label.
//!
//! ```text
//! reference: 0 1 2 1 2 0 2 0 1
//! observed:  2 0 1 0 1 2 1 2 0   ok   (0→2, 1→0, 2→1)
//! observed:  2 0 1 0 1 2 1 3 0   fail at row 7 (0 was 2, now 3)
//! ```
//!
//! [`MatchMode::Bijective`] additionally rejects two reference groups
//! collapsing into one observed label; [`MatchMode::Exact`] requires the
//! labels to match verbatim.

use crate::client::ScoringClient;
use crate::error::{EquivalenceViolation, HarnessError, Result};
use crate::obs;
use crate::records::{Label, ScoreRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// How strictly observed labels must correspond to reference labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Same reference label ⇒ same observed label.
    #[default]
    Equivalent,
    /// `Equivalent`, and distinct reference labels ⇒ distinct observed labels.
    Bijective,
    /// Observed label equals reference label.
    Exact,
}

/// Reference → observed label mapping, built one row at a time.
#[derive(Debug, Clone, Default)]
pub struct LabelEquivalenceMap {
    mode: MatchMode,
    forward: BTreeMap<Label, Label>,
    reverse: BTreeMap<Label, Label>,
    rows: usize,
}

impl LabelEquivalenceMap {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Record one row's pair of labels.
    ///
    /// The first sighting of a reference label fixes its mapping; later
    /// sightings must agree with it.
    pub fn observe(
        &mut self,
        reference: Label,
        observed: Label,
    ) -> std::result::Result<(), EquivalenceViolation> {
        let row = self.rows;
        self.rows += 1;

        if self.mode == MatchMode::Exact && reference != observed {
            return Err(EquivalenceViolation::Mismatch {
                row,
                reference,
                actual: observed,
            });
        }

        if let Some(expected) = self.forward.get(&reference) {
            if *expected != observed {
                return Err(EquivalenceViolation::Split {
                    row,
                    reference,
                    expected: expected.clone(),
                    actual: observed,
                });
            }
            return Ok(());
        }

        if self.mode == MatchMode::Bijective {
            if let Some(previous) = self.reverse.get(&observed) {
                return Err(EquivalenceViolation::Merged {
                    row,
                    observed,
                    previous: previous.clone(),
                    reference,
                });
            }
        }

        self.reverse
            .entry(observed.clone())
            .or_insert_with(|| reference.clone());
        self.forward.insert(reference, observed);
        Ok(())
    }

    pub fn get(&self, reference: &Label) -> Option<&Label> {
        self.forward.get(reference)
    }

    pub fn rows_observed(&self) -> usize {
        self.rows
    }

    pub fn distinct_observed(&self) -> usize {
        self.forward.values().collect::<BTreeSet<_>>().len()
    }

    pub fn pairs(&self) -> Vec<LabelPair> {
        self.forward
            .iter()
            .map(|(reference, observed)| LabelPair {
                reference: reference.clone(),
                observed: observed.clone(),
            })
            .collect()
    }
}

/// One reference row: the features to score and the label it should group with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRow {
    pub record: ScoreRecord,
    pub label: Label,
}

impl ReferenceRow {
    pub fn new(record: ScoreRecord, label: impl Into<Label>) -> Self {
        Self {
            record,
            label: label.into(),
        }
    }
}

/// Read reference rows from JSON lines (`{"record": {...}, "label": 0}`).
///
/// Blank lines are skipped.
pub fn read_reference_jsonl(path: &Path) -> Result<Vec<ReferenceRow>> {
    let content = std::fs::read_to_string(path)?;
    parse_reference_jsonl(&content)
        .map_err(|e| HarnessError::Config(format!("{}: {}", path.display(), e)))
}

pub fn parse_reference_jsonl(content: &str) -> Result<Vec<ReferenceRow>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| HarnessError::Config(format!("line {}: {}", i + 1, e)))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPair {
    pub reference: Label,
    pub observed: Label,
}

/// Outcome of a passing equivalence check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceReport {
    pub mode: MatchMode,
    pub rows_checked: usize,
    pub distinct_observed: usize,
    pub mapping: Vec<LabelPair>,
}

/// Source of observed labels for single rows.
#[async_trait]
pub trait LabelScorer: Send + Sync {
    /// Score `record` on its own and return the assigned label.
    async fn score_label(&self, record: &ScoreRecord) -> Result<Label>;
}

#[async_trait]
impl LabelScorer for ScoringClient {
    async fn score_label(&self, record: &ScoreRecord) -> Result<Label> {
        self.typed().score_label(record).await
    }
}

/// Streams reference rows through a scorer and checks label equivalence.
#[derive(Debug, Clone, Copy, Default)]
pub struct EquivalenceChecker {
    mode: MatchMode,
}

impl EquivalenceChecker {
    pub fn new(mode: MatchMode) -> Self {
        Self { mode }
    }

    /// Score every row in order and fail on the first inconsistent label.
    ///
    /// Scorer errors (transport, protocol) abort the check unchanged.
    pub async fn check<S>(&self, scorer: &S, rows: &[ReferenceRow]) -> Result<EquivalenceReport>
    where
        S: LabelScorer + ?Sized,
    {
        let mut map = LabelEquivalenceMap::new(self.mode);

        for row in rows {
            let observed = scorer.score_label(&row.record).await?;
            if let Err(violation) = map.observe(row.label.clone(), observed) {
                obs::emit_equivalence_checked(map.rows_observed(), map.distinct_observed(), false);
                return Err(violation.into());
            }
        }

        obs::emit_equivalence_checked(map.rows_observed(), map.distinct_observed(), true);
        Ok(EquivalenceReport {
            mode: self.mode,
            rows_checked: map.rows_observed(),
            distinct_observed: map.distinct_observed(),
            mapping: map.pairs(),
        })
    }
}
