use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
    Skipped,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [Outcome::Pass, Outcome::Fail, Outcome::Error, Outcome::Skipped];

    /// Case-insensitive match against the known outcome vocabulary.
    pub fn parse(value: &str) -> Option<Outcome> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pass" | "passed" | "success" | "succeeded" | "ok" => Some(Outcome::Pass),
            "fail" | "failed" | "failure" => Some(Outcome::Fail),
            "error" | "errored" => Some(Outcome::Error),
            "skip" | "skipped" | "n/a" | "na" | "not_applicable" => Some(Outcome::Skipped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One recipe result for one repository, after column mapping and outcome normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub repository: String,
    pub recipe: String,
    pub outcome: Outcome,
    pub detail: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Columns not consumed by the mapping, keyed by header name.
    pub extra: BTreeMap<String, String>,
}

impl ResultRow {
    pub fn new(repository: impl Into<String>, recipe: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            repository: repository.into(),
            recipe: recipe.into(),
            outcome,
            detail: None,
            timestamp: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Organization paths
// ---------------------------------------------------------------------------

/// Path of an organization unit from its root, e.g. `acme/platform/build`.
///
/// Ordering is segment-wise, so sorting paths yields a depth-first preorder
/// (a parent always sorts immediately before its own subtree).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrgPath(Vec<String>);

impl OrgPath {
    pub const SEPARATOR: char = '/';

    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn from_segments(segments: Vec<String>) -> Option<Self> {
        if segments.is_empty() || segments.iter().any(|s| !is_valid_segment(s)) {
            return None;
        }
        Some(Self(segments))
    }

    /// Parse `a/b/c`. Leading and trailing separators are ignored; empty segments are not.
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim().trim_matches(Self::SEPARATOR);
        if trimmed.is_empty() {
            return None;
        }
        Self::from_segments(
            trimmed
                .split(Self::SEPARATOR)
                .map(|seg| seg.trim().to_string())
                .collect(),
        )
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn parent(&self) -> Option<OrgPath> {
        if self.0.len() > 1 {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    /// This path followed by every strict ancestor, deepest first.
    pub fn lineage(&self) -> impl Iterator<Item = OrgPath> + '_ {
        (1..=self.0.len()).rev().map(move |n| Self(self.0[..n].to_vec()))
    }

    pub fn is_ancestor_of(&self, other: &OrgPath) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }
}

pub(crate) fn is_valid_segment(segment: &str) -> bool {
    !segment.trim().is_empty() && !segment.contains(OrgPath::SEPARATOR)
}

impl fmt::Display for OrgPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", Self::SEPARATOR)?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl Serialize for OrgPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrgPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OrgPath::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid organization path '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Attribution
// ---------------------------------------------------------------------------

/// A row joined to the organization paths owning its repository.
/// Empty `paths` means unattributed.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub row: ResultRow,
    pub paths: Vec<OrgPath>,
}

impl Attribution {
    pub fn is_unattributed(&self) -> bool {
        self.paths.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub pass: u64,
    pub fail: u64,
    pub error: u64,
    pub skipped: u64,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: Outcome) {
        *self.slot(outcome) += 1;
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Pass => self.pass,
            Outcome::Fail => self.fail,
            Outcome::Error => self.error,
            Outcome::Skipped => self.skipped,
        }
    }

    pub fn total(&self) -> u64 {
        self.pass + self.fail + self.error + self.skipped
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.pass += other.pass;
        self.fail += other.fail;
        self.error += other.error;
        self.skipped += other.skipped;
    }

    /// Pass share among rows that produced a verdict (skipped rows excluded).
    pub fn pass_rate(&self) -> Option<f64> {
        let decided = self.pass + self.fail + self.error;
        if decided == 0 {
            None
        } else {
            Some(self.pass as f64 / decided as f64)
        }
    }

    fn slot(&mut self, outcome: Outcome) -> &mut u64 {
        match outcome {
            Outcome::Pass => &mut self.pass,
            Outcome::Fail => &mut self.fail,
            Outcome::Error => &mut self.error,
            Outcome::Skipped => &mut self.skipped,
        }
    }
}

/// Flattened view of one (organization, recipe) cell. `organization` is
/// `None` for the unattributed bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupCell {
    pub organization: Option<OrgPath>,
    pub recipe: String,
    pub counts: OutcomeCounts,
}
