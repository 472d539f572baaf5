//! Finalized rollup results.
//!
//! Everything in a [`RollupReport`] is kept in ordered maps, so traversal is
//! depth-first by organization path and then by recipe id, and serialization
//! is byte-for-byte reproducible for identical inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RollupError, RowError};
use crate::model::{OrgPath, Outcome, OutcomeCounts, RollupCell};

/// Organization column value for the unattributed bucket in tabular output.
pub const UNATTRIBUTED_LABEL: &str = "(unattributed)";

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Earliest and latest row timestamp seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl TimeWindow {
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self {
            earliest: ts,
            latest: ts,
        }
    }

    pub fn include(&mut self, ts: DateTime<Utc>) {
        self.earliest = self.earliest.min(ts);
        self.latest = self.latest.max(ts);
    }

    pub fn merge(&mut self, other: &TimeWindow) {
        self.include(other.earliest);
        self.include(other.latest);
    }
}

/// Ingestion summary carried alongside the counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Exports that contributed to this report.
    pub inputs: u64,
    /// Every data row read: attributed, unattributed, filtered, or rejected.
    #[serde(default)]
    pub rows: u64,
    pub attributed_rows: u64,
    pub unattributed_rows: u64,
    pub parse_errors: u64,
    /// Rows whose outcome was not in the known vocabulary and was counted as `error`.
    pub normalized_outcomes: u64,
    /// Rows skipped by the configured row filter.
    pub filtered_rows: u64,
    /// The `sample_limit` smallest row errors by (input, line).
    pub error_samples: Vec<RowError>,
    pub sample_limit: usize,
    pub time_window: Option<TimeWindow>,
}

impl Diagnostics {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            inputs: 0,
            rows: 0,
            attributed_rows: 0,
            unattributed_rows: 0,
            parse_errors: 0,
            normalized_outcomes: 0,
            filtered_rows: 0,
            error_samples: Vec::new(),
            sample_limit,
            time_window: None,
        }
    }

    /// Rows that reached the aggregator, attributed or not.
    pub fn rows_folded(&self) -> u64 {
        self.attributed_rows + self.unattributed_rows
    }

    /// Share of folded rows that no organization owns. Zero when nothing was folded.
    pub fn unattributed_ratio(&self) -> f64 {
        let folded = self.rows_folded();
        if folded == 0 {
            0.0
        } else {
            self.unattributed_rows as f64 / folded as f64
        }
    }

    pub(crate) fn record_error(&mut self, error: RowError) {
        self.parse_errors += 1;
        self.error_samples.push(error);
        self.trim_samples();
    }

    pub(crate) fn record_timestamp(&mut self, ts: DateTime<Utc>) {
        match self.time_window {
            Some(ref mut w) => w.include(ts),
            None => self.time_window = Some(TimeWindow::at(ts)),
        }
    }

    pub fn merge(&mut self, other: &Diagnostics) {
        self.inputs += other.inputs;
        self.rows += other.rows;
        self.attributed_rows += other.attributed_rows;
        self.unattributed_rows += other.unattributed_rows;
        self.parse_errors += other.parse_errors;
        self.normalized_outcomes += other.normalized_outcomes;
        self.filtered_rows += other.filtered_rows;
        self.sample_limit = self.sample_limit.min(other.sample_limit);
        self.error_samples.extend(other.error_samples.iter().cloned());
        self.trim_samples();
        self.time_window = match (self.time_window, other.time_window) {
            (Some(mut a), Some(b)) => {
                a.merge(&b);
                Some(a)
            }
            (a, b) => a.or(b),
        };
    }

    // Keeping the N smallest makes the sample independent of fold and merge order.
    fn trim_samples(&mut self) {
        self.error_samples.sort_by(|a, b| a.sample_key().cmp(&b.sample_key()));
        self.error_samples.truncate(self.sample_limit);
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Organization path → recipe id → counts, plus the unattributed bucket.
///
/// Every count under an organization includes the counts of all its
/// descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupReport {
    pub organizations: BTreeMap<OrgPath, BTreeMap<String, OutcomeCounts>>,
    pub unattributed: BTreeMap<String, OutcomeCounts>,
    pub diagnostics: Diagnostics,
}

impl RollupReport {
    /// A report with no rows. Every path in `paths` is present with no recipes.
    pub fn empty(paths: &[OrgPath], sample_limit: usize) -> Self {
        Self {
            organizations: paths.iter().map(|p| (p.clone(), BTreeMap::new())).collect(),
            unattributed: BTreeMap::new(),
            diagnostics: Diagnostics::new(sample_limit),
        }
    }

    /// Counts for one cell; zero when the cell was never touched.
    pub fn counts(&self, path: &OrgPath, recipe: &str) -> OutcomeCounts {
        self.organizations
            .get(path)
            .and_then(|recipes| recipes.get(recipe))
            .copied()
            .unwrap_or_default()
    }

    pub fn unattributed_counts(&self, recipe: &str) -> OutcomeCounts {
        self.unattributed.get(recipe).copied().unwrap_or_default()
    }

    /// All recipes of one organization summed together.
    pub fn organization_total(&self, path: &OrgPath) -> OutcomeCounts {
        let mut total = OutcomeCounts::default();
        if let Some(recipes) = self.organizations.get(path) {
            for counts in recipes.values() {
                total.merge(counts);
            }
        }
        total
    }

    /// Every recipe id seen, attributed or not.
    pub fn recipes(&self) -> BTreeSet<&str> {
        self.organizations
            .values()
            .flat_map(|recipes| recipes.keys())
            .chain(self.unattributed.keys())
            .map(String::as_str)
            .collect()
    }

    /// Flattened cells: organizations depth-first, then the unattributed bucket.
    pub fn cells(&self) -> impl Iterator<Item = RollupCell> + '_ {
        let attributed = self.organizations.iter().flat_map(|(path, recipes)| {
            recipes.iter().map(move |(recipe, counts)| RollupCell {
                organization: Some(path.clone()),
                recipe: recipe.clone(),
                counts: *counts,
            })
        });
        let unattributed = self.unattributed.iter().map(|(recipe, counts)| RollupCell {
            organization: None,
            recipe: recipe.clone(),
            counts: *counts,
        });
        attributed.chain(unattributed)
    }

    /// Sum another partial report into this one. Commutative and associative.
    pub fn merge(&mut self, other: &RollupReport) {
        for (path, recipes) in &other.organizations {
            let target = self.organizations.entry(path.clone()).or_default();
            for (recipe, counts) in recipes {
                target.entry(recipe.clone()).or_default().merge(counts);
            }
        }
        for (recipe, counts) in &other.unattributed {
            self.unattributed.entry(recipe.clone()).or_default().merge(counts);
        }
        self.diagnostics.merge(&other.diagnostics);
    }

    pub fn merged(mut self, other: &RollupReport) -> Self {
        self.merge(other);
        self
    }

    /// True when unattributed rows exceed `threshold` as a share of folded rows.
    pub fn exceeds_unattributed_ratio(&self, threshold: f64) -> bool {
        self.diagnostics.unattributed_ratio() > threshold
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, RollupError> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(input: &str) -> Result<Self, RollupError> {
        Ok(serde_json::from_str(input)?)
    }

    /// `sha256:<hex>` over the JSON form. Equal reports have equal fingerprints.
    pub fn fingerprint(&self) -> Result<String, RollupError> {
        let json = self.to_json()?;
        let digest = Sha256::digest(json.as_bytes());
        Ok(format!("sha256:{digest:x}"))
    }

    /// One line per cell: `organization,recipe,pass,fail,error,skipped,total`.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), RollupError> {
        let mut writer = csv::Writer::from_writer(out);
        let csv_err = |e: csv::Error| RollupError::Serialize(e.to_string());

        writer
            .write_record(["organization", "recipe", "pass", "fail", "error", "skipped", "total"])
            .map_err(csv_err)?;
        for cell in self.cells() {
            let organization = match cell.organization {
                Some(ref path) => path.to_string(),
                None => UNATTRIBUTED_LABEL.to_string(),
            };
            let c = cell.counts;
            writer
                .write_record([
                    organization,
                    cell.recipe,
                    c.pass.to_string(),
                    c.fail.to_string(),
                    c.error.to_string(),
                    c.skipped.to_string(),
                    c.total().to_string(),
                ])
                .map_err(csv_err)?;
        }
        writer
            .flush()
            .map_err(|e| RollupError::Serialize(e.to_string()))
    }

    /// Indented per-organization summary for terminals.
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        for (path, recipes) in &self.organizations {
            let indent = "  ".repeat(path.depth().saturating_sub(1));
            let total = self.organization_total(path);
            let _ = writeln!(out, "{indent}{} {}", path.name(), format_counts(&total));
            for (recipe, counts) in recipes {
                let _ = writeln!(out, "{indent}    {recipe}: {}", format_counts(counts));
            }
        }
        if !self.unattributed.is_empty() {
            let _ = writeln!(out, "{UNATTRIBUTED_LABEL}");
            for (recipe, counts) in &self.unattributed {
                let _ = writeln!(out, "    {recipe}: {}", format_counts(counts));
            }
        }

        let d = &self.diagnostics;
        let _ = writeln!(
            out,
            "\nrows: {} read, {} attributed, {} unattributed ({:.1}%), {} parse errors, {} normalized outcomes, {} filtered",
            d.rows,
            d.attributed_rows,
            d.unattributed_rows,
            d.unattributed_ratio() * 100.0,
            d.parse_errors,
            d.normalized_outcomes,
            d.filtered_rows,
        );
        if let Some(window) = d.time_window {
            let _ = writeln!(
                out,
                "window: {} .. {}",
                window.earliest.to_rfc3339(),
                window.latest.to_rfc3339()
            );
        }
        for sample in &d.error_samples {
            let _ = writeln!(out, "  {sample}");
        }
        out
    }
}

fn format_counts(counts: &OutcomeCounts) -> String {
    let rate = match counts.pass_rate() {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "-".to_string(),
    };
    let mut parts = Vec::with_capacity(Outcome::ALL.len());
    for outcome in Outcome::ALL {
        parts.push(format!("{}={}", outcome, counts.get(outcome)));
    }
    format!("[{}] pass rate {rate}", parts.join(" "))
}
