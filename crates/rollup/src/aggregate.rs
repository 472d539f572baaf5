//! Folding attributions into per-organization, per-recipe counts.

use std::collections::BTreeSet;

use crate::config::DiagnosticsConfig;
use crate::error::{RollupError, RowError};
use crate::model::{Attribution, OrgPath};
use crate::report::RollupReport;
use crate::resolver::Resolver;

/// Owns the in-progress report for one run.
///
/// Every matched path and all of its ancestors are incremented once per row,
/// so a unit's counts always equal the sum over its subtree, and a row that
/// reaches one ancestor through two matched paths is still counted once there.
#[derive(Debug)]
pub struct Aggregator {
    report: RollupReport,
    finalized: bool,
}

impl Aggregator {
    /// Seeds the report with every path the resolver knows about.
    pub fn new(resolver: &Resolver, config: &DiagnosticsConfig) -> Self {
        Self {
            report: RollupReport::empty(resolver.paths(), config.error_sample_limit),
            finalized: false,
        }
    }

    pub fn fold(&mut self, attribution: &Attribution) -> Result<(), RollupError> {
        self.ensure_open()?;
        self.report.diagnostics.rows += 1;
        let row = &attribution.row;
        if let Some(ts) = row.timestamp {
            self.report.diagnostics.record_timestamp(ts);
        }

        let targets: BTreeSet<OrgPath> = attribution.paths.iter().flat_map(|p| p.lineage()).collect();
        if targets.is_empty() {
            self.report
                .unattributed
                .entry(row.recipe.clone())
                .or_default()
                .record(row.outcome);
            self.report.diagnostics.unattributed_rows += 1;
            return Ok(());
        }

        for path in targets {
            self.report
                .organizations
                .entry(path)
                .or_default()
                .entry(row.recipe.clone())
                .or_default()
                .record(row.outcome);
        }
        self.report.diagnostics.attributed_rows += 1;
        Ok(())
    }

    pub fn record_row_error(&mut self, error: RowError) -> Result<(), RollupError> {
        self.ensure_open()?;
        log::warn!("skipping malformed row at {}:{}: {}", error.input, error.line, error.kind);
        self.report.diagnostics.rows += 1;
        self.report.diagnostics.record_error(error);
        Ok(())
    }

    pub fn record_normalized_outcome(&mut self) -> Result<(), RollupError> {
        self.ensure_open()?;
        self.report.diagnostics.normalized_outcomes += 1;
        Ok(())
    }

    pub fn record_filtered(&mut self) -> Result<(), RollupError> {
        self.ensure_open()?;
        self.report.diagnostics.rows += 1;
        self.report.diagnostics.filtered_rows += 1;
        Ok(())
    }

    pub fn record_input(&mut self) -> Result<(), RollupError> {
        self.ensure_open()?;
        self.report.diagnostics.inputs += 1;
        Ok(())
    }

    /// Freeze the report. Later calls return an equal report; later folds fail.
    pub fn finalize(&mut self) -> RollupReport {
        self.finalized = true;
        self.report.clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_open(&self) -> Result<(), RollupError> {
        if self.finalized {
            Err(RollupError::Finalized)
        } else {
            Ok(())
        }
    }
}
