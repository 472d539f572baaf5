//! Run orchestration: parser → attribution → aggregator.
//!
//! A [`RollupRun`] is the run-scoped context. It borrows the configuration and
//! the resolver, owns its aggregator, and produces one report. Several runs
//! can share a resolver across threads; their reports are combined with
//! [`RollupReport::merge`].

use std::fs::File;
use std::io::Read;
use std::path::Path;

use rayon::prelude::*;

use crate::aggregate::Aggregator;
use crate::attribution::{AttributionEngine, ColumnIndex, Ingested};
use crate::config::{DiagnosticsConfig, RollupConfig};
use crate::error::RollupError;
use crate::model::ResultRow;
use crate::parser::RecordReader;
use crate::report::RollupReport;
use crate::resolver::Resolver;

/// Per-export tallies, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub rows: u64,
    pub row_errors: u64,
    pub filtered: u64,
}

pub struct RollupRun<'a> {
    config: &'a RollupConfig,
    engine: AttributionEngine<'a>,
    aggregator: Aggregator,
}

impl<'a> RollupRun<'a> {
    pub fn new(config: &'a RollupConfig, resolver: &'a Resolver) -> Self {
        Self {
            config,
            engine: AttributionEngine::new(resolver),
            aggregator: Aggregator::new(resolver, &config.diagnostics),
        }
    }

    /// Stream one export into the run. Only header-level problems fail;
    /// malformed records are counted and skipped.
    pub fn ingest<R: Read>(&mut self, input: &str, source: R) -> Result<IngestSummary, RollupError> {
        let reader = RecordReader::new(input, source, &self.config.input)?;
        self.aggregator.record_input()?;
        let mut summary = IngestSummary::default();
        if reader.headers().is_empty() {
            log::debug!("{input}: empty export");
            return Ok(summary);
        }
        let columns = ColumnIndex::resolve(reader.headers(), &self.config.input, input)?;

        for record in reader {
            let ingested = record.and_then(|record| self.engine.ingest(&columns, &record, input));
            match ingested {
                Ok(Ingested::Attributed {
                    attribution,
                    outcome_normalized,
                }) => {
                    if outcome_normalized {
                        self.aggregator.record_normalized_outcome()?;
                    }
                    self.aggregator.fold(&attribution)?;
                    summary.rows += 1;
                }
                Ok(Ingested::Filtered) => {
                    self.aggregator.record_filtered()?;
                    summary.filtered += 1;
                }
                Err(row_error) => {
                    self.aggregator.record_row_error(row_error)?;
                    summary.row_errors += 1;
                }
            }
        }

        log::debug!(
            "{input}: {} rows, {} row errors, {} filtered",
            summary.rows,
            summary.row_errors,
            summary.filtered
        );
        Ok(summary)
    }

    pub fn ingest_path(&mut self, path: &Path) -> Result<IngestSummary, RollupError> {
        let input = path.display().to_string();
        let file = File::open(path).map_err(|e| RollupError::io(input.clone(), e))?;
        self.ingest(&input, file)
    }

    /// Fold a row that did not come from an export (e.g. an [`crate::Analyzer`]).
    pub fn fold_row(&mut self, row: ResultRow) -> Result<(), RollupError> {
        let attribution = self.engine.attribute(row);
        self.aggregator.fold(&attribution)
    }

    pub fn finish(mut self) -> RollupReport {
        self.aggregator.finalize()
    }
}

/// Roll up a single export.
pub fn rollup_reader<R: Read>(
    input: &str,
    source: R,
    config: &RollupConfig,
    resolver: &Resolver,
) -> Result<RollupReport, RollupError> {
    let mut run = RollupRun::new(config, resolver);
    run.ingest(input, source)?;
    let report = run.finish();
    log_run(&report, &config.diagnostics);
    Ok(report)
}

/// Roll up several exports in parallel, one partial report per file.
pub fn rollup_files<P>(paths: &[P], config: &RollupConfig, resolver: &Resolver) -> Result<RollupReport, RollupError>
where
    P: AsRef<Path> + Sync,
{
    let report = paths
        .par_iter()
        .map(|path| -> Result<RollupReport, RollupError> {
            let mut run = RollupRun::new(config, resolver);
            run.ingest_path(path.as_ref())?;
            Ok(run.finish())
        })
        .try_reduce(
            || RollupReport::empty(resolver.paths(), config.diagnostics.error_sample_limit),
            |a, b| Ok(a.merged(&b)),
        )?;
    log_run(&report, &config.diagnostics);
    Ok(report)
}

/// Roll up rows produced in-process.
pub fn rollup_rows<I>(rows: I, config: &RollupConfig, resolver: &Resolver) -> Result<RollupReport, RollupError>
where
    I: IntoIterator<Item = ResultRow>,
{
    let mut run = RollupRun::new(config, resolver);
    for row in rows {
        run.fold_row(row)?;
    }
    let report = run.finish();
    log_run(&report, &config.diagnostics);
    Ok(report)
}

/// Log run totals, and warn when the unattributed share is over the threshold.
///
/// Call once on the final report; partial reports of a parallel run are not checked.
pub fn log_run(report: &RollupReport, config: &DiagnosticsConfig) {
    let d = &report.diagnostics;
    log::info!(
        "rollup complete: {} inputs, {} rows folded ({} unattributed), {} parse errors",
        d.inputs,
        d.rows_folded(),
        d.unattributed_rows,
        d.parse_errors
    );
    if report.exceeds_unattributed_ratio(config.unattributed_warn_ratio) {
        log::warn!(
            "{} of {} rows ({:.1}%) matched no organization unit (threshold {:.1}%)",
            d.unattributed_rows,
            d.rows_folded(),
            d.unattributed_ratio() * 100.0,
            config.unattributed_warn_ratio * 100.0
        );
    }
}
