//! `devcenter-rollup`: Recipe result ingestion and organizational rollup engine.
//!
//! Pure engine crate: receives export streams and a hierarchy definition,
//! returns deterministic per-organization, per-recipe outcome counts.
//! Logs through the `log` facade; installing a logger is the caller's job.

pub mod aggregate;
pub mod analyzer;
pub mod attribution;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod parser;
pub mod report;
pub mod resolver;

pub use aggregate::Aggregator;
pub use analyzer::{run_analyzers, Analyzer, Finding};
pub use attribution::AttributionEngine;
pub use config::RollupConfig;
pub use diff::{diff, ReportDiff};
pub use engine::{rollup_files, rollup_reader, rollup_rows, RollupRun};
pub use error::{RollupError, RowError, RowErrorKind};
pub use hierarchy::{HierarchyDef, UnitDef};
pub use model::{Attribution, OrgPath, Outcome, OutcomeCounts, ResultRow, RollupCell};
pub use parser::RecordReader;
pub use report::{Diagnostics, RollupReport};
pub use resolver::Resolver;
