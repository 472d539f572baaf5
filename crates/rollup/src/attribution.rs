//! Joining parsed records to organization paths.
//!
//! [`ColumnIndex`] binds the configured column names to positions in an
//! export's header row once per input. Each record is then turned into a
//! [`ResultRow`] (outcome normalized, timestamp parsed, unused columns kept as
//! extras) and [`AttributionEngine`] asks the resolver who owns it.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::config::InputConfig;
use crate::error::{RollupError, RowError, RowErrorKind};
use crate::model::{Attribution, Outcome, ResultRow};
use crate::parser::{Headers, RawRecord};
use crate::resolver::{normalize_repository, Resolver};

// ---------------------------------------------------------------------------
// Column binding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Identity {
    Repository(usize),
    OriginPath { origin: usize, path: usize },
}

#[derive(Debug, Clone)]
struct Filter {
    column: usize,
    values: Vec<String>,
}

/// Positions of the mapped columns in one export's header row.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    names: Vec<String>,
    identity: Identity,
    recipe: usize,
    outcome: usize,
    detail: Option<usize>,
    timestamp: Option<usize>,
    branch: Option<usize>,
    filter: Option<Filter>,
    consumed: Vec<bool>,
}

impl ColumnIndex {
    /// Bind `config.columns` against `headers`.
    ///
    /// Identifier, recipe, outcome and filter columns are required. Missing
    /// optional columns (detail, timestamp, branch) are ignored.
    pub fn resolve(headers: &Headers, config: &InputConfig, input: &str) -> Result<Self, RollupError> {
        let cols = &config.columns;
        let required = |name: &str| -> Result<usize, RollupError> {
            headers.position(name).ok_or_else(|| RollupError::MissingColumn {
                input: input.to_string(),
                column: name.to_string(),
            })
        };
        let optional = |name: Option<&String>, what: &str| -> Option<usize> {
            let name = name?;
            let idx = headers.position(name);
            if idx.is_none() {
                log::debug!("{input}: optional {what} column '{name}' not present");
            }
            idx
        };

        let identity = match (&cols.origin, &cols.path) {
            (Some(origin), Some(path)) => Identity::OriginPath {
                origin: required(origin)?,
                path: required(path)?,
            },
            _ => {
                let name = cols.repository.as_deref().unwrap_or("repository");
                Identity::Repository(required(name)?)
            }
        };
        let recipe = required(&cols.recipe)?;
        let outcome = required(&cols.outcome)?;
        let detail = optional(cols.detail.as_ref(), "detail");
        let timestamp = optional(cols.timestamp.as_ref(), "timestamp");
        let branch = optional(cols.branch.as_ref(), "branch");
        let filter = match config.filter {
            Some(ref f) => Some(Filter {
                column: required(&f.column)?,
                values: f.values.iter().map(|v| v.trim().to_string()).collect(),
            }),
            None => None,
        };

        let mut consumed = vec![false; headers.len()];
        let mut mark = |i: usize| {
            if let Some(slot) = consumed.get_mut(i) {
                *slot = true;
            }
        };
        match identity {
            Identity::Repository(i) => mark(i),
            Identity::OriginPath { origin, path } => {
                mark(origin);
                mark(path);
            }
        }
        for i in [Some(recipe), Some(outcome), detail, timestamp, branch].into_iter().flatten() {
            mark(i);
        }

        Ok(Self {
            names: headers.names().to_vec(),
            identity,
            recipe,
            outcome,
            detail,
            timestamp,
            branch,
            filter,
            consumed,
        })
    }

    fn name(&self, i: usize) -> &str {
        self.names.get(i).map(String::as_str).unwrap_or_default()
    }

    fn value<'a>(&self, record: &'a RawRecord, i: usize) -> &'a str {
        record.field(i).unwrap_or_default()
    }

    fn required_value<'a>(&self, record: &'a RawRecord, i: usize, input: &str) -> Result<&'a str, RowError> {
        let value = self.value(record, i).trim();
        if value.is_empty() {
            return Err(RowError::new(
                input,
                record.line,
                RowErrorKind::MissingValue {
                    column: self.name(i).to_string(),
                },
            ));
        }
        Ok(value)
    }

    /// Map a record to a row. `Ok(None)` means the row filter excluded it.
    pub fn to_row(&self, record: &RawRecord, input: &str) -> Result<Option<NormalizedRow>, RowError> {
        if let Some(ref filter) = self.filter {
            let value = self.value(record, filter.column).trim();
            if !filter.values.iter().any(|v| v == value) {
                return Ok(None);
            }
        }

        let repository = match self.identity {
            Identity::Repository(i) => normalize_repository(self.required_value(record, i, input)?).to_string(),
            Identity::OriginPath { origin, path } => {
                let origin = self.required_value(record, origin, input)?.trim_end_matches('/');
                let path = self.required_value(record, path, input)?.trim_matches('/');
                format!("{origin}/{path}")
            }
        };
        let recipe = self.required_value(record, self.recipe, input)?.to_string();
        let raw_outcome = self.required_value(record, self.outcome, input)?;

        let mut detail = self
            .detail
            .map(|i| self.value(record, i).trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let (outcome, outcome_normalized) = match Outcome::parse(raw_outcome) {
            Some(outcome) => (outcome, false),
            None => {
                let note = format!("unrecognized outcome '{raw_outcome}'");
                detail = Some(match detail {
                    Some(d) => format!("{note}; {d}"),
                    None => note,
                });
                (Outcome::Error, true)
            }
        };

        let timestamp = match self.timestamp.map(|i| self.value(record, i).trim()) {
            Some(v) if !v.is_empty() => Some(parse_timestamp(v).ok_or_else(|| {
                RowError::new(
                    input,
                    record.line,
                    RowErrorKind::InvalidTimestamp { value: v.to_string() },
                )
            })?),
            _ => None,
        };

        let mut extra = BTreeMap::new();
        if let Some(i) = self.branch {
            let branch = self.value(record, i).trim();
            if !branch.is_empty() {
                extra.insert("branch".to_string(), branch.to_string());
            }
        }
        for (i, (name, value)) in record.iter().enumerate() {
            if self.consumed.get(i).copied().unwrap_or(false) || name.is_empty() || value.is_empty() {
                continue;
            }
            extra.entry(name.to_string()).or_insert_with(|| value.to_string());
        }

        Ok(Some(NormalizedRow {
            row: ResultRow {
                repository,
                recipe,
                outcome,
                detail,
                timestamp,
                extra,
            },
            outcome_normalized,
        }))
    }
}

/// A mapped row plus whether its outcome was coerced to `Error`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub row: ResultRow,
    pub outcome_normalized: bool,
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// What happened to one record on its way to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Attributed {
        attribution: Attribution,
        outcome_normalized: bool,
    },
    Filtered,
}

/// Stateless join of rows against a shared, read-only resolver.
#[derive(Debug, Clone, Copy)]
pub struct AttributionEngine<'r> {
    resolver: &'r Resolver,
}

impl<'r> AttributionEngine<'r> {
    pub fn new(resolver: &'r Resolver) -> Self {
        Self { resolver }
    }

    /// One attribution per row, even when no unit owns the repository.
    pub fn attribute(&self, row: ResultRow) -> Attribution {
        let paths = self.resolver.resolve(&row.repository);
        Attribution { row, paths }
    }

    pub fn ingest(&self, columns: &ColumnIndex, record: &RawRecord, input: &str) -> Result<Ingested, RowError> {
        Ok(match columns.to_row(record, input)? {
            Some(NormalizedRow {
                row,
                outcome_normalized,
            }) => Ingested::Attributed {
                attribution: self.attribute(row),
                outcome_normalized,
            },
            None => Ingested::Filtered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RollupConfig, RowFilter};
    use crate::hierarchy::{HierarchyDef, UnitDef};
    use crate::model::OrgPath;
    use crate::parser::RecordReader;

    fn records(csv: &str, config: &InputConfig) -> (ColumnIndex, Vec<Result<RawRecord, RowError>>) {
        let reader = RecordReader::new("t.csv", csv.as_bytes(), config).unwrap();
        let columns = ColumnIndex::resolve(reader.headers(), config, "t.csv").unwrap();
        (columns, reader.collect())
    }

    fn resolver() -> Resolver {
        Resolver::load(&HierarchyDef {
            exclusive: true,
            units: vec![
                UnitDef::root("root"),
                UnitDef::child("teamA", "root").repository("repoA"),
            ],
        })
        .unwrap()
    }

    #[test]
    fn maps_row_and_keeps_extras() {
        let config = InputConfig::default();
        let (columns, rows) = records(
            "Repository,Recipe,Outcome,Detail,Owner\nrepoA/,X,PASSED,,alice\n",
            &config,
        );
        let record = rows[0].as_ref().unwrap();
        let row = columns.to_row(record, "t.csv").unwrap().unwrap();
        assert!(!row.outcome_normalized);
        assert_eq!(row.row.repository, "repoA");
        assert_eq!(row.row.outcome, Outcome::Pass);
        assert_eq!(row.row.detail, None);
        assert_eq!(row.row.extra.get("Owner").map(String::as_str), Some("alice"));
        assert_eq!(row.row.extra.len(), 1);
    }

    #[test]
    fn unrecognized_outcome_becomes_error_with_detail() {
        let config = InputConfig::default();
        let (columns, rows) = records(
            "repository,recipe,outcome,detail\nrepoA,X,flaky,took 3 tries\nrepoA,X,weird,\n",
            &config,
        );
        let first = columns.to_row(rows[0].as_ref().unwrap(), "t.csv").unwrap().unwrap();
        assert!(first.outcome_normalized);
        assert_eq!(first.row.outcome, Outcome::Error);
        assert_eq!(
            first.row.detail.as_deref(),
            Some("unrecognized outcome 'flaky'; took 3 tries")
        );
        let second = columns.to_row(rows[1].as_ref().unwrap(), "t.csv").unwrap().unwrap();
        assert_eq!(second.row.detail.as_deref(), Some("unrecognized outcome 'weird'"));
    }

    #[test]
    fn empty_required_values_are_row_errors() {
        let config = InputConfig::default();
        let (columns, rows) = records(
            "repository,recipe,outcome\n,X,pass\nrepoA,X,\n",
            &config,
        );
        let err = columns.to_row(rows[0].as_ref().unwrap(), "t.csv").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(
            err.kind,
            RowErrorKind::MissingValue {
                column: "repository".into()
            }
        );
        let err = columns.to_row(rows[1].as_ref().unwrap(), "t.csv").unwrap_err();
        assert_eq!(
            err.kind,
            RowErrorKind::MissingValue {
                column: "outcome".into()
            }
        );
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let config = InputConfig::default();
        let reader = RecordReader::new("t.csv", "repository,outcome\nrepoA,pass\n".as_bytes(), &config).unwrap();
        let err = ColumnIndex::resolve(reader.headers(), &config, "t.csv").unwrap_err();
        assert!(matches!(err, RollupError::MissingColumn { ref column, .. } if column == "recipe"));
    }

    #[test]
    fn origin_path_identity_with_branch_and_filter() {
        let config = RollupConfig::from_toml(
            r#"
[input.columns]
origin = "repositoryOrigin"
path = "repositoryPath"
branch = "repositoryBranch"
recipe = "recipe"
outcome = "outcome"

[input.filter]
column = "repositoryBranch"
values = ["main"]
"#,
        )
        .unwrap()
        .input;
        let (columns, rows) = records(
            "repositoryOrigin,repositoryPath,repositoryBranch,recipe,outcome\n\
             github.com/,/acme/a,main,X,fail\n\
             github.com,acme/a,feature,X,pass\n",
            &config,
        );
        let row = columns.to_row(rows[0].as_ref().unwrap(), "t.csv").unwrap().unwrap();
        assert_eq!(row.row.repository, "github.com/acme/a");
        assert_eq!(row.row.extra.get("branch").map(String::as_str), Some("main"));
        assert!(columns.to_row(rows[1].as_ref().unwrap(), "t.csv").unwrap().is_none());
    }

    #[test]
    fn missing_filter_column_is_fatal() {
        let mut config = InputConfig::default();
        config.filter = Some(RowFilter {
            column: "branch".into(),
            values: vec!["main".into()],
        });
        let reader = RecordReader::new("t.csv", "repository,recipe,outcome\n".as_bytes(), &config).unwrap();
        assert!(ColumnIndex::resolve(reader.headers(), &config, "t.csv").is_err());
    }

    #[test]
    fn timestamps_in_three_formats() {
        assert_eq!(
            parse_timestamp("2024-03-01T10:00:00+02:00").unwrap().to_rfc3339(),
            "2024-03-01T08:00:00+00:00"
        );
        assert_eq!(
            parse_timestamp("2024-03-01 10:00:00").unwrap().to_rfc3339(),
            "2024-03-01T10:00:00+00:00"
        );
        assert_eq!(
            parse_timestamp("2024-03-01").unwrap().to_rfc3339(),
            "2024-03-01T00:00:00+00:00"
        );
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn invalid_timestamp_is_row_error() {
        let mut config = InputConfig::default();
        config.columns.timestamp = Some("ranAt".into());
        let (columns, rows) = records(
            "repository,recipe,outcome,ranAt\nrepoA,X,pass,soon\nrepoA,X,pass,\n",
            &config,
        );
        let err = columns.to_row(rows[0].as_ref().unwrap(), "t.csv").unwrap_err();
        assert!(matches!(err.kind, RowErrorKind::InvalidTimestamp { .. }));
        let row = columns.to_row(rows[1].as_ref().unwrap(), "t.csv").unwrap().unwrap();
        assert!(row.row.timestamp.is_none());
    }

    #[test]
    fn engine_emits_unattributed_rows() {
        let resolver = resolver();
        let engine = AttributionEngine::new(&resolver);
        let owned = engine.attribute(ResultRow::new("repoA", "X", Outcome::Pass));
        assert_eq!(owned.paths, vec![OrgPath::parse("root/teamA").unwrap()]);
        let orphan = engine.attribute(ResultRow::new("repoZ", "X", Outcome::Pass));
        assert!(orphan.is_unattributed());
        assert_eq!(orphan.row.repository, "repoZ");
    }

    #[test]
    fn engine_ingests_records() {
        let resolver = resolver();
        let engine = AttributionEngine::new(&resolver);
        let config = InputConfig::default();
        let (columns, rows) = records("repository,recipe,outcome\nrepoA,X,bogus\n", &config);
        match engine.ingest(&columns, rows[0].as_ref().unwrap(), "t.csv").unwrap() {
            Ingested::Attributed {
                attribution,
                outcome_normalized,
            } => {
                assert!(outcome_normalized);
                assert_eq!(attribution.row.outcome, Outcome::Error);
                assert_eq!(attribution.paths.len(), 1);
            }
            Ingested::Filtered => panic!("row should not be filtered"),
        }
    }
}
