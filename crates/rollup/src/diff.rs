//! Cell-by-cell comparison of two reports (e.g. last week's snapshot and today's).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{OrgPath, OutcomeCounts};
use crate::report::RollupReport;

/// Signed per-outcome change, `new - old`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountDelta {
    pub pass: i64,
    pub fail: i64,
    pub error: i64,
    pub skipped: i64,
}

impl CountDelta {
    fn between(old: &OutcomeCounts, new: &OutcomeCounts) -> Self {
        let d = |a: u64, b: u64| b as i64 - a as i64;
        Self {
            pass: d(old.pass, new.pass),
            fail: d(old.fail, new.fail),
            error: d(old.error, new.error),
            skipped: d(old.skipped, new.skipped),
        }
    }

    pub fn total(&self) -> i64 {
        self.pass + self.fail + self.error + self.skipped
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// One cell whose counts differ. `organization` is `None` for the unattributed bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellDelta {
    pub organization: Option<OrgPath>,
    pub recipe: String,
    pub old: OutcomeCounts,
    pub new: OutcomeCounts,
    pub delta: CountDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportDiff {
    pub organizations_added: Vec<OrgPath>,
    pub organizations_removed: Vec<OrgPath>,
    /// Changed cells in report traversal order, unattributed last.
    pub cells: Vec<CellDelta>,
}

impl ReportDiff {
    pub fn is_empty(&self) -> bool {
        self.organizations_added.is_empty() && self.organizations_removed.is_empty() && self.cells.is_empty()
    }
}

pub fn diff(old: &RollupReport, new: &RollupReport) -> ReportDiff {
    let organizations_added = new
        .organizations
        .keys()
        .filter(|p| !old.organizations.contains_key(*p))
        .cloned()
        .collect();
    let organizations_removed = old
        .organizations
        .keys()
        .filter(|p| !new.organizations.contains_key(*p))
        .cloned()
        .collect();

    let empty = BTreeMap::new();
    let mut cells = Vec::new();

    let mut paths: Vec<&OrgPath> = old.organizations.keys().chain(new.organizations.keys()).collect();
    paths.sort();
    paths.dedup();
    for path in paths {
        let before = old.organizations.get(path).unwrap_or(&empty);
        let after = new.organizations.get(path).unwrap_or(&empty);
        diff_recipes(Some(path), before, after, &mut cells);
    }
    diff_recipes(None, &old.unattributed, &new.unattributed, &mut cells);

    ReportDiff {
        organizations_added,
        organizations_removed,
        cells,
    }
}

fn diff_recipes(
    organization: Option<&OrgPath>,
    before: &BTreeMap<String, OutcomeCounts>,
    after: &BTreeMap<String, OutcomeCounts>,
    out: &mut Vec<CellDelta>,
) {
    let mut recipes: Vec<&String> = before.keys().chain(after.keys()).collect();
    recipes.sort();
    recipes.dedup();
    for recipe in recipes {
        let old = before.get(recipe).copied().unwrap_or_default();
        let new = after.get(recipe).copied().unwrap_or_default();
        let delta = CountDelta::between(&old, &new);
        if delta.is_zero() {
            continue;
        }
        out.push(CellDelta {
            organization: organization.cloned(),
            recipe: recipe.clone(),
            old,
            new,
            delta,
        });
    }
}
