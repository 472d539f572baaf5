//! `devcenter diff`: compare two saved JSON reports.

use std::path::{Path, PathBuf};

use devcenter_rollup::diff::{CellDelta, ReportDiff};
use devcenter_rollup::report::UNATTRIBUTED_LABEL;
use devcenter_rollup::RollupReport;

use crate::exit_codes::EXIT_DIFF_CHANGES;
use crate::CliError;

fn load_report(path: &Path) -> Result<RollupReport, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("cannot read report {}: {e}", path.display())))?;
    RollupReport::from_json(&text).map_err(|e| {
        CliError::usage(format!("{}: not a rollup report: {e}", path.display()))
            .with_hint("reports are produced by `devcenter rollup --format json`")
    })
}

pub fn cmd_diff(old: PathBuf, new: PathBuf, json: bool) -> Result<(), CliError> {
    let before = load_report(&old)?;
    let after = load_report(&new)?;
    let diff = devcenter_rollup::diff(&before, &after);

    if json {
        let text = serde_json::to_string_pretty(&diff)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        println!("{text}");
    } else {
        print!("{}", render_text(&diff));
    }

    if diff.is_empty() {
        Ok(())
    } else {
        // Differences are a result, not an error: no message.
        Err(CliError {
            code: EXIT_DIFF_CHANGES,
            message: String::new(),
            hint: None,
        })
    }
}

fn render_text(diff: &ReportDiff) -> String {
    let mut out = String::new();
    for path in &diff.organizations_added {
        out.push_str(&format!("+ {path}\n"));
    }
    for path in &diff.organizations_removed {
        out.push_str(&format!("- {path}\n"));
    }
    for cell in &diff.cells {
        out.push_str(&format_cell(cell));
        out.push('\n');
    }
    out
}

fn format_cell(cell: &CellDelta) -> String {
    let organization = match cell.organization {
        Some(ref path) => path.to_string(),
        None => UNATTRIBUTED_LABEL.to_string(),
    };
    let d = &cell.delta;
    let changes: Vec<String> = [("pass", d.pass), ("fail", d.fail), ("error", d.error), ("skipped", d.skipped)]
        .iter()
        .filter(|(_, v)| *v != 0)
        .map(|(name, v)| format!("{name} {v:+}"))
        .collect();
    format!("~ {organization} {}: {}", cell.recipe, changes.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcenter_rollup::diff::CountDelta;
    use devcenter_rollup::{OrgPath, OutcomeCounts};

    #[test]
    fn cell_lines_show_signed_nonzero_changes() {
        let cell = CellDelta {
            organization: OrgPath::parse("acme/payments"),
            recipe: "log4shell".into(),
            old: OutcomeCounts::default(),
            new: OutcomeCounts::default(),
            delta: CountDelta {
                pass: 2,
                fail: -1,
                error: 0,
                skipped: 0,
            },
        };
        assert_eq!(format_cell(&cell), "~ acme/payments log4shell: pass +2, fail -1");
    }

    #[test]
    fn unattributed_cells_use_label() {
        let cell = CellDelta {
            organization: None,
            recipe: "secrets".into(),
            old: OutcomeCounts::default(),
            new: OutcomeCounts::default(),
            delta: CountDelta {
                skipped: 3,
                ..CountDelta::default()
            },
        };
        assert_eq!(format_cell(&cell), "~ (unattributed) secrets: skipped +3");
    }
}
