//! Pluggable checks that produce result rows directly, without an export file.

use rayon::prelude::*;

use crate::model::{Outcome, ResultRow};

/// Verdict of one check on one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub outcome: Outcome,
    pub detail: Option<String>,
}

impl Finding {
    pub fn pass() -> Self {
        Self {
            outcome: Outcome::Pass,
            detail: None,
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Fail,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            outcome: Outcome::Skipped,
            detail: None,
        }
    }
}

/// A recipe. Implementations must be callable from several threads at once.
pub trait Analyzer: Send + Sync {
    fn recipe_id(&self) -> &str;

    fn analyze(&self, repository: &str) -> Finding;
}

/// Run every analyzer against every repository.
///
/// Rows come back grouped by repository, in input order, and within a
/// repository in analyzer order.
pub fn run_analyzers(analyzers: &[Box<dyn Analyzer>], repositories: &[String]) -> Vec<ResultRow> {
    repositories
        .par_iter()
        .flat_map_iter(|repository| {
            analyzers.iter().map(move |analyzer| {
                let finding = analyzer.analyze(repository);
                let mut row = ResultRow::new(repository.as_str(), analyzer.recipe_id(), finding.outcome);
                row.detail = finding.detail;
                row
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HasReadme;

    impl Analyzer for HasReadme {
        fn recipe_id(&self) -> &str {
            "has-readme"
        }

        fn analyze(&self, repository: &str) -> Finding {
            if repository.ends_with("-docs") {
                Finding::pass()
            } else {
                Finding::fail("README.md not found")
            }
        }
    }

    struct ArchivedSkip;

    impl Analyzer for ArchivedSkip {
        fn recipe_id(&self) -> &str {
            "archived"
        }

        fn analyze(&self, _repository: &str) -> Finding {
            Finding::skipped()
        }
    }

    #[test]
    fn rows_follow_repository_then_analyzer_order() {
        let analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(HasReadme), Box::new(ArchivedSkip)];
        let repos = vec!["acme/api".to_string(), "acme/api-docs".to_string()];
        let rows = run_analyzers(&analyzers, &repos);

        let flat: Vec<(&str, &str, Outcome)> = rows
            .iter()
            .map(|r| (r.repository.as_str(), r.recipe.as_str(), r.outcome))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("acme/api", "has-readme", Outcome::Fail),
                ("acme/api", "archived", Outcome::Skipped),
                ("acme/api-docs", "has-readme", Outcome::Pass),
                ("acme/api-docs", "archived", Outcome::Skipped),
            ]
        );
        assert_eq!(rows[0].detail.as_deref(), Some("README.md not found"));
    }
}
