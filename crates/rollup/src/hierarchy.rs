//! Organization hierarchy definitions.
//!
//! A hierarchy is a flat list of units. Each unit is identified by its
//! canonical key `parent/name` and may additionally hang under other units via
//! `also_under`, which turns the tree into a DAG.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::RollupError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyDef {
    /// At most one organization path per repository when set.
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitDef>,
}

impl Default for HierarchyDef {
    fn default() -> Self {
        Self {
            exclusive: true,
            units: Vec::new(),
        }
    }
}

fn default_exclusive() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
    pub name: String,
    /// Canonical key of the parent unit; absent for roots.
    #[serde(default)]
    pub parent: Option<String>,
    /// Canonical keys of additional parents.
    #[serde(default)]
    pub also_under: Vec<String>,
    /// Exact repository identifiers.
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Repository identifier prefixes.
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// Regular expressions over repository identifiers.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl UnitDef {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn child(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
            ..Self::default()
        }
    }

    pub fn also_under(mut self, parent: impl Into<String>) -> Self {
        self.also_under.push(parent.into());
        self
    }

    pub fn repository(mut self, id: impl Into<String>) -> Self {
        self.repositories.push(id.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// `parent/name`, or `name` for roots.
    pub fn key(&self) -> String {
        let name = self.name.trim();
        match self.parent.as_deref().map(normalize_key) {
            Some(parent) if !parent.is_empty() => format!("{parent}/{name}"),
            _ => name.to_string(),
        }
    }
}

/// Trim whitespace and surrounding separators from a unit reference.
pub(crate) fn normalize_key(key: &str) -> String {
    key.trim().trim_matches('/').to_string()
}

impl HierarchyDef {
    pub fn from_toml(input: &str) -> Result<Self, RollupError> {
        toml::from_str(input).map_err(|e| RollupError::ConfigParse(e.to_string()))
    }

    /// Build a hierarchy from a repository listing.
    ///
    /// Expects `origin` and `path` columns, plus `org1..orgN` columns naming the
    /// owning organizations from most specific (`org1`) to the root. Each
    /// repository becomes an exact rule on its leaf organization. A repository
    /// may be listed under several organizations, so the resulting hierarchy is
    /// non-exclusive.
    pub fn from_repos_csv<R: Read>(input: R) -> Result<Self, RollupError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| RollupError::ConfigParse(format!("repository listing: {e}")))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_lowercase())
            .collect();

        let column = |name: &str| -> Result<usize, RollupError> {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                RollupError::ConfigValidation(format!("repository listing: missing column '{name}'"))
            })
        };
        let origin_idx = column("origin")?;
        let path_idx = column("path")?;

        // orgN columns, ordered by N.
        let mut org_columns: Vec<(u32, usize)> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| {
                h.strip_prefix("org")
                    .and_then(|n| n.parse::<u32>().ok())
                    .map(|n| (n, i))
            })
            .collect();
        org_columns.sort();
        if org_columns.is_empty() {
            return Err(RollupError::ConfigValidation(
                "repository listing: no org1..orgN columns".into(),
            ));
        }

        // Canonical key -> unit, kept sorted so the definition is stable.
        let mut units: BTreeMap<String, UnitDef> = BTreeMap::new();

        for record in reader.records() {
            let record = record.map_err(|e| RollupError::ConfigParse(format!("repository listing: {e}")))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            if record.iter().all(str::is_empty) {
                continue;
            }

            let origin = record.get(origin_idx).unwrap_or("");
            let path = record.get(path_idx).unwrap_or("");
            if origin.is_empty() || path.is_empty() {
                return Err(RollupError::ConfigValidation(format!(
                    "repository listing line {line}: origin and path are required"
                )));
            }

            let chain: Vec<&str> = org_columns
                .iter()
                .filter_map(|&(_, i)| record.get(i))
                .filter(|v| !v.is_empty())
                .collect();
            if chain.is_empty() {
                continue;
            }

            let mut parent: Option<String> = None;
            for name in chain.iter().rev() {
                let unit = match parent {
                    Some(ref p) => UnitDef::child(*name, p.clone()),
                    None => UnitDef::root(*name),
                };
                let key = unit.key();
                units.entry(key.clone()).or_insert(unit);
                parent = Some(key);
            }
            if let Some(leaf) = parent.and_then(|key| units.get_mut(&key)) {
                leaf.repositories.push(format!("{origin}/{path}"));
            }
        }

        let units = units
            .into_values()
            .map(|mut u| {
                let unique: BTreeSet<String> = u.repositories.drain(..).collect();
                u.repositories = unique.into_iter().collect();
                u
            })
            .collect();

        Ok(Self {
            exclusive: false,
            units,
        })
    }
}
