//! Repository → organization resolution.
//!
//! [`Resolver::load`] validates a [`HierarchyDef`] eagerly (duplicates,
//! unknown parents, cycles, bad rules) and builds lookup indexes. After that
//! the resolver is immutable and [`Resolver::resolve`] is a pure function of
//! its state and the identifier, so one instance can be shared across threads.
//!
//! Matching policy, in precedence order: exact identifiers, then the longest
//! matching prefix, then patterns. In exclusive hierarchies only the winning
//! tier counts and the lexicographically smallest path among its units is
//! returned. Non-exclusive hierarchies return every path of every unit with any
//! matching rule.

use std::collections::{BTreeSet, HashMap};

use regex::{Regex, RegexSet};

use crate::error::RollupError;
use crate::hierarchy::{normalize_key, HierarchyDef};
use crate::model::{is_valid_segment, OrgPath};

#[derive(Debug)]
struct Unit {
    key: String,
    /// Concrete paths from every root, sorted.
    paths: Vec<OrgPath>,
}

#[derive(Debug)]
pub struct Resolver {
    exclusive: bool,
    units: Vec<Unit>,
    exact: HashMap<String, Vec<usize>>,
    prefixes: HashMap<String, Vec<usize>>,
    longest_prefix: usize,
    patterns: RegexSet,
    pattern_units: Vec<usize>,
    all_paths: Vec<OrgPath>,
}

/// Trim whitespace and trailing separators from a repository identifier.
pub fn normalize_repository(id: &str) -> &str {
    id.trim().trim_end_matches('/')
}

impl Resolver {
    pub fn load(def: &HierarchyDef) -> Result<Self, RollupError> {
        // Keys + names
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut keys = Vec::with_capacity(def.units.len());
        for (id, unit) in def.units.iter().enumerate() {
            if !is_valid_segment(&unit.name) {
                return Err(RollupError::ConfigValidation(format!(
                    "invalid unit name {:?}: names must be non-empty and may not contain '/'",
                    unit.name
                )));
            }
            let key = unit.key();
            if index.insert(key.clone(), id).is_some() {
                return Err(RollupError::DuplicateUnit { path: key });
            }
            keys.push(key);
        }

        // Adjacency
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); def.units.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); def.units.len()];
        for (id, unit) in def.units.iter().enumerate() {
            let refs = unit.parent.iter().chain(unit.also_under.iter());
            for parent_ref in refs {
                let parent_key = normalize_key(parent_ref);
                let parent = *index.get(&parent_key).ok_or_else(|| RollupError::UnknownParent {
                    unit: keys[id].clone(),
                    parent: parent_key.clone(),
                })?;
                if !parents[id].contains(&parent) {
                    parents[id].push(parent);
                    children[parent].push(id);
                }
            }
        }

        let order = topological_order(&children, &keys)?;

        // Concrete paths, parents before children.
        let mut paths: Vec<Vec<OrgPath>> = vec![Vec::new(); def.units.len()];
        for &id in &order {
            let name = def.units[id].name.trim();
            let mut own: Vec<OrgPath> = if parents[id].is_empty() {
                vec![OrgPath::root(name)]
            } else {
                parents[id]
                    .iter()
                    .flat_map(|&p| paths[p].iter().map(|pp| pp.child(name)))
                    .collect()
            };
            own.sort();
            own.dedup();
            paths[id] = own;
        }

        let mut owners: HashMap<&OrgPath, usize> = HashMap::new();
        for (id, unit_paths) in paths.iter().enumerate() {
            for path in unit_paths {
                if let Some(&other) = owners.get(path) {
                    if other != id {
                        return Err(RollupError::DuplicateUnit {
                            path: path.to_string(),
                        });
                    }
                }
                owners.insert(path, id);
            }
        }
        let mut all_paths: Vec<OrgPath> = owners.keys().map(|p| (*p).clone()).collect();
        all_paths.sort();

        // Rule indexes
        let mut exact: HashMap<String, Vec<usize>> = HashMap::new();
        let mut prefixes: HashMap<String, Vec<usize>> = HashMap::new();
        let mut pattern_sources = Vec::new();
        let mut pattern_units = Vec::new();
        for (id, unit) in def.units.iter().enumerate() {
            for rule in &unit.repositories {
                let rule = non_empty_rule(&keys[id], rule)?;
                exact.entry(rule.to_string()).or_default().push(id);
            }
            for rule in &unit.prefixes {
                // Prefixes keep a trailing '/': "github.com/acme/" must not match "github.com/acmecorp".
                let trimmed = rule.trim();
                if trimmed.is_empty() {
                    return Err(empty_rule(&keys[id], rule));
                }
                prefixes.entry(trimmed.to_string()).or_default().push(id);
            }
            for rule in &unit.patterns {
                Regex::new(rule).map_err(|e| RollupError::InvalidRule {
                    unit: keys[id].clone(),
                    rule: rule.clone(),
                    message: e.to_string(),
                })?;
                pattern_sources.push(rule.clone());
                pattern_units.push(id);
            }
        }
        let patterns = RegexSet::new(&pattern_sources).map_err(|e| RollupError::InvalidRule {
            unit: "<pattern set>".into(),
            rule: String::new(),
            message: e.to_string(),
        })?;
        let longest_prefix = prefixes.keys().map(String::len).max().unwrap_or(0);

        let units = keys
            .into_iter()
            .zip(paths)
            .map(|(key, paths)| Unit { key, paths })
            .collect::<Vec<_>>();

        log::debug!(
            "loaded hierarchy: {} units, {} paths, {} exact, {} prefix, {} pattern rules (exclusive={})",
            units.len(),
            all_paths.len(),
            exact.len(),
            prefixes.len(),
            pattern_units.len(),
            def.exclusive,
        );

        Ok(Self {
            exclusive: def.exclusive,
            units,
            exact,
            prefixes,
            longest_prefix,
            patterns,
            pattern_units,
            all_paths,
        })
    }

    /// Organization paths owning `repository`, sorted. Empty means unattributed.
    pub fn resolve(&self, repository: &str) -> Vec<OrgPath> {
        let id = normalize_repository(repository);
        if id.is_empty() {
            return Vec::new();
        }

        let exact: &[usize] = self.exact.get(id).map(Vec::as_slice).unwrap_or(&[]);

        // Matching prefixes, longest first.
        let mut prefix_hits: Vec<&[usize]> = Vec::new();
        let boundaries = id
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(id.len()))
            .filter(|&i| i <= self.longest_prefix);
        for end in boundaries.collect::<Vec<_>>().into_iter().rev() {
            if let Some(units) = self.prefixes.get(&id[..end]) {
                prefix_hits.push(units);
            }
        }

        let pattern_hits: Vec<usize> = if self.pattern_units.is_empty() {
            Vec::new()
        } else {
            self.patterns
                .matches(id)
                .into_iter()
                .map(|i| self.pattern_units[i])
                .collect()
        };

        if self.exclusive {
            let tier: Vec<usize> = if !exact.is_empty() {
                exact.to_vec()
            } else if let Some(longest) = prefix_hits.first() {
                longest.to_vec()
            } else {
                pattern_hits
            };
            tier.iter()
                .flat_map(|&u| self.units[u].paths.iter())
                .min()
                .cloned()
                .into_iter()
                .collect()
        } else {
            let matched = exact
                .iter()
                .chain(prefix_hits.iter().flat_map(|hits| hits.iter()))
                .chain(pattern_hits.iter());
            let found: BTreeSet<&OrgPath> = matched
                .flat_map(|&u| self.units[u].paths.iter())
                .collect();
            found.into_iter().cloned().collect()
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Every concrete organization path, in depth-first order.
    pub fn paths(&self) -> &[OrgPath] {
        &self.all_paths
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Concrete paths of the unit with canonical key `key`.
    pub fn unit_paths(&self, key: &str) -> Option<&[OrgPath]> {
        let key = normalize_key(key);
        self.units
            .iter()
            .find(|u| u.key == key)
            .map(|u| u.paths.as_slice())
    }
}

fn non_empty_rule<'a>(unit: &str, rule: &'a str) -> Result<&'a str, RollupError> {
    let normalized = normalize_repository(rule);
    if normalized.is_empty() {
        return Err(empty_rule(unit, rule));
    }
    Ok(normalized)
}

fn empty_rule(unit: &str, rule: &str) -> RollupError {
    RollupError::InvalidRule {
        unit: unit.to_string(),
        rule: rule.to_string(),
        message: "rule is empty".into(),
    }
}

/// Parent-before-child order over the unit graph. Fails on the first cycle found,
/// reporting it as a chain of unit keys that starts and ends on the same unit.
fn topological_order(children: &[Vec<usize>], keys: &[String]) -> Result<Vec<usize>, RollupError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let n = children.len();
    let mut mark = vec![Mark::New; n];
    let mut post = Vec::with_capacity(n);

    for start in 0..n {
        if mark[start] != Mark::New {
            continue;
        }
        // (node, next child index)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        mark[start] = Mark::Active;

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if let Some(&child) = children[node].get(next) {
                top.1 += 1;
                match mark[child] {
                    Mark::New => {
                        mark[child] = Mark::Active;
                        stack.push((child, 0));
                    }
                    Mark::Active => {
                        let from = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                        let mut chain: Vec<String> =
                            stack[from..].iter().map(|&(n, _)| keys[n].clone()).collect();
                        chain.push(keys[child].clone());
                        return Err(RollupError::Cycle { chain });
                    }
                    Mark::Done => {}
                }
            } else {
                mark[node] = Mark::Done;
                post.push(node);
                stack.pop();
            }
        }
    }

    post.reverse();
    Ok(post)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::UnitDef;

    fn path(s: &str) -> OrgPath {
        OrgPath::parse(s).unwrap()
    }

    fn paths(v: &[&str]) -> Vec<OrgPath> {
        v.iter().map(|s| path(s)).collect()
    }

    fn def(exclusive: bool, units: Vec<UnitDef>) -> HierarchyDef {
        HierarchyDef { exclusive, units }
    }

    #[test]
    fn exact_match_resolves_to_unit_path() {
        let r = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("root"),
                UnitDef::child("teamA", "root").repository("repoA"),
                UnitDef::child("teamB", "root").repository("repoB"),
            ],
        ))
        .unwrap();
        assert_eq!(r.resolve("repoA"), paths(&["root/teamA"]));
        assert_eq!(r.resolve(" repoB/ "), paths(&["root/teamB"]));
        assert!(r.resolve("repoC").is_empty());
        assert!(r.resolve("").is_empty());
        assert_eq!(r.paths(), paths(&["root", "root/teamA", "root/teamB"]).as_slice());
    }

    #[test]
    fn exact_beats_prefix_and_longest_prefix_wins() {
        let r = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("acme").prefix("github.com/acme/"),
                UnitDef::child("platform", "acme").prefix("github.com/acme/platform-"),
                UnitDef::child("build", "acme").repository("github.com/acme/platform-gradle"),
            ],
        ))
        .unwrap();
        assert_eq!(r.resolve("github.com/acme/platform-gradle"), paths(&["acme/build"]));
        assert_eq!(r.resolve("github.com/acme/platform-maven"), paths(&["acme/platform"]));
        assert_eq!(r.resolve("github.com/acme/web"), paths(&["acme"]));
        assert!(r.resolve("github.com/acmecorp/web").is_empty());
    }

    #[test]
    fn prefix_beats_pattern() {
        let r = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("svc").pattern(r"-svc$"),
                UnitDef::root("acme").prefix("github.com/acme/"),
            ],
        ))
        .unwrap();
        assert_eq!(r.resolve("github.com/acme/billing-svc"), paths(&["acme"]));
        assert_eq!(r.resolve("gitlab.com/x/billing-svc"), paths(&["svc"]));
    }

    #[test]
    fn ties_break_lexicographically_in_exclusive_mode() {
        let r = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("zeta").prefix("github.com/acme/"),
                UnitDef::root("alpha").prefix("github.com/acme/"),
            ],
        ))
        .unwrap();
        assert_eq!(r.resolve("github.com/acme/x"), paths(&["alpha"]));
    }

    #[test]
    fn non_exclusive_returns_every_matching_unit() {
        let r = Resolver::load(&def(
            false,
            vec![
                UnitDef::root("acme").prefix("github.com/acme/"),
                UnitDef::child("platform", "acme").repository("github.com/acme/gradle"),
                UnitDef::root("tags"),
                UnitDef::child("jvm", "tags").pattern("gradle|maven"),
            ],
        ))
        .unwrap();
        assert_eq!(
            r.resolve("github.com/acme/gradle"),
            paths(&["acme", "acme/platform", "tags/jvm"])
        );
    }

    #[test]
    fn dag_unit_has_one_path_per_parent() {
        let r = Resolver::load(&def(
            false,
            vec![
                UnitDef::root("root"),
                UnitDef::child("teamA", "root"),
                UnitDef::child("teamB", "root"),
                UnitDef::child("shared", "root/teamA")
                    .also_under("root/teamB")
                    .repository("repoS"),
            ],
        ))
        .unwrap();
        assert_eq!(
            r.unit_paths("root/teamA/shared").unwrap(),
            paths(&["root/teamA/shared", "root/teamB/shared"]).as_slice()
        );
        assert_eq!(
            r.resolve("repoS"),
            paths(&["root/teamA/shared", "root/teamB/shared"])
        );
    }

    #[test]
    fn dag_unit_in_exclusive_mode_yields_smallest_path() {
        let r = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("root"),
                UnitDef::child("teamB", "root"),
                UnitDef::child("teamA", "root"),
                UnitDef::root("shared")
                    .also_under("root/teamB")
                    .also_under("root/teamA")
                    .repository("repoS"),
            ],
        ))
        .unwrap();
        assert_eq!(r.resolve("repoS"), paths(&["root/teamA/shared"]));
    }

    #[test]
    fn cycle_is_rejected_at_load() {
        let err = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("root"),
                UnitDef::root("a").also_under("b"),
                UnitDef::root("b").also_under("a"),
            ],
        ))
        .unwrap_err();
        match err {
            RollupError::Cycle { chain } => {
                assert_eq!(chain.first(), chain.last());
                assert!(chain.contains(&"a".to_string()));
                assert!(chain.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let err = Resolver::load(&def(true, vec![UnitDef::root("a").also_under("a")])).unwrap_err();
        assert!(matches!(err, RollupError::Cycle { .. }));
    }

    #[test]
    fn duplicate_name_in_same_scope_is_rejected() {
        let err = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("root"),
                UnitDef::child("team", "root"),
                UnitDef::child("team", "root"),
            ],
        ))
        .unwrap_err();
        assert!(matches!(err, RollupError::DuplicateUnit { ref path } if path == "root/team"));
    }

    #[test]
    fn same_name_in_different_scopes_is_fine() {
        let r = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("a"),
                UnitDef::root("b"),
                UnitDef::child("infra", "a"),
                UnitDef::child("infra", "b"),
            ],
        ))
        .unwrap();
        assert_eq!(r.unit_count(), 4);
    }

    #[test]
    fn dag_collision_on_concrete_path_is_rejected() {
        let err = Resolver::load(&def(
            true,
            vec![
                UnitDef::root("root"),
                UnitDef::child("shared", "root"),
                UnitDef::root("shared").also_under("root"),
            ],
        ))
        .unwrap_err();
        assert!(matches!(err, RollupError::DuplicateUnit { ref path } if path == "root/shared"));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let err = Resolver::load(&def(true, vec![UnitDef::child("team", "nowhere")])).unwrap_err();
        assert!(matches!(err, RollupError::UnknownParent { .. }));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = Resolver::load(&def(true, vec![UnitDef::root("a").pattern("(unclosed")])).unwrap_err();
        assert!(matches!(err, RollupError::InvalidRule { ref unit, .. } if unit == "a"));
    }

    #[test]
    fn empty_rule_and_bad_name_are_rejected() {
        assert!(Resolver::load(&def(true, vec![UnitDef::root("a").repository("  ")])).is_err());
        assert!(Resolver::load(&def(true, vec![UnitDef::root("a/b")])).is_err());
        assert!(Resolver::load(&def(true, vec![UnitDef::root(" ")])).is_err());
    }

    #[test]
    fn resolution_is_deterministic_across_calls() {
        let r = Resolver::load(&def(
            false,
            vec![
                UnitDef::root("c").prefix("x/"),
                UnitDef::root("a").prefix("x/"),
                UnitDef::root("b").pattern("^x/"),
            ],
        ))
        .unwrap();
        let first = r.resolve("x/repo");
        for _ in 0..10 {
            assert_eq!(r.resolve("x/repo"), first);
        }
        assert_eq!(first, paths(&["a", "b", "c"]));
    }
}
