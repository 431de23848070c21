//! Exclusion filtering
//!
//! A unit is excluded iff some pattern names it or one of its ancestors.
//! Ancestors are path prefixes ending at `/` and, for test node ids such as
//! `pkg/a_test.py::test_x`, the file part before `::`.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

use super::source::{DiscoveryError, UnitSource};
use crate::models::UnitSpec;

/// What a pattern was written to exclude
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Written with a trailing `/`: everything under a directory
    Subtree,
    /// A single unit identifier (and anything nested inside it)
    Unit,
}

/// One exclusion rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExcludePattern {
    path: String,
    kind: PatternKind,
}

impl ExcludePattern {
    pub fn parse(raw: &str) -> Result<Self, DiscoveryError> {
        let raw = raw.trim();
        let kind = if raw.ends_with('/') {
            PatternKind::Subtree
        } else {
            PatternKind::Unit
        };
        let path = normalize(raw).trim_end_matches('/').to_string();
        if path.is_empty() {
            return Err(DiscoveryError::EmptyPattern);
        }
        Ok(Self { path, kind })
    }

    /// Parse a list of patterns, failing on the first invalid one
    pub fn parse_all<I, S>(raw: I) -> Result<Vec<Self>, DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter().map(|p| Self::parse(p.as_ref())).collect()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Whether this pattern names `unit_id` or one of its ancestors.
    ///
    /// A subtree pattern only matches below its directory, never a unit whose
    /// id equals the directory path.
    pub fn matches(&self, unit_id: &str) -> bool {
        let Some(rest) = unit_id.strip_prefix(self.path.as_str()) else {
            return false;
        };
        match self.kind {
            PatternKind::Subtree => rest.starts_with('/'),
            PatternKind::Unit => rest.is_empty() || rest.starts_with('/') || rest.starts_with("::"),
        }
    }
}

impl fmt::Display for ExcludePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PatternKind::Subtree => write!(f, "{}/", self.path),
            PatternKind::Unit => write!(f, "{}", self.path),
        }
    }
}

/// Every listed unit with its exclusion flag, sorted and de-duplicated
pub fn classify(ids: Vec<String>, patterns: &[ExcludePattern]) -> Vec<UnitSpec> {
    let ids: BTreeSet<String> = ids.iter().map(|id| normalize(id).to_string()).collect();

    let mut hits = vec![0usize; patterns.len()];
    let units: Vec<UnitSpec> = ids
        .into_iter()
        .map(|id| {
            let mut excluded = false;
            for (i, pattern) in patterns.iter().enumerate() {
                if pattern.matches(&id) {
                    hits[i] += 1;
                    excluded = true;
                }
            }
            UnitSpec { id, excluded }
        })
        .collect();

    for (pattern, count) in patterns.iter().zip(&hits) {
        if *count == 0 {
            debug!("Exclusion pattern '{}' matched no units", pattern);
        }
    }

    units
}

/// Selected units from a source, in lexicographic order.
///
/// Calling this twice over an unchanged source yields the same sequence.
pub fn discover(
    source: &dyn UnitSource,
    patterns: &[ExcludePattern],
) -> Result<Vec<UnitSpec>, DiscoveryError> {
    let units = classify(source.list()?, patterns);
    let total = units.len();
    let selected: Vec<UnitSpec> = units.into_iter().filter(|u| !u.excluded).collect();

    info!(
        "Discovered {} units ({} excluded by {} patterns)",
        selected.len(),
        total - selected.len(),
        patterns.len()
    );
    Ok(selected)
}

fn normalize(raw: &str) -> &str {
    let mut s = raw.trim();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s
}
