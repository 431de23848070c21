//! Unit sources
//!
//! Produce the raw listing of unit identifiers that filtering works on.

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Test root not found: {0}")]
    MissingRoot(PathBuf),

    #[error("Invalid test file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: ignore::Error,
    },

    #[error("Empty exclusion pattern")]
    EmptyPattern,

    #[error("Failed to walk test tree: {0}")]
    Walk(#[from] ignore::Error),
}

/// Lists unit identifiers
pub trait UnitSource: Send + Sync {
    fn list(&self) -> Result<Vec<String>, DiscoveryError>;
}

/// Test files found by walking a directory tree.
///
/// Identifiers are `/`-separated paths relative to the root. Hidden entries
/// and gitignored paths are skipped.
#[derive(Clone, Debug)]
pub struct FsUnitSource {
    root: PathBuf,
    pattern: String,
}

impl FsUnitSource {
    pub fn new(root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            pattern: pattern.into(),
        }
    }
}

impl UnitSource for FsUnitSource {
    fn list(&self) -> Result<Vec<String>, DiscoveryError> {
        if !self.root.is_dir() {
            return Err(DiscoveryError::MissingRoot(self.root.clone()));
        }

        let mut overrides = OverrideBuilder::new(&self.root);
        overrides
            .add(&self.pattern)
            .map_err(|source| DiscoveryError::Pattern {
                pattern: self.pattern.clone(),
                source,
            })?;
        let overrides = overrides.build().map_err(|source| DiscoveryError::Pattern {
            pattern: self.pattern.clone(),
            source,
        })?;

        let walker = WalkBuilder::new(&self.root)
            .overrides(overrides)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .build();

        let mut ids = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                ids.push(unit_id(relative));
            }
        }

        debug!(
            "Found {} files matching '{}' under {}",
            ids.len(),
            self.pattern,
            self.root.display()
        );
        Ok(ids)
    }
}

/// A fixed listing of units
#[derive(Clone, Debug, Default)]
pub struct StaticUnitSource {
    units: Vec<String>,
}

impl StaticUnitSource {
    pub fn new<I, S>(units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            units: units.into_iter().map(Into::into).collect(),
        }
    }
}

impl UnitSource for StaticUnitSource {
    fn list(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.units.clone())
    }
}

/// Turn a relative path into a `/`-separated identifier
fn unit_id(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
