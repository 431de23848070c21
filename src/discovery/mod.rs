//! Unit discovery and filtering
//!
//! Lists test units from a source and removes those matched by exclusion
//! patterns.

mod filter;
mod source;

pub use filter::{classify, discover, ExcludePattern, PatternKind};
pub use source::{DiscoveryError, FsUnitSource, StaticUnitSource, UnitSource};
