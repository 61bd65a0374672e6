/// Include/exclude/prune rule evaluation.
pub mod rules;

/// Source path specifications and job sizing.
pub mod source;

/// Lazy depth-first traversal of a source tree.
pub mod walker;

pub use rules::{Rule, RuleEffect, RuleSet};
pub use source::{SourceSpec, measure_sources};
pub use walker::{BackupItem, ItemKind, TreeWalker};
