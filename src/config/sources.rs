//! Sources file: source paths, each followed by the rules that filter it.
//!
//! ```text
//! # comment
//! ~/documents
//! -\.tmp$
//! !node_modules$
//! /etc
//! ```

use crate::error::LinkbackError;
use crate::scanner::{Rule, RuleEffect, SourceSpec};
use crate::utils::expand_tilde;
use anyhow::Result;
use std::path::Path;

/// Read and parse a sources file.
///
/// # Errors
///
/// Returns a usage error if the file cannot be read or is malformed.
pub fn load_sources_file(path: &Path) -> Result<Vec<SourceSpec>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        LinkbackError::usage(format!(
            "Failed to read sources file {}: {e}",
            path.display()
        ))
    })?;
    parse_sources(&content, &path.display().to_string())
}

/// Parse sources-file text. `origin` names the file in error messages.
///
/// # Errors
///
/// Returns a usage error naming the line for a rule that appears before
/// any source or whose pattern does not compile.
pub fn parse_sources(content: &str, origin: &str) -> Result<Vec<SourceSpec>> {
    let mut sources: Vec<SourceSpec> = Vec::new();

    for (index, raw_line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim_end_matches('\r');
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let is_rule = line.chars().next().and_then(RuleEffect::from_prefix).is_some();
        if is_rule {
            let rule = Rule::parse(line)
                .map_err(|e| LinkbackError::usage(format!("{origin}:{line_number}: {e}")))?;
            let source = sources.last_mut().ok_or_else(|| {
                LinkbackError::usage(format!(
                    "{origin}:{line_number}: rule '{line}' appears before any source path"
                ))
            })?;
            source.rules.push(rule);
            continue;
        }

        let path = expand_tilde(trimmed)
            .map_err(|e| LinkbackError::usage(format!("{origin}:{line_number}: {e}")))?;
        sources.push(SourceSpec::new(path));
    }

    Ok(sources)
}
