//! Ordered include/exclude/prune rules evaluated against relative paths.
//!
//! Rules are applied in declaration order and the last matching rule wins.
//! When nothing matches, the caller-supplied inherited state decides, which
//! lets a denied directory still have descendants re-included by an explicit
//! allow rule further down the list.

use crate::error::LinkbackError;
use anyhow::Result;
use regex::Regex;
use std::fmt;
use std::path::{Component, Path};

/// Outcome of evaluating a path against a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    /// Item is included
    Allow,
    /// Item is excluded, but descendants may still be re-included
    Deny,
    /// Item and everything beneath it is excluded and never visited
    PruneSubtree,
}

impl RuleEffect {
    /// The prefix character used for this effect in a sources file.
    #[must_use]
    pub const fn prefix(self) -> char {
        match self {
            Self::Allow => '+',
            Self::Deny => '-',
            Self::PruneSubtree => '!',
        }
    }

    /// Parse a sources-file prefix character.
    #[must_use]
    pub const fn from_prefix(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Allow),
            '-' => Some(Self::Deny),
            '!' => Some(Self::PruneSubtree),
            _ => None,
        }
    }

    /// Whether this effect includes the item itself.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A single rule: an effect plus the regular expression that triggers it.
#[derive(Debug, Clone)]
pub struct Rule {
    /// What happens to a matching path
    pub effect: RuleEffect,
    /// Unanchored pattern searched for in the relative path
    pub pattern: Regex,
}

impl Rule {
    /// Build a rule from an effect and a pattern string.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the pattern is not a valid regular expression.
    pub fn new(effect: RuleEffect, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            LinkbackError::usage(format!("Invalid rule pattern '{pattern}': {e}"))
        })?;
        Ok(Self { effect, pattern })
    }

    /// Parse a rule line such as `+docs/.*\.txt` or `!cache`.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the line has no recognised prefix or the
    /// pattern fails to compile.
    pub fn parse(line: &str) -> Result<Self> {
        let mut chars = line.chars();
        let effect = chars
            .next()
            .and_then(RuleEffect::from_prefix)
            .ok_or_else(|| {
                LinkbackError::usage(format!(
                    "Rule must start with '+', '-' or '!': {line}"
                ))
            })?;
        Self::new(effect, chars.as_str())
    }

    /// Whether the rule's pattern occurs anywhere in `path`.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.effect.prefix(), self.pattern.as_str())
    }
}

/// Ordered list of rules for one source path.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    #[must_use]
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule; later rules override earlier ones.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Evaluate `path` starting from the inherited allow/deny state.
    ///
    /// Every matching rule is applied in order; the last match wins.
    #[must_use]
    pub fn evaluate(&self, path: &str, inherited_allowed: bool) -> RuleEffect {
        let initial = if inherited_allowed {
            RuleEffect::Allow
        } else {
            RuleEffect::Deny
        };

        self.rules
            .iter()
            .filter(|rule| rule.matches(path))
            .fold(initial, |_, rule| rule.effect)
    }

    /// Evaluate a relative filesystem path, normalising separators to `/`.
    #[must_use]
    pub fn evaluate_path(&self, path: &Path, inherited_allowed: bool) -> RuleEffect {
        self.evaluate(&rule_path(path), inherited_allowed)
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

/// Render a relative path the way rules see it: components joined by `/`.
#[must_use]
pub fn rule_path(path: &Path) -> String {
    let mut rendered = String::new();
    for component in path.components() {
        if let Component::Normal(part) = component {
            if !rendered.is_empty() {
                rendered.push('/');
            }
            rendered.push_str(&part.to_string_lossy());
        }
    }
    rendered
}
