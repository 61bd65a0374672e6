//! Optional TOML configuration and the sources-file format.
//!
//! Precedence is built-in defaults, then the configuration file, then
//! command-line flags. The resolved values end up in a [`crate::RunContext`].

/// Sources-file parsing
pub mod sources;

use crate::error::LinkbackError;
use crate::storage::file_ops::DEFAULT_MMAP_THRESHOLD;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// An optional upper bound; `unlimited` disables the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLimit", into = "RawLimit")]
pub enum Limit {
    /// No bound
    Unlimited,
    /// At most this many
    Max(u32),
}

impl Limit {
    #[must_use]
    pub const fn as_option(self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::Max(value) => Some(value),
        }
    }
}

impl FromStr for Limit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") || trimmed.eq_ignore_ascii_case("none") {
            return Ok(Self::Unlimited);
        }
        trimmed
            .parse::<u32>()
            .map(Self::Max)
            .map_err(|_| format!("expected a non-negative number or 'unlimited', got '{s}'"))
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Max(value) => write!(f, "{value}"),
        }
    }
}

/// TOML shape of a [`Limit`]: a bare integer or a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawLimit {
    Number(u32),
    Text(String),
}

impl TryFrom<RawLimit> for Limit {
    type Error = String;

    fn try_from(raw: RawLimit) -> Result<Self, Self::Error> {
        match raw {
            RawLimit::Number(value) => Ok(Self::Max(value)),
            RawLimit::Text(text) => text.parse(),
        }
    }
}

impl From<Limit> for RawLimit {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Unlimited => Self::Text("unlimited".to_string()),
            Limit::Max(value) => Self::Number(value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub linking: LinkingConfig,

    #[serde(default)]
    pub scanning: ScanningConfig,

    #[serde(default)]
    pub hashing: HashingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkingConfig {
    /// Records a physical copy may carry before a new copy is made
    #[serde(default = "default_max_hard_links")]
    pub max_hard_links_per_file: Limit,
    /// Age in days after which a physical copy is no longer linked to
    #[serde(default = "default_max_age")]
    pub max_hard_link_age_days: Limit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanningConfig {
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashingConfig {
    /// Files at or above this many bytes are hashed through a memory map
    #[serde(default = "default_mmap_threshold")]
    pub mmap_threshold: u64,
}

const fn default_max_hard_links() -> Limit {
    Limit::Max(crate::DEFAULT_MAX_HARD_LINKS)
}

const fn default_max_age() -> Limit {
    Limit::Max(crate::DEFAULT_MAX_HARD_LINK_AGE_DAYS)
}

const fn default_mmap_threshold() -> u64 {
    DEFAULT_MMAP_THRESHOLD
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            max_hard_links_per_file: default_max_hard_links(),
            max_hard_link_age_days: default_max_age(),
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            mmap_threshold: default_mmap_threshold(),
        }
    }
}

impl Config {
    /// Default location: `~/.config/linkback/config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(crate::DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the file cannot be read, is not valid TOML,
    /// contains unknown keys, or holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            LinkbackError::usage(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config = Self::parse(&content).map_err(|e| {
            LinkbackError::usage(format!("Invalid config file {}: {e}", path.display()))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that the type system does not.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a zero link limit or zero mmap threshold.
    pub fn validate(&self) -> Result<()> {
        if self.linking.max_hard_links_per_file == Limit::Max(0) {
            return Err(LinkbackError::usage(
                "max_hard_links_per_file must be at least 1 or 'unlimited'",
            )
            .into());
        }
        if self.hashing.mmap_threshold == 0 {
            return Err(LinkbackError::usage("mmap_threshold must be greater than 0").into());
        }
        Ok(())
    }
}
