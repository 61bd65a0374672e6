//! Command-line interface definitions for linkback.
//!
//! The definitions are shared between the main binary and the xtask man-page
//! generator, so they live in the library.
//!
//! Field-level documentation doubles as clap help text.

#![allow(missing_docs)]

use crate::RunContext;
use crate::config::sources::load_sources_file;
use crate::config::{Config, Limit};
use crate::error::LinkbackError;
use crate::scanner::SourceSpec;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Main CLI structure for linkback.
#[derive(Parser, Debug)]
#[command(
    name = "linkback",
    version = crate::VERSION,
    about = "Snapshot backups that hard-link unchanged files",
    long_about = "Copies each source into a new timestamped directory under DESTINATION. \
                  Files whose content was already backed up recently are hard-linked to \
                  the earlier copy instead of being copied again."
)]
pub struct Cli {
    /// How many backed-up files may share one physical copy
    #[arg(
        long = "max-hard-links-per-file",
        visible_alias = "ml",
        value_name = "N|unlimited"
    )]
    pub max_hard_links_per_file: Option<Limit>,

    /// Only link to copies made within this many days
    #[arg(
        long = "max-hard-link-age",
        visible_alias = "ma",
        value_name = "DAYS|unlimited"
    )]
    pub max_hard_link_age: Option<Limit>,

    /// File listing source paths, each followed by +/-/! regex rules
    #[arg(long, visible_alias = "sf", value_name = "FILE")]
    pub sources_file: Option<PathBuf>,

    /// Configuration file (default: ~/.config/linkback/config.toml)
    #[arg(long, env = "LINKBACK_CONFIG_PATH", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Source paths followed by the destination directory
    #[arg(value_name = "PATH", required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,
}

impl Cli {
    /// Default `tracing` filter for the chosen verbosity.
    #[must_use]
    pub const fn log_directive(&self) -> &'static str {
        if self.verbose {
            "linkback=debug"
        } else if self.quiet {
            "error"
        } else {
            "linkback=warn"
        }
    }

    /// Configuration file to read, if any.
    #[must_use]
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Config::default_path)
    }

    /// Combine configuration and flags into the run policy.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a zero link limit.
    pub fn run_context(&self, config: &Config) -> Result<RunContext> {
        if self.max_hard_links_per_file == Some(Limit::Max(0)) {
            return Err(LinkbackError::usage(
                "--max-hard-links-per-file must be at least 1 or 'unlimited'",
            )
            .into());
        }

        let mut context = RunContext::from_config(config);
        if let Some(limit) = self.max_hard_links_per_file {
            context.max_hard_links_per_file = limit.as_option();
        }
        if let Some(limit) = self.max_hard_link_age {
            context.max_hard_link_age_days = limit.as_option();
        }
        Ok(context)
    }

    /// The destination (last positional) and all sources: positional ones
    /// first, then those from the sources file.
    ///
    /// # Errors
    ///
    /// Returns a usage error if there is no source or the sources file is
    /// unreadable or malformed.
    pub fn sources_and_destination(&self) -> Result<(Vec<SourceSpec>, PathBuf)> {
        let Some((destination, positional)) = self.paths.split_last() else {
            return Err(LinkbackError::usage("Missing destination path").into());
        };

        let mut sources: Vec<SourceSpec> = positional.iter().map(SourceSpec::new).collect();
        if let Some(file) = &self.sources_file {
            sources.extend(load_sources_file(file)?);
        }

        if sources.is_empty() {
            return Err(LinkbackError::usage(
                "No sources given: pass source paths before the destination or use --sources-file",
            )
            .into());
        }

        Ok((sources, destination.clone()))
    }
}
