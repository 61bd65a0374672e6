//! Error taxonomy for a backup run.
//!
//! Only fatal conditions live here. Per-item problems (unreadable files,
//! failed links) never become errors; the engine turns them into warnings
//! at the item boundary. Stale index records are not errors either, they
//! are pruned during lookup.

use std::fmt;

/// Fatal errors that unwind to the run boundary.
///
/// Carried inside [`anyhow::Error`]; callers recover the category with
/// `downcast_ref::<LinkbackError>()`.
#[derive(Debug)]
pub enum LinkbackError {
    /// Invalid command line, sources file, or configuration file
    Usage(String),
    /// A required directory could not be created or accessed
    Path(String),
    /// The dedup index could not be opened, read, or written
    Index(String),
}

impl LinkbackError {
    /// Build a usage error from any displayable message.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Build a path error from any displayable message.
    pub fn path(message: impl Into<String>) -> Self {
        Self::Path(message.into())
    }

    /// Build an index error from any displayable message.
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index(message.into())
    }

    /// Process exit code for this category.
    ///
    /// Usage errors map to `EX_USAGE` (64); everything else is a general failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => crate::EXIT_USAGE,
            Self::Path(_) | Self::Index(_) => crate::EXIT_FAILURE,
        }
    }

    /// Whether the user should be shown the usage text alongside the message.
    #[must_use]
    pub const fn wants_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

impl fmt::Display for LinkbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "{msg}"),
            Self::Path(msg) => write!(f, "Path error: {msg}"),
            Self::Index(msg) => write!(f, "Index error: {msg}"),
        }
    }
}

impl std::error::Error for LinkbackError {}

/// Exit code for an arbitrary error chain returned from a run.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<LinkbackError>())
        .map_or(crate::EXIT_FAILURE, LinkbackError::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes() {
        assert_eq!(LinkbackError::usage("bad flag").exit_code(), 64);
        assert_eq!(LinkbackError::path("no dir").exit_code(), 1);
        assert_eq!(LinkbackError::index("locked").exit_code(), 1);
    }

    #[test]
    fn test_exit_code_survives_context() {
        let err = Err::<(), _>(LinkbackError::usage("missing destination"))
            .context("while parsing arguments")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), 64);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&plain), 1);
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(
            LinkbackError::path("/x unwritable").to_string(),
            "Path error: /x unwritable"
        );
        assert_eq!(LinkbackError::usage("oops").to_string(), "oops");
    }
}
