use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Creates all missing parent directories of `path`.
///
/// # Errors
///
/// Returns an error if a parent directory cannot be created.
pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create parent directories for {}", path.display())
        })?;
    }
    Ok(())
}

/// Expands a leading `~` or `~/` to the home directory.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return dirs::home_dir().context("Could not find home directory");
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not find home directory")?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(path))
}
