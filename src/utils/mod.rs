//! Utility functions and helpers.
//!
//! - [`paths`]: tilde expansion and directory creation
//! - [`serialization`]: bincode encoding for the index files
//! - size and duration formatting for the run summary

/// Path manipulation and resolution utilities
pub mod paths;
/// Binary serialization utilities
pub mod serialization;

use std::time::Duration;

pub use paths::{ensure_parent_dirs, expand_tilde};

/// Formats a file size in bytes into a human-readable string with appropriate units.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut scaled = size as f64;
    let mut unit_index = 0;

    while scaled >= 1024.0 && unit_index < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{size} {}", UNITS[0])
    } else {
        format!("{scaled:.2} {}", UNITS[unit_index])
    }
}

/// Formats an elapsed run time, dropping sub-millisecond noise.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    humantime::format_duration(Duration::from_millis(millis)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.00 GB");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1s 500ms");
        assert_eq!(format_elapsed(Duration::from_micros(2_000_400)), "2s");
        assert_eq!(format_elapsed(Duration::ZERO), "0s");
    }
}
