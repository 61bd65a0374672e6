//! Platform hard-link creation.
//!
//! The engine only sees the [`Linker`] trait; [`platform_linker`] picks the
//! implementation for the running OS once at startup.

use anyhow::Result;
use std::io;
use std::path::Path;

/// Creates hard links between files on the same volume.
pub trait Linker: Send + Sync {
    /// Create `new_path` as another name for the data at `existing_path`.
    ///
    /// # Errors
    ///
    /// Fails if the paths are on different volumes, the filesystem does not
    /// support hard links, or permission is denied. Failures are not retried.
    fn create_hard_link(&self, new_path: &Path, existing_path: &Path) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Hard links through the POSIX `link(2)` call.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixLinker;

impl Linker for PosixLinker {
    fn create_hard_link(&self, new_path: &Path, existing_path: &Path) -> Result<()> {
        std::fs::hard_link(existing_path, new_path)
            .map_err(|e| link_error(new_path, existing_path, &e))
    }

    fn name(&self) -> &'static str {
        "posix"
    }
}

/// Hard links through `CreateHardLinkW`, with `\\?\` prefixed paths so long
/// names are accepted.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsLinker;

#[cfg(windows)]
impl WindowsLinker {
    fn wide_long_path(path: &Path) -> Result<Vec<u16>> {
        use std::os::windows::ffi::OsStrExt;

        let absolute = std::path::absolute(path)?;
        let raw = absolute.as_os_str();
        let mut wide: Vec<u16> = if raw.to_string_lossy().starts_with(r"\\?\") {
            raw.encode_wide().collect()
        } else {
            std::ffi::OsStr::new(r"\\?\")
                .encode_wide()
                .chain(raw.encode_wide())
                .collect()
        };
        wide.push(0);
        Ok(wide)
    }
}

#[cfg(windows)]
impl Linker for WindowsLinker {
    fn create_hard_link(&self, new_path: &Path, existing_path: &Path) -> Result<()> {
        use std::ptr;
        use winapi::um::winbase::CreateHardLinkW;

        let new_wide = Self::wide_long_path(new_path)?;
        let existing_wide = Self::wide_long_path(existing_path)?;

        let ok = unsafe { CreateHardLinkW(new_wide.as_ptr(), existing_wide.as_ptr(), ptr::null_mut()) };
        if ok == 0 {
            let e = io::Error::last_os_error();
            return Err(link_error(new_path, existing_path, &e));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "windows"
    }
}

fn link_error(new_path: &Path, existing_path: &Path, e: &io::Error) -> anyhow::Error {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EXDEV) {
        return anyhow::anyhow!(
            "Cannot hard-link {} to {}: different filesystems",
            new_path.display(),
            existing_path.display()
        );
    }
    anyhow::anyhow!(
        "Cannot hard-link {} to {}: {e}",
        new_path.display(),
        existing_path.display()
    )
}

/// The linker for the operating system this binary runs on.
#[must_use]
pub fn platform_linker() -> Box<dyn Linker> {
    #[cfg(windows)]
    {
        Box::new(WindowsLinker)
    }
    #[cfg(not(windows))]
    {
        Box::new(PosixLinker)
    }
}
