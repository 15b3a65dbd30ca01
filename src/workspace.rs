//! Per-run scratch directory.

use std::{
    io,
    path::{Path, PathBuf},
};

use eyre::WrapErr as _;
use tempfile::TempDir;

const PREFIX: &str = "acme-renew.";

/// An owner-only temporary directory holding one run's request, configuration and issued files.
///
/// [`Workspace::close()`] removes it, warning when removal fails. Dropping it without closing
/// still attempts removal, silently.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Creates a uniquely named directory under `parent`.
    pub fn create_in(parent: impl AsRef<Path>) -> eyre::Result<Workspace> {
        let parent = parent.as_ref();

        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(parent)
            .wrap_err_with(|| format!("create temporary directory in {}", parent.display()))?;

        restrict_to_owner(dir.path())?;

        log::debug!("Workspace at {}", dir.path().display());
        Ok(Workspace { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Signing request configuration document.
    pub fn request_config(&self) -> PathBuf {
        self.path().join("request.cnf")
    }

    /// The signing request.
    pub fn request(&self) -> PathBuf {
        self.path().join("request.csr")
    }

    /// Working directory handed to the CA client.
    pub fn issued_dir(&self) -> PathBuf {
        self.path().join("issued")
    }

    /// Removes the directory and everything in it.
    ///
    /// Failure is logged as a warning and otherwise ignored; the served certificate does not
    /// depend on it.
    pub fn close(self) {
        let path = self.path().to_path_buf();

        match self.dir.close() {
            Ok(()) => log::debug!("Removed workspace {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("Workspace {} was already removed", path.display());
            }
            Err(err) => log::warn!(
                "Could not remove workspace {} ({err}); inspect it manually, \
                 it may contain sensitive key material",
                path.display()
            ),
        }
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> eyre::Result<()> {
    use std::{fs, os::unix::fs::PermissionsExt as _};

    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .wrap_err_with(|| format!("restrict permissions of {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> eyre::Result<()> {
    Ok(())
}
