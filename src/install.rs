//! Installation of issued certificate material.
//!
//! New files are first staged next to their canonical paths, so that the backup and replace steps
//! are plain renames within one directory. For each installed file the current version is renamed
//! into its backup slot before the new one is renamed into place; a failure between the two leaves
//! the previous version recoverable from the backup slot.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use eyre::WrapErr as _;
use time::OffsetDateTime;

use crate::{
    cert::{parse_pem_chain, CertificateInfo},
    config::{with_suffix, ChainMode, Config},
    error::{Error, Result},
    workspace::Workspace,
};

const STAGING_SUFFIX: &str = ".new";

/// What an installation changed.
#[derive(Debug, Clone)]
pub struct Installation {
    /// Installed leaf certificate.
    pub certificate: PathBuf,

    /// Installed chain file.
    pub chain: PathBuf,

    /// Backup slots written during this installation.
    pub backups: Vec<PathBuf>,

    /// The newly installed leaf certificate.
    pub leaf: CertificateInfo,
}

/// Validates the files in `issued_dir` and installs them at the configured paths.
pub fn install(config: &Config, issued_dir: &Path, workspace: &Workspace) -> Result<Installation> {
    let leaf_path = issued_dir.join(&config.issued_certificate);
    let intermediate_path = issued_dir.join(&config.issued_chain);

    let mut leaf = read_artifact("certificate", &leaf_path)?;
    let intermediate = read_artifact("intermediate certificate", &intermediate_path)?;

    // leaf comes first in the issued file
    let leaf_info = leaf.certs.swap_remove(0);

    let chain_path = workspace.path().join("chain.pem");
    build_chain(config, &intermediate.bytes, &chain_path).map_err(Error::Install)?;

    let pairs = [
        (leaf_path.as_path(), config.certificate.as_path()),
        (chain_path.as_path(), config.chain.as_path()),
    ];

    let mut staged = Vec::with_capacity(pairs.len());
    for (source, canonical) in pairs {
        match stage(source, canonical) {
            Ok(path) => staged.push(path),
            Err(cause) => {
                discard(&staged);
                return Err(Error::Install(cause));
            }
        }
    }

    let mut backups = Vec::new();
    for (idx, (_, canonical)) in pairs.iter().enumerate() {
        let backup_path = config.backup_path(canonical);

        let moved = backup(canonical, &backup_path)
            .and_then(|taken| replace(&staged[idx], canonical).map(|()| taken));

        match moved {
            Ok(taken) => backups.extend(taken),
            Err(cause) => {
                // files before `idx` are already in place
                discard(&staged[idx..]);
                return Err(Error::Install(cause));
            }
        }
    }

    log::info!(
        "Installed {} ({}) and {}",
        config.certificate.display(),
        leaf_info.subject(),
        config.chain.display()
    );
    log::info!("SHA-256 fingerprint {}", leaf_info.fingerprint());

    match leaf_info.valid_days_left(OffsetDateTime::now_utc()) {
        Ok(days) => log::info!("New certificate is valid for {days} days"),
        Err(err) => log::warn!("Could not determine certificate validity: {err:#}"),
    }

    Ok(Installation {
        certificate: config.certificate.clone(),
        chain: config.chain.clone(),
        backups,
        leaf: leaf_info,
    })
}

struct Artifact {
    bytes: Vec<u8>,
    certs: Vec<CertificateInfo>,
}

/// Reads an issued file and checks it holds at least one well-formed certificate.
fn read_artifact(what: &'static str, path: &Path) -> Result<Artifact> {
    let artifact_err = |cause: eyre::Report| Error::Artifact {
        what,
        path: path.to_path_buf(),
        cause,
    };

    let bytes = fs::read(path)
        .wrap_err("could not read file; the CA client may name its output differently")
        .map_err(artifact_err)?;

    let certs = parse_pem_chain(&bytes).map_err(artifact_err)?;
    log::debug!("{} holds {} certificate(s)", path.display(), certs.len());

    Ok(Artifact { bytes, certs })
}

/// Writes the chain file to `out` according to the configured [`ChainMode`].
fn build_chain(config: &Config, intermediate: &[u8], out: &Path) -> eyre::Result<()> {
    let mut chain = intermediate.to_vec();

    match config.chain_mode {
        ChainMode::Intermediate => {}

        ChainMode::IntermediateWithRoot => {
            let root = fs::read(&config.root_ca)
                .wrap_err_with(|| format!("read root CA {}", config.root_ca.display()))?;

            if !chain.ends_with(b"\n") {
                chain.push(b'\n');
            }
            chain.extend_from_slice(&root);
        }
    }

    fs::write(out, chain).wrap_err_with(|| format!("write chain {}", out.display()))
}

/// Copies `source` to `<canonical>.new`, taking over the current file's permissions.
fn stage(source: &Path, canonical: &Path) -> eyre::Result<PathBuf> {
    let staged = with_suffix(canonical, STAGING_SUFFIX);

    fs::copy(source, &staged)
        .wrap_err_with(|| format!("stage {} as {}", source.display(), staged.display()))?;

    match fs::metadata(canonical) {
        Ok(current) => copy_attributes(&current, &staged)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).wrap_err_with(|| format!("inspect {}", canonical.display()));
        }
    }

    Ok(staged)
}

#[cfg(unix)]
fn copy_attributes(current: &fs::Metadata, staged: &Path) -> eyre::Result<()> {
    use std::os::unix::fs::MetadataExt as _;

    fs::set_permissions(staged, current.permissions())
        .wrap_err_with(|| format!("set permissions of {}", staged.display()))?;

    if let Err(err) = std::os::unix::fs::chown(staged, Some(current.uid()), Some(current.gid())) {
        log::warn!("Could not set owner of {}: {err}", staged.display());
    }

    Ok(())
}

#[cfg(not(unix))]
fn copy_attributes(current: &fs::Metadata, staged: &Path) -> eyre::Result<()> {
    fs::set_permissions(staged, current.permissions())
        .wrap_err_with(|| format!("set permissions of {}", staged.display()))
}

/// Removes staged files that will not be moved into place.
fn discard(staged: &[PathBuf]) {
    for path in staged {
        match fs::remove_file(path) {
            Ok(()) => log::debug!("Removed staged {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("Could not remove staged {}: {err}", path.display()),
        }
    }
}

/// Renames `canonical` into `backup_path`, replacing any older backup.
///
/// Returns `None` when nothing is installed at `canonical` yet.
fn backup(canonical: &Path, backup_path: &Path) -> eyre::Result<Option<PathBuf>> {
    match fs::rename(canonical, backup_path) {
        Ok(()) => {
            log::debug!("Backed up {} to {}", canonical.display(), backup_path.display());
            Ok(Some(backup_path.to_path_buf()))
        }

        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::info!("Nothing installed at {}, no backup taken", canonical.display());
            Ok(None)
        }

        Err(err) => Err(err).wrap_err_with(|| {
            format!(
                "back up {} to {}",
                canonical.display(),
                backup_path.display()
            )
        }),
    }
}

/// Renames the staged file into its canonical path.
fn replace(staged: &Path, canonical: &Path) -> eyre::Result<()> {
    fs::rename(staged, canonical).wrap_err_with(|| {
        format!(
            "move {} into place at {}",
            staged.display(),
            canonical.display()
        )
    })
}
