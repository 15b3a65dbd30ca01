//! Certificate issuance while the web server is offline.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use eyre::WrapErr as _;

use crate::{
    error::{Error, Result},
    exec,
    service::ServiceController,
    workspace::Workspace,
};

/// An ACME client that can turn a signing request into a certificate.
pub trait CertificateAuthority {
    /// Obtains a certificate for the PEM signing request at `request`.
    ///
    /// Issued files are written somewhere inside `output_dir`; their names are up to the client.
    /// Domain validation binds the challenge port itself, so nothing else may be listening.
    fn issue(&self, request: &Path, output_dir: &Path) -> eyre::Result<()>;
}

/// `certbot certonly --standalone --csr <request>`, run inside the output directory.
#[derive(Debug, Clone)]
pub struct Certbot {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl Certbot {
    pub fn new(program: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Certbot {
            program: program.into(),
            extra_args,
        }
    }
}

impl CertificateAuthority for Certbot {
    fn issue(&self, request: &Path, output_dir: &Path) -> eyre::Result<()> {
        exec::run(
            Command::new(&self.program)
                .current_dir(output_dir)
                .arg("certonly")
                .arg("--standalone")
                .arg("--csr")
                .arg(request)
                .args(&self.extra_args),
        )
        .wrap_err("certbot certonly")?;

        Ok(())
    }
}

/// Stops the service, runs `authority` against `request` and starts the service again.
///
/// The service is started whether or not issuance succeeded. Returns the directory holding the
/// issued files. When both issuance and the restart fail, the issuance error is logged and the
/// restart error returned, since a stopped service is the more urgent problem.
pub fn issue(
    authority: &dyn CertificateAuthority,
    services: &ServiceController<'_>,
    request: &Path,
    workspace: &Workspace,
) -> Result<PathBuf> {
    let output_dir = workspace.issued_dir();

    fs::create_dir(&output_dir)
        .wrap_err_with(|| format!("create {}", output_dir.display()))
        .map_err(Error::Workspace)?;

    let outage = services.stop()?;

    log::info!("Requesting certificate");
    let issued = authority.issue(request, &output_dir);

    match (issued, outage.restore()) {
        (Ok(()), Ok(())) => {
            log::info!("Certificate issued");
            Ok(output_dir)
        }

        (Err(cause), Ok(())) => Err(Error::Issuance(cause)),

        (Ok(()), Err(err)) => Err(err),

        (Err(cause), Err(err)) => {
            log::error!("{}", Error::Issuance(cause));
            Err(err)
        }
    }
}
