//! The renewal workflow.
//!
//! preflight → workspace → signing request → stop → issue → start → install → reload, with the
//! workspace removed on every path out.

use std::path::PathBuf;

use crate::{
    cert::Native,
    config::{Config, Toolkit},
    error::{Error, Result},
    install::{self, Installation},
    issue::{self, CertificateAuthority, Certbot},
    preflight,
    request::{self, OpenSsl, SigningToolkit},
    service::{ServiceController, ServiceManager, Systemctl},
    workspace::Workspace,
};

/// One renewal run over a set of collaborators.
pub struct Renewal<'a> {
    config: &'a Config,
    toolkit: &'a dyn SigningToolkit,
    authority: &'a dyn CertificateAuthority,
    services: &'a dyn ServiceManager,
    workspace_parent: PathBuf,
}

impl<'a> Renewal<'a> {
    pub fn new(
        config: &'a Config,
        toolkit: &'a dyn SigningToolkit,
        authority: &'a dyn CertificateAuthority,
        services: &'a dyn ServiceManager,
    ) -> Self {
        Renewal {
            config,
            toolkit,
            authority,
            services,
            workspace_parent: std::env::temp_dir(),
        }
    }

    /// Creates the workspace under `parent` instead of the system temporary directory.
    pub fn workspace_in(mut self, parent: impl Into<PathBuf>) -> Self {
        self.workspace_parent = parent.into();
        self
    }

    /// Runs the whole workflow.
    ///
    /// Nothing is touched when preflight checks fail. Once the service has been stopped it is
    /// always started again before this returns.
    pub fn run(&self) -> Result<Installation> {
        preflight::check(self.config)?;

        let workspace = Workspace::create_in(&self.workspace_parent).map_err(Error::Workspace)?;
        let res = self.renew(&workspace);
        workspace.close();

        res
    }

    fn renew(&self, workspace: &Workspace) -> Result<Installation> {
        let services = ServiceController::new(self.services, &self.config.service);

        let request = request::build(self.config, self.toolkit, workspace)?;
        let issued_dir = issue::issue(self.authority, &services, &request, workspace)?;
        let installation = install::install(self.config, &issued_dir, workspace)?;

        services.reload()?;

        Ok(installation)
    }
}

/// Runs the workflow with the collaborators named in `config`: OpenSSL or the native signer,
/// certbot and systemctl.
pub fn renew(config: &Config) -> Result<Installation> {
    let openssl;
    let native;
    let toolkit: &dyn SigningToolkit = match config.toolkit {
        Toolkit::Openssl => {
            openssl = OpenSsl::new(&config.openssl);
            &openssl
        }
        Toolkit::Native => {
            native = Native;
            &native
        }
    };

    let authority = Certbot::new(&config.ca_client, config.ca_client_args.clone());
    let services = Systemctl::new(&config.service_manager);

    Renewal::new(config, toolkit, &authority, &services).run()
}
