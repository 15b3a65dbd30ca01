use std::path::PathBuf;

use crate::service::ServiceAction;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can end a renewal run early.
///
/// Each variant maps to a fixed process exit status, see [`Error::exit_code()`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad command line.
    #[error("invalid arguments: {0}")]
    Usage(String),

    /// Configuration missing, unreadable or invalid.
    #[error("{0:#}")]
    Config(eyre::Report),

    /// A required binary or file is missing or unusable.
    #[error("{what} {path} is {problem}", path = .path.display())]
    Dependency {
        what: &'static str,
        path: PathBuf,
        problem: String,
    },

    /// The workspace could not be created.
    #[error("could not create workspace: {0:#}")]
    Workspace(eyre::Report),

    /// The signing request could not be produced.
    #[error("could not generate signing request: {0:#}")]
    Request(eyre::Report),

    /// A service manager call failed.
    #[error("could not {action} service {service}: {cause:#}")]
    Service {
        action: ServiceAction,
        service: String,
        manager: PathBuf,
        cause: eyre::Report,
    },

    /// The CA client failed to issue a certificate.
    #[error("certificate issuance failed: {0:#}")]
    Issuance(eyre::Report),

    /// Issued files are missing, unreadable or not certificates.
    #[error("issued {what} {path} is unusable: {cause:#}", path = .path.display())]
    Artifact {
        what: &'static str,
        path: PathBuf,
        cause: eyre::Report,
    },

    /// A staging, backup or replace step failed during installation.
    #[error("installation failed: {0:#}")]
    Install(eyre::Report),
}

impl Error {
    pub(crate) fn dependency(
        what: &'static str,
        path: impl Into<PathBuf>,
        problem: impl Into<String>,
    ) -> Self {
        Error::Dependency {
            what,
            path: path.into(),
            problem: problem.into(),
        }
    }

    /// Process exit status for this error.
    ///
    /// | Status | Meaning |
    /// |---|---|
    /// | 1 | invalid invocation arguments |
    /// | 2 | configuration or preflight failure |
    /// | 3 | signing request, stop or start failure |
    /// | 4 | issuance, artifact or installation failure |
    /// | 5 | reload failure after successful installation |
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Usage(_) => 1,
            Error::Config(_) | Error::Dependency { .. } => 2,
            Error::Workspace(_) | Error::Request(_) => 3,
            Error::Service { action, .. } => match action {
                ServiceAction::Stop | ServiceAction::Start => 3,
                ServiceAction::Reload => 5,
            },
            Error::Issuance(_) | Error::Artifact { .. } | Error::Install(_) => 4,
        }
    }

    /// Guidance for the operator when manual action is needed to recover.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Error::Service {
                action,
                service,
                manager,
                ..
            } => {
                let manager = manager.display();

                Some(match action {
                    ServiceAction::Stop => format!(
                        "the installed certificate is unchanged; check {service} with \
                         `{manager} status {service}` and start it if it is down"
                    ),
                    ServiceAction::Start => format!(
                        "{service} is DOWN; start it manually with `{manager} start {service}`"
                    ),
                    ServiceAction::Reload => format!(
                        "the new certificate is installed but not loaded; run \
                         `{manager} reload {service}` or `{manager} restart {service}`"
                    ),
                })
            }

            Error::Install(_) => Some(
                "previously installed files are kept in their backup slots; \
                 move them back into place if a canonical file is missing"
                    .to_owned(),
            ),

            _ => None,
        }
    }
}
