//! Web server availability control.
//!
//! Stopping the server hands out a [`ServiceOutage`] guard. The guard restarts the server when it
//! is [restored](ServiceOutage::restore) or, failing that, when it is dropped, so every path out
//! of the region that needs the port free brings the server back.

use std::{
    fmt,
    path::{Path, PathBuf},
    process::Command,
};

use eyre::WrapErr as _;

use crate::{
    error::{Error, Result},
    exec,
};

/// Operations the service manager is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Reload,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Reload => "reload",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A process supervisor able to start, stop and reload a named service.
pub trait ServiceManager {
    /// Performs `action` on `service`, returning once the manager reports completion.
    fn control(&self, action: ServiceAction, service: &str) -> eyre::Result<()>;

    /// The command an operator would use to do the same by hand.
    fn program(&self) -> &Path;
}

/// `systemctl <action> <service>`.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: PathBuf,
}

impl Systemctl {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Systemctl {
            program: program.into(),
        }
    }
}

impl ServiceManager for Systemctl {
    fn control(&self, action: ServiceAction, service: &str) -> eyre::Result<()> {
        exec::run(
            Command::new(&self.program)
                .arg(action.as_str())
                .arg(service),
        )
        .wrap_err_with(|| format!("systemctl {action} {service}"))?;

        Ok(())
    }

    fn program(&self) -> &Path {
        &self.program
    }
}

/// Start, stop and reload of one configured service, with failures mapped to
/// [`Error::Service`]. No call is retried.
pub struct ServiceController<'a> {
    manager: &'a dyn ServiceManager,
    service: &'a str,
}

impl<'a> ServiceController<'a> {
    pub fn new(manager: &'a dyn ServiceManager, service: &'a str) -> Self {
        ServiceController { manager, service }
    }

    /// Stops the service. The returned guard starts it again.
    pub fn stop(&self) -> Result<ServiceOutage<'_, 'a>> {
        log::info!("Stopping {}", self.service);
        self.control(ServiceAction::Stop)?;

        Ok(ServiceOutage {
            controller: self,
            restored: false,
        })
    }

    pub fn start(&self) -> Result<()> {
        log::info!("Starting {}", self.service);
        self.control(ServiceAction::Start)
    }

    pub fn reload(&self) -> Result<()> {
        log::info!("Reloading {}", self.service);
        self.control(ServiceAction::Reload)
    }

    fn control(&self, action: ServiceAction) -> Result<()> {
        self.manager
            .control(action, self.service)
            .map_err(|cause| Error::Service {
                action,
                service: self.service.to_owned(),
                manager: self.manager.program().to_path_buf(),
                cause,
            })
    }
}

impl fmt::Debug for ServiceController<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceController")
            .field("manager", &self.manager.program())
            .field("service", &self.service)
            .finish()
    }
}

/// The service is stopped for as long as this guard lives.
#[must_use = "dropping the guard restarts the service immediately"]
#[derive(Debug)]
pub struct ServiceOutage<'c, 'a> {
    controller: &'c ServiceController<'a>,
    restored: bool,
}

impl ServiceOutage<'_, '_> {
    /// Starts the service again, ending the outage.
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.controller.start()
    }
}

impl Drop for ServiceOutage<'_, '_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }

        log::warn!(
            "Outage of {} ended without restore, starting it",
            self.controller.service
        );

        if let Err(err) = self.controller.start() {
            log::error!("{err}");
            if let Some(hint) = err.remediation() {
                log::error!("{hint}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::RecordingServices;

    #[test]
    fn restore_starts_once() {
        let manager = RecordingServices::default();
        let controller = ServiceController::new(&manager, "nginx");

        let outage = controller.stop().unwrap();
        outage.restore().unwrap();

        assert_eq!(manager.actions(), [ServiceAction::Stop, ServiceAction::Start]);
    }

    #[test]
    fn dropped_guard_starts_service() {
        let manager = RecordingServices::default();
        let controller = ServiceController::new(&manager, "nginx");

        {
            let _outage = controller.stop().unwrap();
        }

        assert_eq!(manager.actions(), [ServiceAction::Stop, ServiceAction::Start]);
    }

    #[test]
    fn failed_stop_hands_out_no_guard() {
        let manager = RecordingServices::failing(ServiceAction::Stop);
        let controller = ServiceController::new(&manager, "nginx");

        let err = controller.stop().unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().starts_with("could not stop service nginx"), "{err}");

        assert_eq!(manager.actions(), [ServiceAction::Stop]);
    }

    #[test]
    fn failed_restore_is_reported_once() {
        let manager = RecordingServices::failing(ServiceAction::Start);
        let controller = ServiceController::new(&manager, "nginx");

        let err = controller.stop().unwrap().restore().unwrap_err();
        assert!(matches!(
            err,
            Error::Service {
                action: ServiceAction::Start,
                ..
            }
        ));

        assert_eq!(manager.actions(), [ServiceAction::Stop, ServiceAction::Start]);
    }

    #[test]
    fn reload_failure_has_its_own_status() {
        let manager = RecordingServices::failing(ServiceAction::Reload);
        let controller = ServiceController::new(&manager, "nginx");

        let err = controller.reload().unwrap_err();
        assert_eq!(err.exit_code(), 5);
        assert!(err.remediation().unwrap().contains("reload nginx"));
    }

    #[cfg(unix)]
    #[test]
    fn systemctl_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let script = crate::test::write_script(
            dir.path(),
            "systemctl",
            &format!(r#"echo "$@" >> "{}""#, log.display()),
        );

        let systemctl = Systemctl::new(script);
        systemctl.control(ServiceAction::Reload, "nginx").unwrap();
        systemctl.control(ServiceAction::Stop, "nginx").unwrap();

        let calls = std::fs::read_to_string(log).unwrap();
        assert_eq!(calls, "reload nginx\nstop nginx\n");
    }

    #[cfg(unix)]
    #[test]
    fn systemctl_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = crate::test::write_script(
            dir.path(),
            "systemctl",
            "echo 'Job for nginx.service failed' >&2; exit 1",
        );

        let err = Systemctl::new(script)
            .control(ServiceAction::Start, "nginx")
            .unwrap_err();

        let msg = format!("{err:#}");
        assert!(msg.starts_with("systemctl start nginx"), "{msg}");
        assert!(msg.ends_with("Job for nginx.service failed"), "{msg}");
    }
}
