//! Checks run before anything is stopped or rewritten.

use std::{fs, io, path::Path};

use crate::{
    config::{Config, Toolkit},
    error::{Error, Result},
};

/// Verifies every external binary and file the run depends on.
///
/// Has no side effects beyond logging. The first failing check is returned.
pub fn check(config: &Config) -> Result<()> {
    check_executable("CA client", &config.ca_client)?;
    check_executable("service manager", &config.service_manager)?;

    if config.toolkit == Toolkit::Openssl {
        check_executable("OpenSSL", &config.openssl)?;
    }

    check_readable("private key", &config.key)?;
    check_readable("root CA certificate", &config.root_ca)?;

    log::info!("Preflight checks passed");
    Ok(())
}

fn check_executable(what: &'static str, path: &Path) -> Result<()> {
    let meta = metadata(what, path)?;

    if !meta.is_file() {
        return Err(Error::dependency(what, path, "not a regular file"));
    }

    if !is_executable(&meta) {
        return Err(Error::dependency(what, path, "not executable"));
    }

    log::debug!("Found {what} at {}", path.display());
    Ok(())
}

fn check_readable(what: &'static str, path: &Path) -> Result<()> {
    let meta = metadata(what, path)?;

    if !meta.is_file() {
        return Err(Error::dependency(what, path, "not a regular file"));
    }

    // opening is the only reliable readability test for the current user
    fs::File::open(path)
        .map_err(|err| Error::dependency(what, path, format!("not readable ({err})")))?;

    log::debug!("Found {what} at {}", path.display());
    Ok(())
}

fn metadata(what: &'static str, path: &Path) -> Result<fs::Metadata> {
    fs::metadata(path).map_err(|err| {
        let problem = match err.kind() {
            io::ErrorKind::NotFound => "missing".to_owned(),
            _ => format!("inaccessible ({err})"),
        };
        Error::dependency(what, path, problem)
    })
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::Deployment;

    #[test]
    fn complete_deployment_passes() {
        let deployment = Deployment::new();
        check(&deployment.config).unwrap();
    }

    #[test]
    fn missing_ca_client() {
        let mut deployment = Deployment::new();
        deployment.config.ca_client = deployment.root().join("no-such-certbot");

        let err = check(&deployment.config).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().starts_with("CA client"), "{err}");
        assert!(err.to_string().ends_with("is missing"), "{err}");
    }

    #[test]
    fn ca_client_not_executable() {
        let deployment = Deployment::new();
        let mut config = deployment.config.clone();
        config.ca_client = config.key.clone();

        let err = check(&config).unwrap_err();
        assert!(err.to_string().ends_with("is not executable"), "{err}");
    }

    #[test]
    fn missing_key() {
        let deployment = Deployment::new();
        fs::remove_file(&deployment.config.key).unwrap();

        let err = check(&deployment.config).unwrap_err();
        assert!(err.to_string().starts_with("private key"), "{err}");
    }

    #[test]
    fn root_ca_is_a_directory() {
        let mut deployment = Deployment::new();
        deployment.config.root_ca = deployment.root().to_path_buf();

        let err = check(&deployment.config).unwrap_err();
        assert!(err.to_string().starts_with("root CA certificate"), "{err}");
        assert!(err.to_string().ends_with("not a regular file"), "{err}");
    }

    #[test]
    fn openssl_only_required_for_openssl_toolkit() {
        let mut deployment = Deployment::new();
        deployment.config.openssl = deployment.root().join("no-such-openssl");

        assert!(check(&deployment.config).is_err());

        deployment.config.toolkit = Toolkit::Native;
        check(&deployment.config).unwrap();
    }
}
