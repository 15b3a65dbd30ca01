//! Deployment configuration.
//!
//! The configuration is a JSON document loaded once at start-up. Every component receives the
//! resulting [`Config`] by reference; nothing in it changes during a run.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use eyre::{bail, ensure, WrapErr as _};
use serde::Deserialize;

/// Location read when neither `--config` nor `ACME_RENEW_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/acme-renew/config.json";

/// Everything a renewal run needs to know about the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The ACME client binary (certbot compatible).
    #[serde(default = "default_ca_client")]
    pub ca_client: PathBuf,

    /// Extra arguments appended to every issuance call.
    #[serde(default = "default_ca_client_args")]
    pub ca_client_args: Vec<String>,

    /// Which backend produces the signing request.
    #[serde(default)]
    pub toolkit: Toolkit,

    /// The OpenSSL binary, used when `toolkit` is `openssl`.
    #[serde(default = "default_openssl")]
    pub openssl: PathBuf,

    /// The service manager binary (systemctl compatible).
    #[serde(default = "default_service_manager")]
    pub service_manager: PathBuf,

    /// Unit name of the web server.
    pub service: String,

    /// Root CA certificate, appended to the chain in [`ChainMode::IntermediateWithRoot`].
    pub root_ca: PathBuf,

    /// Installed leaf certificate.
    pub certificate: PathBuf,

    /// Installed chain file.
    pub chain: PathBuf,

    /// The server's existing private key. Never rewritten.
    pub key: PathBuf,

    /// Subject distinguished name, e.g. `/O=Example/CN=example.org`.
    pub subject: Subject,

    /// Alternate DNS names, in the order they appear in the request.
    pub dns_names: Vec<String>,

    #[serde(default)]
    pub chain_mode: ChainMode,

    /// File name the CA client gives the issued leaf certificate.
    #[serde(default = "default_issued_certificate")]
    pub issued_certificate: PathBuf,

    /// File name the CA client gives the issued intermediate certificate.
    #[serde(default = "default_issued_chain")]
    pub issued_chain: PathBuf,

    /// Appended to an installed file's name to form its backup slot.
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,
}

fn default_ca_client() -> PathBuf {
    PathBuf::from("/usr/bin/certbot")
}

fn default_ca_client_args() -> Vec<String> {
    vec!["--agree-tos".to_owned(), "--non-interactive".to_owned()]
}

fn default_openssl() -> PathBuf {
    PathBuf::from("/usr/bin/openssl")
}

fn default_service_manager() -> PathBuf {
    PathBuf::from("/bin/systemctl")
}

fn default_issued_certificate() -> PathBuf {
    PathBuf::from("0000_cert.pem")
}

fn default_issued_chain() -> PathBuf {
    PathBuf::from("0000_chain.pem")
}

fn default_backup_suffix() -> String {
    ".old".to_owned()
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn load(path: &Path) -> eyre::Result<Config> {
        let raw = fs::read_to_string(path)
            .wrap_err_with(|| format!("could not read configuration {}", path.display()))?;

        raw.parse::<Config>()
            .wrap_err_with(|| format!("invalid configuration {}", path.display()))
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> eyre::Result<()> {
        ensure!(!self.service.trim().is_empty(), "service name is empty");
        ensure!(!self.dns_names.is_empty(), "at least one DNS name is required");

        for name in &self.dns_names {
            validate_dns_name(name)?;
        }

        ensure!(!self.backup_suffix.is_empty(), "backup suffix is empty");

        for (field, name) in [
            ("issued_certificate", &self.issued_certificate),
            ("issued_chain", &self.issued_chain),
        ] {
            ensure!(
                name.is_relative() && name.file_name().is_some(),
                "{field} must be a relative file name, got {}",
                name.display()
            );
        }

        Ok(())
    }

    /// Backup slot for an installed file.
    pub fn backup_path(&self, installed: &Path) -> PathBuf {
        with_suffix(installed, &self.backup_suffix)
    }
}

impl FromStr for Config {
    type Err = eyre::Error;

    fn from_str(raw: &str) -> eyre::Result<Self> {
        let config = serde_json::from_str::<Config>(raw)?;
        config.validate()?;
        Ok(config)
    }
}

/// Appends `suffix` to the final component of `path`.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn validate_dns_name(name: &str) -> eyre::Result<()> {
    ensure!(!name.is_empty(), "empty DNS name");

    if let Some(bad) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || matches!(c, ',' | '"' | '\\'))
    {
        bail!("DNS name {name:?} contains invalid character {bad:?}");
    }

    Ok(())
}

/// Backend producing the signing request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Toolkit {
    /// Invoke `openssl req` with a generated configuration document.
    #[default]
    Openssl,

    /// Build and sign the request in process. Requires a PKCS#8 P-256 key.
    Native,
}

/// How the installed chain file is produced from the issued material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainMode {
    /// The intermediate certificate as issued.
    #[default]
    Intermediate,

    /// The intermediate certificate followed by the configured root CA.
    IntermediateWithRoot,
}

/// A distinguished name written in OpenSSL's slash form, `/C=DE/O=Example/CN=example.org`.
///
/// Components are kept in the order written, most significant first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Subject {
    components: Vec<(String, String)>,
}

impl Subject {
    /// `(attribute, value)` pairs, most significant first.
    pub fn components(&self) -> &[(String, String)] {
        &self.components
    }

    /// RFC 4514 string form, as accepted by [`x509_cert::name::Name`]'s parser.
    pub fn to_rfc4514(&self) -> String {
        self.components
            .iter()
            .rev()
            .map(|(attr, value)| format!("{attr}={}", escape_rfc4514(value)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn escape_rfc4514(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());

    for (idx, c) in value.chars().enumerate() {
        let edge = (idx == 0 && matches!(c, ' ' | '#')) || (idx == last && c == ' ');

        if edge || matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

impl FromStr for Subject {
    type Err = eyre::Error;

    fn from_str(raw: &str) -> eyre::Result<Self> {
        let Some(rest) = raw.strip_prefix('/') else {
            bail!("subject {raw:?} must start with '/'");
        };

        let mut components = Vec::new();

        for part in rest.split('/').filter(|part| !part.is_empty()) {
            let Some((attr, value)) = part.split_once('=') else {
                bail!("subject component {part:?} is not KEY=VALUE");
            };

            let attr = attr.trim();
            ensure!(
                !attr.is_empty() && attr.chars().all(|c| c.is_ascii_alphanumeric()),
                "subject attribute {attr:?} is invalid"
            );
            ensure!(
                !value.is_empty() && !value.chars().any(|c| c.is_control()),
                "subject value for {attr} is invalid"
            );

            components.push((attr.to_owned(), value.to_owned()));
        }

        ensure!(!components.is_empty(), "subject {raw:?} has no components");

        Ok(Subject { components })
    }
}

impl TryFrom<String> for Subject {
    type Error = eyre::Error;

    fn try_from(raw: String) -> eyre::Result<Self> {
        raw.parse()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (attr, value) in &self.components {
            write!(f, "/{attr}={value}")?;
        }
        Ok(())
    }
}
