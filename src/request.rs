//! Signing request construction.
//!
//! A configuration document (subject distinguished name plus a subjectAltName extension listing
//! every DNS name) is written to the workspace, then a [`SigningToolkit`] turns it into a
//! signing request bound to the server's existing private key.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use eyre::{ensure, WrapErr as _};

use crate::{
    config::{Config, Subject},
    error::{Error, Result},
    exec,
    workspace::Workspace,
};

/// Inputs to one signing request.
#[derive(Debug, Clone, Copy)]
pub struct SigningRequest<'a> {
    /// Configuration document produced by [`render_config()`].
    pub config: &'a Path,
    pub subject: &'a Subject,
    pub dns_names: &'a [String],
    /// Existing private key the request is bound to.
    pub key: &'a Path,
}

/// Something that can produce a PEM signing request.
pub trait SigningToolkit {
    /// Writes a PEM encoded signing request for `request` to `out`.
    fn generate_signing_request(&self, request: &SigningRequest<'_>, out: &Path)
        -> eyre::Result<()>;
}

/// `openssl req` driven by the rendered configuration document.
#[derive(Debug, Clone)]
pub struct OpenSsl {
    program: PathBuf,
}

impl OpenSsl {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        OpenSsl {
            program: program.into(),
        }
    }
}

impl SigningToolkit for OpenSsl {
    fn generate_signing_request(
        &self,
        request: &SigningRequest<'_>,
        out: &Path,
    ) -> eyre::Result<()> {
        exec::run(
            Command::new(&self.program)
                .arg("req")
                .arg("-new")
                .arg("-sha256")
                .arg("-config")
                .arg(request.config)
                .arg("-key")
                .arg(request.key)
                .arg("-out")
                .arg(out),
        )
        .wrap_err("openssl req")?;

        Ok(())
    }
}

const REQ_SECTION: &str = "req";
const SUBJECT_SECTION: &str = "subject";
const EXTENSIONS_SECTION: &str = "san_extension";
const ALT_NAMES_SECTION: &str = "alt_names";

/// Renders the OpenSSL `req` configuration for `subject` and `dns_names`.
///
/// DNS names are listed as `DNS.1`, `DNS.2`, ... in the order given.
pub fn render_config(subject: &Subject, dns_names: &[String]) -> String {
    let mut lines = vec![
        format!("[ {REQ_SECTION} ]"),
        "prompt = no".to_owned(),
        "utf8 = yes".to_owned(),
        "string_mask = utf8only".to_owned(),
        format!("distinguished_name = {SUBJECT_SECTION}"),
        format!("req_extensions = {EXTENSIONS_SECTION}"),
        String::new(),
        format!("[ {SUBJECT_SECTION} ]"),
    ];

    let mut seen = HashMap::<&str, usize>::new();
    for (attr, value) in subject.components() {
        // repeated attributes need distinct keys, e.g. `0.OU`, `1.OU`
        let count = seen.entry(attr.as_str()).or_default();
        let value = escape_value(value);
        lines.push(match *count {
            0 => format!("{attr} = {value}"),
            n => format!("{n}.{attr} = {value}"),
        });
        *count += 1;
    }

    lines.extend([
        String::new(),
        format!("[ {EXTENSIONS_SECTION} ]"),
        format!("subjectAltName = @{ALT_NAMES_SECTION}"),
        String::new(),
        format!("[ {ALT_NAMES_SECTION} ]"),
    ]);
    lines.extend(
        dns_names
            .iter()
            .enumerate()
            .map(|(idx, name)| format!("DNS.{} = {}", idx + 1, escape_value(name))),
    );

    let mut doc = lines.join("\n");
    doc.push('\n');
    doc
}

fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        if matches!(c, '\\' | '$' | '#' | '"' | '\'') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

/// Writes the configuration document and has `toolkit` produce the signing request.
///
/// Returns the path of the request inside `workspace`.
pub fn build(
    config: &Config,
    toolkit: &dyn SigningToolkit,
    workspace: &Workspace,
) -> Result<PathBuf> {
    let config_path = workspace.request_config();
    let out = workspace.request();

    fs::write(&config_path, render_config(&config.subject, &config.dns_names))
        .wrap_err_with(|| format!("write {}", config_path.display()))
        .map_err(Error::Request)?;

    let request = SigningRequest {
        config: &config_path,
        subject: &config.subject,
        dns_names: &config.dns_names,
        key: &config.key,
    };

    log::info!(
        "Generating signing request for {} ({})",
        config.subject,
        config.dns_names.join(", ")
    );

    toolkit
        .generate_signing_request(&request, &out)
        .and_then(|()| ensure_non_empty(&out))
        .map_err(Error::Request)?;

    Ok(out)
}

fn ensure_non_empty(path: &Path) -> eyre::Result<()> {
    let len = fs::metadata(path)
        .wrap_err_with(|| format!("signing request {} was not written", path.display()))?
        .len();

    ensure!(len > 0, "signing request {} is empty", path.display());
    Ok(())
}
