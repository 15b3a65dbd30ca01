//! Renewal and deployment of a web server's TLS certificate through an ACME client.
//!
//! A run generates a signing request for the server's existing private key, stops the server so
//! the ACME client can answer the domain validation challenge on its port, starts the server again,
//! installs the issued certificate and chain (keeping one backup generation) and reloads the
//! server.
//!
//! # Collaborators
//!
//! The external tools the workflow drives sit behind traits, so they can be swapped for in-process
//! implementations or fakes:
//!
//! - [`SigningToolkit`]: produces the signing request. [`OpenSsl`] runs `openssl req`; [`Native`]
//!   signs in process with a P-256 key.
//! - [`CertificateAuthority`]: obtains the certificate. [`Certbot`] runs `certbot certonly
//!   --standalone --csr`.
//! - [`ServiceManager`]: starts, stops and reloads the web server. [`Systemctl`] runs `systemctl`.
//!
//! # Failure Handling
//!
//! Every failure ends the run with an [`Error`] whose [`exit_code()`](Error::exit_code) tells
//! operators which step failed. A failed issuance never leaves the server stopped: the server is
//! started again before the error is returned.
//!
//! # Concurrency
//!
//! Runs are strictly sequential and are not locked against each other. Run at most one instance
//! per deployment at a time.

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod cert;
mod config;
mod error;
mod exec;
mod install;
mod issue;
mod preflight;
mod renew;
mod request;
mod service;
mod workspace;


pub use crate::{
    cert::{parse_pem_chain, CertificateInfo, Native},
    config::{ChainMode, Config, Subject, Toolkit, DEFAULT_CONFIG_PATH},
    error::{Error, Result},
    install::Installation,
    issue::{CertificateAuthority, Certbot},
    renew::{renew, Renewal},
    request::{render_config, OpenSsl, SigningRequest, SigningToolkit},
    service::{ServiceAction, ServiceController, ServiceManager, ServiceOutage, Systemctl},
    workspace::Workspace,
};
