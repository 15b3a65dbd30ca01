use std::{path::PathBuf, process::ExitCode};

use clap::{error::ErrorKind, CommandFactory as _, Parser};
use renew::{Config, Error, DEFAULT_CONFIG_PATH};

/// Renew the web server's TLS certificate and install it.
///
/// Generates a signing request for the configured key, stops the server while the ACME client
/// validates the domain, starts it again, installs the new certificate and chain (keeping the
/// previous ones as backups) and reloads the server.
///
/// Exit status: 0 success, 1 invalid arguments, 2 missing dependency or bad configuration,
/// 3 signing request or stop/start failure, 4 issuance or installation failure,
/// 5 reload failure.
#[derive(Debug, Parser)]
#[command(version, about, long_about)]
struct Cli {
    /// Deployment configuration file (JSON).
    #[arg(short, long, env = "ACME_RENEW_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// `help` prints this text; no other word is accepted.
    #[arg(hide = true, value_name = "help")]
    word: Option<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();

            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(Error::Usage(err.to_string()).exit_code()),
            };
        }
    };

    match cli.word.as_deref() {
        None => {}

        Some("help") => {
            let _ = Cli::command().print_long_help();
            return ExitCode::SUCCESS;
        }

        Some(word) => {
            let err = Error::Usage(format!("unexpected argument '{word}'"));
            eprintln!("error: {err}\n\n{}", Cli::command().render_usage());
            return ExitCode::from(err.exit_code());
        }
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            if let Some(hint) = err.remediation() {
                log::error!("{hint}");
            }
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: &Cli) -> renew::Result<()> {
    let config = Config::load(&cli.config).map_err(Error::Config)?;
    log::info!("Loaded configuration from {}", cli.config.display());

    let installation = renew::renew(&config)?;

    log::info!(
        "Renewal complete: {} (backups: {})",
        installation.certificate.display(),
        installation.backups.len()
    );

    Ok(())
}
