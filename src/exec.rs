//! Synchronous invocation of external tools.

use std::{
    ffi::OsStr,
    process::{Command, Output, Stdio},
};

use eyre::{eyre, WrapErr as _};

/// Runs `cmd` to completion, capturing its output.
///
/// A non-zero exit status is an error carrying the status and the tail of stderr. There is no
/// timeout; a hanging tool hangs the caller.
pub(crate) fn run(cmd: &mut Command) -> eyre::Result<Output> {
    let program = describe(cmd);
    log::debug!("Running: {program}");

    let output = cmd
        .stdin(Stdio::null())
        .output()
        .wrap_err_with(|| format!("could not execute {program}"))?;

    log_stream(&program, "stdout", &output.stdout);
    log_stream(&program, "stderr", &output.stderr);

    if !output.status.success() {
        log::error!("{program} failed ({})", output.status);
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            log::error!("{program}: {line}");
        }

        return Err(eyre!("{program} {}", failure_summary(&output)));
    }

    Ok(output)
}

fn log_stream(program: &str, stream: &str, bytes: &[u8]) {
    if bytes.is_empty() || !log::log_enabled!(log::Level::Debug) {
        return;
    }

    for line in String::from_utf8_lossy(bytes).lines() {
        log::debug!("{program} {stream}: {line}");
    }
}

/// `exited with <status>`, followed by the last stderr line if there is one.
fn failure_summary(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);

    match stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => format!("exited with {}: {}", output.status, line.trim()),
        None => format!("exited with {}", output.status),
    }
}

/// Program name plus its first argument, enough to identify the call in logs.
fn describe(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy().into_owned();

    match cmd.get_args().next().map(OsStr::to_string_lossy) {
        Some(arg) => format!("`{program} {arg}`"),
        None => format!("`{program}`"),
    }
}
