//! External command execution for device drivers.

use super::{CancelSignal, ProbeError};
use colored::Colorize;
use regex::Regex;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest driver output accepted.
const MAX_OUTPUT_BYTES: usize = 500_000;

/// How often a running driver is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Regex for splitting command strings while preserving quoted substrings.
static COMMAND_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_command_regex() -> &'static Regex {
    COMMAND_REGEX.get_or_init(|| {
        Regex::new(r#"'([^']*)'\s*|\"([^\"]*)\"\s*|([^'\s]*)\s*"#).expect("Invalid Regex")
    })
}

/// Run a command line and return its stdout.
///
/// # Arguments
///
/// * `cmd` - program and arguments, split on whitespace outside quotes
/// * `envs` - added to the child environment only; use them for secrets so
///   they never appear in the argument list or the logs
/// * `cancel` - once raised, the child is killed and reaped
///
/// # Returns
///
/// Stdout of a successful run. A child that can't start, fails or is killed
/// gives [`ProbeError::Unreachable`]; oversized or non UTF-8 output gives
/// [`ProbeError::Malformed`].
pub(crate) fn run(
    cmd: &str,
    envs: &[(&str, &str)],
    cancel: &CancelSignal,
) -> Result<String, ProbeError> {
    log::debug!("run({cmd})", cmd = cmd.on_blue());

    let cmds: Vec<&str> = split_and_strip(cmd);
    log::trace!("split cmds={:?}", cmds);
    let (program, args) = cmds
        .split_first()
        .filter(|(program, _)| !program.is_empty())
        .ok_or_else(|| ProbeError::Unreachable("empty driver command".to_string()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|e| {
        log::error!("Command execution failed: {}", e);
        ProbeError::Unreachable(format!("failed to execute {program}: {e}"))
    })?;
    // Drain both pipes so a chatty driver never blocks on a full pipe.
    let stdout = child.stdout.take().map(|pipe| thread::spawn(move || read_capped(pipe)));
    let stderr = child.stderr.take().map(|pipe| thread::spawn(move || read_capped(pipe)));

    let status = wait_or_kill(&mut child, program, cancel)?;
    let stdout = join_output(stdout);
    let stderr = join_output(stderr);

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr);
        log::trace!(
            "code={code:?}, status={status}\n┎######\nstderr=\n{stderr}\n┖######",
            code = status.code(),
            stderr = stderr.red()
        );
        log::warn!(
            "{failed} to run {cmd}",
            failed = "failed".on_red(),
            cmd = cmd.on_blue()
        );
        return Err(ProbeError::Unreachable(format!(
            "{program} exited with {status}: {}",
            stderr.trim()
        )));
    }

    log::debug!("Success output.stdout.len(): {}", stdout.len());
    if stdout.len() > MAX_OUTPUT_BYTES {
        return Err(ProbeError::Malformed(format!(
            "response larger than {MAX_OUTPUT_BYTES} bytes"
        )));
    }

    let stdout = String::from_utf8(stdout)
        .map_err(|e| ProbeError::Malformed(format!("invalid UTF-8: {e}")))?;
    log::trace!("stdout=\n{stdout}");
    Ok(stdout)
}

fn wait_or_kill(
    child: &mut Child,
    program: &str,
    cancel: &CancelSignal,
) -> Result<ExitStatus, ProbeError> {
    loop {
        let exited = child
            .try_wait()
            .map_err(|e| ProbeError::Unreachable(format!("waiting for {program}: {e}")))?;
        if let Some(status) = exited {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            log::warn!("Killing {program} (pid {}), scan abandoned", child.id());
            if let Err(e) = child.kill() {
                log::error!("Failed to kill {program}: {e}");
            }
            if let Err(e) = child.wait() {
                log::error!("Failed to reap {program}: {e}");
            }
            return Err(ProbeError::Unreachable(format!("{program} killed, scan abandoned")));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Read a pipe to the end, keeping one byte more than the output limit.
fn read_capped(mut pipe: impl Read) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let room = (MAX_OUTPUT_BYTES + 1).saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Reading driver output failed: {e}");
                break;
            }
        }
    }
    kept
}

fn join_output(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

/// Split a command string on spaces, preserving quoted substrings.
fn split_and_strip(input: &str) -> Vec<&str> {
    get_command_regex()
        .find_iter(input)
        .map(|m| m.as_str().trim().trim_matches('\'').trim_matches('"'))
        .collect()
}
