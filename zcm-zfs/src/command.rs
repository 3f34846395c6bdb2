// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, ZfsError};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

pub fn render(program: &Path, args: &[String]) -> String {
    let program = program.display().to_string();
    if args.is_empty() {
        program
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Run `program` to completion, killing it once `timeout` elapses.
pub fn run(program: &Path, args: &[String], timeout: Duration) -> Result<CommandOutcome> {
    let rendered = render(program, args);
    debug!("Running {}", rendered);

    // As an OsStr a bare name is searched in PATH; a Path would be taken as relative.
    let handle = duct::cmd(program.as_os_str(), args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .start()
        .map_err(|error| ZfsError::CommandFailed {
            command: rendered.clone(),
            stderr: error.to_string(),
        })?;

    let deadline = Instant::now() + timeout;
    let output = loop {
        if let Some(output) = handle.try_wait()? {
            break output.clone();
        }
        if Instant::now() >= deadline {
            let _ = handle.kill();
            return Err(ZfsError::Timeout {
                command: rendered,
                seconds: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        return Err(ZfsError::from_stderr(rendered, stderr));
    }

    Ok(CommandOutcome {
        command: rendered,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn formats_command_context() {
        let rendered = render(Path::new("zfs"), &args(&["destroy", "-r", "tank/zcm"]));
        assert_eq!(rendered, "zfs destroy -r tank/zcm");
        assert_eq!(render(Path::new("/sbin/zfs"), &[]), "/sbin/zfs");
    }

    #[cfg(unix)]
    #[test]
    fn bare_program_names_are_found_in_path() {
        let outcome = run(Path::new("true"), &[], Duration::from_secs(10)).unwrap();
        assert_eq!(outcome.command, "true");
        assert!(outcome.stdout.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_of_successful_command() {
        let outcome = run(
            Path::new("sh"),
            &args(&["-c", "printf 'a\\tb\\n'"]),
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(outcome.stdout, "a\tb\n");
    }

    #[cfg(unix)]
    #[test]
    fn classifies_failures_from_stderr() {
        let error = run(
            Path::new("sh"),
            &args(&["-c", "echo 'pool or dataset is busy' >&2; exit 1"]),
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert!(error.is_busy());

        let error = run(
            Path::new("sh"),
            &args(&["-c", "echo nope >&2; exit 2"]),
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert!(matches!(error, ZfsError::CommandFailed { ref stderr, .. } if stderr == "nope"));
    }

    #[cfg(unix)]
    #[test]
    fn kills_commands_that_exceed_the_timeout() {
        let started = Instant::now();
        let error = run(Path::new("sleep"), &args(&["5"]), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(error, ZfsError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
