//! Shell command execution with a hard timeout.
//!
//! Used by command-backed controls and by the command-based foreground
//! source. Commands run through `sh -c` (`cmd /C` on Windows); the caller
//! blocks until the command exits or the timeout kills it.

use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

/// Poll interval when waiting for a command to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default timeout for external commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
}

impl CommandOutput {
    /// First non-empty stdout line, trimmed.
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

/// Run a shell command and capture its stdout. Kills the process if it
/// exceeds `timeout`, returning `ErrorKind::TimedOut`.
pub fn run(command: &str, timeout: Duration) -> io::Result<CommandOutput> {
    let mut child = if cfg!(windows) {
        Command::new("cmd")
            .args(["/C", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?
    } else {
        Command::new("sh")
            .args(["-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?
    };

    let max_polls = (timeout.as_millis() / POLL_INTERVAL.as_millis()).max(1) as u64;
    for _ in 0..max_polls {
        if let Some(status) = child.try_wait()? {
            let mut stdout = String::new();
            if let Some(mut pipe) = child.stdout.take() {
                pipe.read_to_string(&mut stdout)?;
            }
            return Ok(CommandOutput { status, stdout });
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    log::warn!("command timed out after {timeout:?}, killing: {command}");
    let _ = child.kill();
    let _ = child.wait();
    Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("timed out after {timeout:?}"),
    ))
}

/// Replace every `{value}` placeholder in `template` with `value`, quoted
/// for the platform shell.
pub fn substitute(template: &str, value: &str) -> String {
    template.replace("{value}", &quote(value))
}

#[cfg(not(windows))]
fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:/+=".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(windows)]
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_plain_value() {
        assert_eq!(
            substitute("set-tdp {value} --now", "10W"),
            "set-tdp 10W --now"
        );
    }

    #[test]
    fn substitute_without_placeholder_is_unchanged() {
        assert_eq!(substitute("true", "x"), "true");
    }

    #[cfg(not(windows))]
    #[test]
    fn substitute_quotes_shell_metacharacters() {
        assert_eq!(substitute("echo {value}", "a b;c"), "echo 'a b;c'");
        assert_eq!(substitute("echo {value}", "it's"), r"echo 'it'\''s'");
    }

    #[cfg(not(windows))]
    #[test]
    fn run_captures_stdout() {
        let out = run("echo hello", Duration::from_secs(5)).unwrap();
        assert!(out.status.success());
        assert_eq!(out.first_line(), Some("hello"));
    }

    #[cfg(not(windows))]
    #[test]
    fn run_reports_failure_status() {
        let out = run("exit 3", Duration::from_secs(5)).unwrap();
        assert!(!out.status.success());
        assert_eq!(out.first_line(), None);
    }

    #[cfg(not(windows))]
    #[test]
    fn run_kills_on_timeout() {
        let err = run("sleep 60", Duration::from_millis(200)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn first_line_skips_blank_lines() {
        let out = CommandOutput {
            status: exit_ok(),
            stdout: "\n  \n 42 \nrest".into(),
        };
        assert_eq!(out.first_line(), Some("42"));
    }

    #[cfg(not(windows))]
    fn exit_ok() -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(0)
    }

    #[cfg(windows)]
    fn exit_ok() -> ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        ExitStatus::from_raw(0)
    }
}
