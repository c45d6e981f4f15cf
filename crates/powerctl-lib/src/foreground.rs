//! Foreground process and display topology detection.
//!
//! The profile controller polls a [`ForegroundSource`] once per tick. Every
//! query may come back without an answer; the controller treats that as
//! "no change" and asks again on the next tick.

use std::time::Duration;

use crate::shell;

pub type ProcessId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundProcess {
    pub pid: ProcessId,
    pub name: String,
}

pub trait ForegroundSource {
    /// The process that currently owns the foreground, if known.
    fn foreground(&mut self) -> Option<ForegroundProcess>;
    /// Whether `pid` is still alive. `None` when liveness can't be determined.
    fn is_running(&mut self, pid: ProcessId) -> Option<bool>;
    /// Whether an external display (docked topology) is active.
    fn external_display(&mut self) -> Option<bool>;
}

/// Foreground source backed by user-configured shell commands.
///
/// `foreground_command` must print `PID [NAME]` on its first line. When the
/// name is missing it is looked up from `/proc/PID/comm` on Linux.
/// `docked_command` exits 0 when an external display is active; with no
/// command configured the topology is always regular.
///
/// A failed query returns the previous answer.
#[derive(Debug, Clone)]
pub struct CommandSource {
    foreground_command: Option<String>,
    docked_command: Option<String>,
    timeout: Duration,
    last_foreground: Option<ForegroundProcess>,
    last_docked: Option<bool>,
}

impl CommandSource {
    pub fn new(foreground_command: &str, docked_command: &str, timeout: Duration) -> Self {
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        Self {
            foreground_command: non_empty(foreground_command),
            docked_command: non_empty(docked_command),
            timeout,
            last_foreground: None,
            last_docked: None,
        }
    }

    fn query_foreground(&self) -> Option<ForegroundProcess> {
        let command = self.foreground_command.as_deref()?;
        let out = match shell::run(command, self.timeout) {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                log::debug!("[foreground] command exited with {}", out.status);
                return None;
            }
            Err(e) => {
                log::debug!("[foreground] command failed: {e}");
                return None;
            }
        };
        parse_foreground(out.first_line()?)
    }

    fn query_docked(&self) -> Option<bool> {
        let Some(command) = self.docked_command.as_deref() else {
            return Some(false);
        };
        match shell::run(command, self.timeout) {
            Ok(out) => Some(out.status.success()),
            Err(e) => {
                log::debug!("[foreground] docked command failed: {e}");
                None
            }
        }
    }
}

/// Parse `PID [NAME]`.
fn parse_foreground(line: &str) -> Option<ForegroundProcess> {
    let mut parts = line.split_whitespace();
    let pid: ProcessId = parts.next()?.parse().ok()?;
    let name = match parts.collect::<Vec<_>>().join(" ") {
        name if !name.is_empty() => name,
        _ => process_name(pid)?,
    };
    Some(ForegroundProcess { pid, name })
}

#[cfg(target_os = "linux")]
fn process_name(pid: ProcessId) -> Option<String> {
    let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    let comm = comm.trim();
    (!comm.is_empty()).then(|| comm.to_string())
}

#[cfg(not(target_os = "linux"))]
fn process_name(_pid: ProcessId) -> Option<String> {
    None
}

impl ForegroundSource for CommandSource {
    fn foreground(&mut self) -> Option<ForegroundProcess> {
        if let Some(fg) = self.query_foreground() {
            self.last_foreground = Some(fg);
        }
        self.last_foreground.clone()
    }

    #[cfg(target_os = "linux")]
    fn is_running(&mut self, pid: ProcessId) -> Option<bool> {
        Some(std::path::Path::new(&format!("/proc/{pid}")).exists())
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    fn is_running(&mut self, pid: ProcessId) -> Option<bool> {
        shell::run(&format!("kill -0 {pid}"), self.timeout)
            .ok()
            .map(|out| out.status.success())
    }

    #[cfg(not(unix))]
    fn is_running(&mut self, _pid: ProcessId) -> Option<bool> {
        None
    }

    fn external_display(&mut self) -> Option<bool> {
        if let Some(docked) = self.query_docked() {
            self.last_docked = Some(docked);
        }
        self.last_docked
    }
}

pub mod mock {
    use super::*;
    use std::collections::BTreeSet;

    /// Scripted source for tests. Fields are set directly between ticks.
    #[derive(Debug, Clone, Default)]
    pub struct MockSource {
        pub foreground: Option<ForegroundProcess>,
        pub running: BTreeSet<ProcessId>,
        pub docked: Option<bool>,
    }

    impl MockSource {
        pub fn new() -> Self {
            Self {
                docked: Some(false),
                ..Self::default()
            }
        }

        /// Bring `pid` to the foreground and mark it running.
        pub fn focus(&mut self, pid: ProcessId, name: &str) {
            self.running.insert(pid);
            self.foreground = Some(ForegroundProcess {
                pid,
                name: name.to_string(),
            });
        }

        /// Terminate `pid`; clears the foreground if it was `pid`.
        pub fn exit(&mut self, pid: ProcessId) {
            self.running.remove(&pid);
            if self.foreground.as_ref().is_some_and(|f| f.pid == pid) {
                self.foreground = None;
            }
        }
    }

    impl ForegroundSource for MockSource {
        fn foreground(&mut self) -> Option<ForegroundProcess> {
            self.foreground.clone()
        }

        fn is_running(&mut self, pid: ProcessId) -> Option<bool> {
            Some(self.running.contains(&pid))
        }

        fn external_display(&mut self) -> Option<bool> {
            self.docked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn parse_pid_and_name() {
        assert_eq!(
            parse_foreground("4242 game.exe"),
            Some(ForegroundProcess {
                pid: 4242,
                name: "game.exe".into()
            })
        );
    }

    #[test]
    fn parse_name_with_spaces() {
        let fg = parse_foreground("7 Some Game").unwrap();
        assert_eq!(fg.name, "Some Game");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_foreground("not-a-pid game"), None);
        assert_eq!(parse_foreground(""), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parse_pid_only_reads_proc_comm() {
        let pid = std::process::id();
        let fg = parse_foreground(&pid.to_string()).unwrap();
        assert_eq!(fg.pid, pid);
        assert!(!fg.name.is_empty());
    }

    #[test]
    fn no_commands_means_no_foreground_and_regular() {
        let mut src = CommandSource::new("", "", T);
        assert_eq!(src.foreground(), None);
        assert_eq!(src.external_display(), Some(false));
    }

    #[cfg(not(windows))]
    #[test]
    fn command_source_reports_foreground() {
        let mut src = CommandSource::new("echo 12 game.exe", "", T);
        assert_eq!(
            src.foreground(),
            Some(ForegroundProcess {
                pid: 12,
                name: "game.exe".into()
            })
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn failed_query_returns_previous_answer() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fg");
        std::fs::write(&script, "12 game.exe\n").unwrap();
        let command = format!("cat {}", script.display());
        let mut src = CommandSource::new(&command, "", T);
        assert_eq!(src.foreground().unwrap().pid, 12);

        std::fs::remove_file(&script).unwrap();
        assert_eq!(src.foreground().unwrap().pid, 12);
    }

    #[cfg(not(windows))]
    #[test]
    fn docked_follows_exit_status() {
        assert_eq!(CommandSource::new("", "true", T).external_display(), Some(true));
        assert_eq!(CommandSource::new("", "false", T).external_display(), Some(false));
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_running() {
        let mut src = CommandSource::new("", "", T);
        assert_eq!(src.is_running(std::process::id()), Some(true));
    }

    #[test]
    fn mock_focus_and_exit() {
        let mut src = mock::MockSource::new();
        src.focus(10, "game.exe");
        assert_eq!(src.foreground().unwrap().name, "game.exe");
        assert_eq!(src.is_running(10), Some(true));
        src.exit(10);
        assert_eq!(src.foreground(), None);
        assert_eq!(src.is_running(10), Some(false));
    }
}
