//! Command-backed control: apply and probe through user-configured shell
//! commands.

use std::time::Duration;

use super::{Applied, ApplyError, Control, Result};
use crate::shell;
use crate::value::Value;

/// Runs `apply` (with `{value}` substituted) to change the setting, and the
/// optional `current` / `values` commands to probe it.
///
/// With no apply command the control simply confirms every request, which
/// suits settings that are only recorded in profiles.
#[derive(Debug, Clone, Default)]
pub struct CommandControl {
    apply: Option<String>,
    current: Option<String>,
    values: Option<String>,
    timeout: Duration,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl CommandControl {
    pub fn new(apply: &str, current: &str, values: &str, timeout: Duration) -> Self {
        Self {
            apply: non_empty(apply),
            current: non_empty(current),
            values: non_empty(values),
            timeout,
        }
    }

    fn probe(&self, command: &str) -> Option<shell::CommandOutput> {
        match shell::run(command, self.timeout) {
            Ok(out) if out.status.success() => Some(out),
            Ok(out) => {
                log::debug!("[setting] probe exited with {}: {command}", out.status);
                None
            }
            Err(e) => {
                log::debug!("[setting] probe failed: {e}: {command}");
                None
            }
        }
    }
}

impl Control for CommandControl {
    fn current(&mut self) -> Option<Value> {
        let command = self.current.as_deref()?;
        let out = self.probe(command)?;
        out.first_line().map(Value::parse)
    }

    fn legal_values(&mut self) -> Option<Vec<Value>> {
        let command = self.values.as_deref()?;
        let out = self.probe(command)?;
        let values: Vec<Value> = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(Value::parse)
            .collect();
        (!values.is_empty()).then_some(values)
    }

    fn apply(&mut self, requested: &Value) -> Result<Applied> {
        let Some(template) = self.apply.as_deref() else {
            return Ok(Applied::Confirmed(requested.clone()));
        };
        let command = shell::substitute(template, &requested.to_string());
        let out = shell::run(&command, self.timeout)
            .map_err(|e| ApplyError::CommandFailed(format!("{command}: {e}")))?;
        if !out.status.success() {
            return Err(ApplyError::CommandFailed(format!(
                "{command}: exited with {}",
                out.status
            )));
        }
        // Read back when possible so a normalising device shows its real value.
        let confirmed = self.current().unwrap_or_else(|| requested.clone());
        Ok(Applied::Confirmed(confirmed))
    }
}
