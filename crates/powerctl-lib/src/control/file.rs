//! File-backed control: writes a value to a device attribute file (for
//! example a sysfs power-limit register) through the retry-guarded protocol.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Applied, ApplyError, Control, Result};
use crate::guard::{self, NamedLock, Resource, RetryPolicy};
use crate::shell;
use crate::value::Value;

/// Writes `write_map[value]` (or the value's text when unmapped) to `path`.
pub struct FileControl<L: NamedLock> {
    path: PathBuf,
    write_map: BTreeMap<String, String>,
    lock: L,
    policy: RetryPolicy,
    values_command: Option<(String, Duration)>,
}

impl<L: NamedLock> FileControl<L> {
    pub fn new(path: impl Into<PathBuf>, write_map: BTreeMap<String, String>, lock: L) -> Self {
        Self {
            path: path.into(),
            write_map,
            lock,
            policy: RetryPolicy::default(),
            values_command: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Probe the legal value set by running `command` (one value per line).
    pub fn with_values_command(mut self, command: impl Into<String>, timeout: Duration) -> Self {
        let command = command.into();
        if !command.trim().is_empty() {
            self.values_command = Some((command, timeout));
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw text written to the file for `value`.
    fn raw_for(&self, value: &Value) -> String {
        let key = value.to_string();
        self.write_map.get(&key).cloned().unwrap_or(key)
    }

    /// Map raw file contents back to a value, reversing `write_map`.
    fn value_for(&self, raw: &str) -> Value {
        self.write_map
            .iter()
            .find(|(_, written)| written.trim() == raw)
            .map(|(value, _)| Value::parse(value))
            .unwrap_or_else(|| Value::parse(raw))
    }
}

/// The attribute file, opened for writing on each apply.
struct AttributeFile<'a> {
    path: &'a Path,
}

impl Resource for AttributeFile<'_> {
    type Handle = File;

    fn open(&mut self) -> Result<File> {
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ApplyError::NotFound(self.path.display().to_string())
                }
                _ => ApplyError::Io(e),
            })
    }
}

impl<L: NamedLock> Control for FileControl<L> {
    fn current(&mut self) -> Option<Value> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(self.value_for(raw))
    }

    fn legal_values(&mut self) -> Option<Vec<Value>> {
        let (command, timeout) = self.values_command.as_ref()?;
        let out = shell::run(command, *timeout).ok()?;
        if !out.status.success() {
            return None;
        }
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
        let raw = self.raw_for(requested);
        let mut target = AttributeFile { path: &self.path };
        log::debug!(
            "[setting] writing {raw:?} to {} for {requested}",
            self.path.display()
        );
        guard::guarded_apply(&self.lock, &mut target, &self.policy, requested, |file| {
            file.write_all(raw.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
            Ok(requested.clone())
        })
    }
}
