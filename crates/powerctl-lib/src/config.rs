//! Application configuration: TOML-based, platform-aware paths.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::ControllerConfig;
use crate::value::Value;

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str =
    "# powerctl configuration. Changes made outside the app may be overwritten.\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Foreground/topology poll interval. Default: 1000 ms.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Render refresh interval for the interactive view. Default: 250 ms.
    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,

    /// Delay before a profile's values are applied, unless the profile
    /// stores its own `ApplyDelay`. Default: 500 ms.
    #[serde(default = "default_apply_profile_delay_ms")]
    pub apply_profile_delay_ms: u64,

    /// Create a profile on the first edit made while its process is in the
    /// foreground.
    #[serde(default = "default_true")]
    pub auto_create_profiles: bool,

    /// Directory holding one TOML file per profile. Empty = `<config dir>/profiles`.
    #[serde(default)]
    pub profiles_dir: String,

    /// Name of the cross-process lock taken around guarded device writes.
    #[serde(default = "default_lock_name")]
    pub lock_name: String,

    /// Command printing `PID [NAME]` of the foreground process. Empty = disabled.
    #[serde(default = "default_foreground_command")]
    pub foreground_command: String,

    /// Command exiting 0 while an external display is connected. Empty = never docked.
    #[serde(default)]
    pub docked_command: String,

    /// Timeout for every external command. Default: 5000 ms.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Foreground process names that never get a profile.
    #[serde(default)]
    pub ignore_processes: Vec<String>,

    /// Adjustable settings, in display order.
    #[serde(default)]
    pub settings: Vec<SettingConfig>,
}

/// One `[[settings]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingConfig {
    pub name: String,

    /// Legal values. May be empty when `values_command` supplies them.
    #[serde(default)]
    pub values: Vec<Value>,

    /// Command printing one legal value per line.
    #[serde(default)]
    pub values_command: String,

    /// Command printing the current value.
    #[serde(default)]
    pub current_command: String,

    /// Command applying a value; `{value}` is replaced by the shell-quoted value.
    #[serde(default)]
    pub apply_command: String,

    /// Device file written on apply (alternative to `apply_command`).
    #[serde(default)]
    pub write_path: String,

    /// Serialize writes to `write_path` through the cross-process lock.
    #[serde(default)]
    pub guarded: bool,

    /// Debounce window. 0 = apply synchronously.
    #[serde(default)]
    pub apply_delay_ms: u64,

    /// Save and restore this setting per profile.
    #[serde(default = "default_true")]
    pub persistent: bool,

    /// Snapshot the active value when a profile is created.
    #[serde(default)]
    pub persist_on_create: bool,

    #[serde(default = "default_true")]
    pub visible: bool,

    /// Value → text written to `write_path`. Unmapped values are written as-is.
    #[serde(default)]
    pub write_map: BTreeMap<String, String>,
}

impl SettingConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            values_command: String::new(),
            current_command: String::new(),
            apply_command: String::new(),
            write_path: String::new(),
            guarded: false,
            apply_delay_ms: 0,
            persistent: true,
            persist_on_create: false,
            visible: true,
            write_map: BTreeMap::new(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_render_interval_ms() -> u64 {
    250
}
fn default_apply_profile_delay_ms() -> u64 {
    500
}
fn default_command_timeout_ms() -> u64 {
    5000
}
fn default_lock_name() -> String {
    "powerctl-device".into()
}
fn default_foreground_command() -> String {
    if cfg!(target_os = "linux") {
        "xdotool getactivewindow getwindowpid".into()
    } else {
        String::new()
    }
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval_ms: default_poll_interval_ms(),
            render_interval_ms: default_render_interval_ms(),
            apply_profile_delay_ms: default_apply_profile_delay_ms(),
            auto_create_profiles: true,
            profiles_dir: String::new(),
            lock_name: default_lock_name(),
            foreground_command: default_foreground_command(),
            docked_command: String::new(),
            command_timeout_ms: default_command_timeout_ms(),
            ignore_processes: Vec::new(),
            settings: Vec::new(),
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// An interval field is zero.
    ZeroInterval(&'static str),
    /// A setting has an empty or whitespace-only name.
    EmptySettingName,
    /// Two settings share a name.
    DuplicateSetting(String),
    /// A setting has both `apply_command` and `write_path`.
    ConflictingTargets(String),
    /// A setting has no `values` and no `values_command`.
    NoValues(String),
    /// `guarded` is set without a `write_path`.
    GuardedWithoutPath(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroInterval(field) => write!(f, "{field} must be greater than 0"),
            ValidationError::EmptySettingName => write!(f, "Setting name cannot be empty"),
            ValidationError::DuplicateSetting(name) => write!(f, "Duplicate setting: {name}"),
            ValidationError::ConflictingTargets(name) => {
                write!(f, "Setting {name}: apply_command and write_path are mutually exclusive")
            }
            ValidationError::NoValues(name) => {
                write!(f, "Setting {name}: needs values or values_command")
            }
            ValidationError::GuardedWithoutPath(name) => {
                write!(f, "Setting {name}: guarded requires write_path")
            }
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        #[cfg(windows)]
        {
            dirs::config_dir().map(|p| p.join("Powerctl"))
        }
        #[cfg(not(windows))]
        {
            dirs::config_dir().map(|p| p.join("powerctl"))
        }
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Default log file for the daemon.
    pub fn log_path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("powerctl.log"))
    }

    /// Directory holding profile files.
    pub fn profiles_path(&self) -> Option<PathBuf> {
        let dir = self.profiles_dir.trim();
        if dir.is_empty() {
            Self::dir().map(|d| d.join("profiles"))
        } else {
            Some(PathBuf::from(dir))
        }
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    ///
    /// A header comment is prepended to warn that manual edits may be overwritten.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            apply_delay: Duration::from_millis(self.apply_profile_delay_ms),
            auto_create: self.auto_create_profiles,
            ignore: self.ignore_processes.clone(),
        }
    }

    /// Validate all config fields.
    ///
    /// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all problems found.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("render_interval_ms", self.render_interval_ms),
            ("command_timeout_ms", self.command_timeout_ms),
        ] {
            if value == 0 {
                errors.push(ValidationError::ZeroInterval(field));
            }
        }

        let mut seen = BTreeSet::new();
        for s in &self.settings {
            let name = s.name.trim();
            if name.is_empty() {
                errors.push(ValidationError::EmptySettingName);
                continue;
            }
            if !seen.insert(name) {
                errors.push(ValidationError::DuplicateSetting(name.to_string()));
            }
            if !s.apply_command.trim().is_empty() && !s.write_path.trim().is_empty() {
                errors.push(ValidationError::ConflictingTargets(name.to_string()));
            }
            if s.values.is_empty() && s.values_command.trim().is_empty() {
                errors.push(ValidationError::NoValues(name.to_string()));
            }
            if s.guarded && s.write_path.trim().is_empty() {
                errors.push(ValidationError::GuardedWithoutPath(name.to_string()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
