//! CLI subcommands: daemon loop, status, configuration, stored profiles.

mod config_cmd;
mod profile;
mod run;
mod status;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use powerctl_lib::config::Config;
pub(super) use powerctl_lib::engine::{Engine, EngineStatus};
pub(super) use powerctl_lib::error::{PowerctlError, Result};
pub(super) use powerctl_lib::store::{ProfileId, ProfileStore, Topology};
pub(super) use powerctl_lib::value::Value;

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {}", format_kv(key, value, w - 2));
}

/// Load the config from `custom_path`, or from the default location.
/// Parse problems are logged and defaults used.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    match custom_path {
        Some(path) => {
            let (config, warnings) = Config::load_from(path);
            for w in &warnings {
                log::warn!("{w}");
            }
            config
        }
        None => Config::load(),
    }
}

pub(super) fn profiles_dir(config: &Config) -> Result<PathBuf> {
    config
        .profiles_path()
        .ok_or_else(|| PowerctlError::Config("no profiles directory".into()))
}

/// Profile identity for a process name, or Autostart when `process` is `None`.
pub(super) fn profile_id(process: Option<&str>, docked: bool) -> ProfileId {
    match process {
        Some(name) => ProfileId::for_process(Topology::from_docked(docked), name),
        None => ProfileId::autostart(),
    }
}

pub(super) fn to_json(value: &impl Serialize) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| PowerctlError::Config(format!("JSON serialization failed: {e}")))
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct StatusOutput {
    pub version: String,
    pub engine: EngineStatus,
    pub rendered: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub files: ConfigFilesJson,
}

#[derive(Serialize)]
pub(super) struct ConfigFilesJson {
    pub profiles_dir: Option<String>,
    pub profiles_dir_exists: bool,
    pub log_file: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ProfileJson {
    pub name: ProfileId,
    pub subject: String,
    pub topology: Option<Topology>,
    pub exists: bool,
    pub values: BTreeMap<String, Value>,
}

#[derive(Serialize)]
pub(super) struct ProfilesOutput {
    pub count: usize,
    pub profiles: Vec<ProfileJson>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the profile daemon (watches the foreground process)
    Run {
        /// Read commands from stdin and print the setting group
        #[arg(long)]
        interactive: bool,
        /// Write log output to this file instead of stderr
        #[arg(long, value_name = "PATH")]
        log_file: Option<PathBuf>,
    },

    /// Probe all settings once and show their values
    Status,

    /// Show current configuration and file paths
    Config {
        /// Write a default config file if none exists yet
        #[arg(long)]
        init: bool,
    },

    /// List stored profiles
    Profiles,

    /// Inspect or edit one stored profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Show a profile's stored values
    Show {
        #[command(flatten)]
        target: ProfileTarget,
    },
    /// Create an empty profile
    Create {
        #[command(flatten)]
        target: ProfileTarget,
    },
    /// Delete a profile and all its values
    Delete {
        #[command(flatten)]
        target: ProfileTarget,
    },
    /// Store one value in a profile
    Set {
        /// Setting name (or ApplyDelay)
        key: String,
        /// Value to store
        value: String,
        #[command(flatten)]
        target: ProfileTarget,
    },
    /// Remove one value from a profile
    Unset {
        /// Setting name (or ApplyDelay)
        key: String,
        #[command(flatten)]
        target: ProfileTarget,
    },
}

#[derive(clap::Args)]
pub struct ProfileTarget {
    /// Process name (omit for the Autostart profile)
    #[arg(long, value_name = "NAME")]
    pub process: Option<String>,
    /// Use the docked (external display) profile
    #[arg(long, requires = "process")]
    pub docked: bool,
}

impl ProfileTarget {
    fn id(&self) -> ProfileId {
        profile_id(self.process.as_deref(), self.docked)
    }
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Run { interactive, .. } => {
            if json {
                warn_json_unsupported("run");
            }
            run::cmd_run(config_path, interactive)
        }
        Command::Status => status::cmd_status(json, config_path),
        Command::Config { init } => {
            if init {
                config_cmd::cmd_init(config_path)?;
            }
            config_cmd::cmd_config(json, config_path)
        }
        Command::Profiles => profile::cmd_profiles(json, config_path),
        Command::Profile { action } => match action {
            ProfileAction::Show { target } => profile::cmd_show(&target.id(), json, config_path),
            ProfileAction::Create { target } => profile::cmd_create(&target.id(), config_path),
            ProfileAction::Delete { target } => profile::cmd_delete(&target.id(), config_path),
            ProfileAction::Set { key, value, target } => {
                profile::cmd_set(&target.id(), &key, &value, config_path)
            }
            ProfileAction::Unset { key, target } => {
                profile::cmd_unset(&target.id(), &key, config_path)
            }
        },
    }
}
