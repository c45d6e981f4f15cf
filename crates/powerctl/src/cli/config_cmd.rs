//! `config` subcommand: show current configuration and file paths.

use std::path::Path;

use super::{
    Config, ConfigFilesJson, ConfigOutput, PowerctlError, Result, kv, kv_indent, kv_width, to_json,
};

fn or_none(s: &str) -> &str {
    if s.trim().is_empty() { "(none)" } else { s }
}

pub(super) fn cmd_config(json: bool, custom_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(custom_path);
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());

    let profiles_dir = config.profiles_path();
    let profiles_dir_exists = profiles_dir.as_ref().is_some_and(|p| p.is_dir());
    let log_file = Config::log_path();

    if json {
        let output = ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config,
            files: ConfigFilesJson {
                profiles_dir: profiles_dir.as_ref().map(|p| p.display().to_string()),
                profiles_dir_exists,
                log_file: log_file.as_ref().map(|p| p.display().to_string()),
            },
        };
        println!("{}", to_json(&output)?);
        return Ok(());
    }

    let w = kv_width(
        &["Config file:"],
        &[
            "poll_interval_ms:",
            "apply_profile_delay_ms:",
            "auto_create_profiles:",
            "foreground_command:",
            "ignore_processes:",
            "Profiles:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    if let Err(errors) = config.validate() {
        for e in &errors {
            println!("  ! {e}");
        }
    }
    println!();

    println!("Engine:");
    kv_indent("poll_interval_ms:", config.poll_interval_ms, w);
    kv_indent("render_interval_ms:", config.render_interval_ms, w);
    kv_indent("apply_profile_delay_ms:", config.apply_profile_delay_ms, w);
    kv_indent("auto_create_profiles:", config.auto_create_profiles, w);
    kv_indent("lock_name:", &config.lock_name, w);
    kv_indent("foreground_command:", or_none(&config.foreground_command), w);
    kv_indent("docked_command:", or_none(&config.docked_command), w);
    kv_indent("command_timeout_ms:", config.command_timeout_ms, w);
    kv_indent("ignore_processes:", or_none(&config.ignore_processes.join(", ")), w);
    println!();

    println!("Settings:");
    if config.settings.is_empty() {
        println!("  (none)");
    }
    for s in &config.settings {
        let values: Vec<String> = s.values.iter().map(ToString::to_string).collect();
        let target = if !s.write_path.trim().is_empty() {
            let guard = if s.guarded { ", guarded" } else { "" };
            format!("file {}{guard}", s.write_path)
        } else if !s.apply_command.trim().is_empty() {
            format!("command {}", s.apply_command)
        } else {
            "profile only".to_string()
        };
        kv_indent(
            &format!("{}:", s.name),
            format_args!("[{}] -> {target}", values.join(", ")),
            w,
        );
    }
    println!();

    println!("Files:");
    match &profiles_dir {
        Some(p) => {
            let status = if profiles_dir_exists { "present" } else { "not found" };
            kv_indent("Profiles:", format_args!("{} ({status})", p.display()), w);
        }
        None => kv_indent("Profiles:", "(no config directory)", w),
    }
    Ok(())
}

/// Write the default config to `custom_path` (or the default location)
/// unless a file is already there.
pub(super) fn cmd_init(custom_path: Option<&Path>) -> Result<()> {
    let path = custom_path
        .map(|p| p.to_path_buf())
        .or_else(Config::path)
        .ok_or_else(|| PowerctlError::Config("no config directory".into()))?;
    if path.exists() {
        eprintln!("{} already exists, leaving it unchanged", path.display());
        return Ok(());
    }
    Config::default().save_to(&path)?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}
