//! `status` subcommand: probe every setting once and show the group.

use std::path::Path;
use std::time::Instant;

use super::{Config, Engine, Result, StatusOutput, kv, kv_indent, kv_width, to_json};

fn print_status(engine: &Engine, json: bool) -> Result<()> {
    let status = engine.status();

    if json {
        let output = StatusOutput {
            version: env!("CARGO_PKG_VERSION").to_string(),
            rendered: engine.render().collect(),
            engine: status,
        };
        println!("{}", to_json(&output)?);
        return Ok(());
    }

    let names: Vec<String> = status.settings.iter().map(|s| format!("{}:", s.name)).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let w = kv_width(&["Version:", "Profile:", "Settings:"], &name_refs);

    kv("Version:", env!("CARGO_PKG_VERSION"), w);
    kv("Profile:", &status.profile, w);
    println!();

    if status.settings.is_empty() {
        kv("Settings:", "none configured", w);
        return Ok(());
    }
    println!("Settings:");
    for (s, label) in status.settings.iter().zip(&name_refs) {
        let active = s
            .active
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".into());
        let mut line = active;
        if let Some(profile) = &s.profile {
            line.push_str(&format!(" (profile: {profile})"));
        }
        if let Some(err) = &s.last_error {
            line.push_str(&format!(" (error: {err})"));
        }
        kv_indent(label, line, w);
    }
    Ok(())
}

pub(super) fn cmd_status(json: bool, config_path: Option<&Path>) -> Result<()> {
    let config: Config = super::load_config(config_path);
    let mut engine = Engine::from_config(&config)?;
    engine.start(Instant::now());
    print_status(&engine, json)
}
