//! `profiles` and `profile` subcommands: list, inspect and edit stored
//! profiles without a running daemon.

use std::path::Path;

use super::{
    Config, ProfileId, ProfileJson, ProfileStore, ProfilesOutput, Result, Value, kv, kv_indent,
    kv_width, to_json,
};

fn open_store(config: &Config) -> Result<ProfileStore> {
    Ok(ProfileStore::open_dir(super::profiles_dir(config)?))
}

fn describe(store: &mut ProfileStore, id: &ProfileId) -> ProfileJson {
    let entry = store.entry(id);
    ProfileJson {
        name: id.clone(),
        subject: id.subject().to_string(),
        topology: id.topology(),
        exists: entry.exists(),
        values: entry.values(),
    }
}

/// Resolve `raw` against the configured setting's legal values by text, so
/// stored values keep the kind the setting expects.
fn resolve_value(config: &Config, key: &str, raw: &str) -> Value {
    let raw = raw.trim();
    config
        .settings
        .iter()
        .find(|s| s.name == key)
        .and_then(|s| s.values.iter().find(|v| v.to_string() == raw))
        .cloned()
        .unwrap_or_else(|| Value::parse(raw))
}

pub(super) fn cmd_profiles(json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path);
    let mut store = open_store(&config)?;
    let ids = store.list()?;
    let profiles: Vec<ProfileJson> = ids.iter().map(|id| describe(&mut store, id)).collect();

    if json {
        let output = ProfilesOutput {
            count: profiles.len(),
            profiles,
        };
        println!("{}", to_json(&output)?);
        return Ok(());
    }

    if profiles.is_empty() {
        println!("No profiles stored.");
        return Ok(());
    }
    let keys: Vec<&str> = profiles.iter().map(|p| p.name.key()).collect();
    let w = kv_width(&keys, &[]);
    for p in &profiles {
        let topology = p.topology.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
        kv(
            p.name.key(),
            format_args!("{topology:<9}{} value(s)", p.values.len()),
            w,
        );
    }
    Ok(())
}

pub(super) fn cmd_show(id: &ProfileId, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path);
    let mut store = open_store(&config)?;
    let profile = describe(&mut store, id);

    if json {
        println!("{}", to_json(&profile)?);
        return Ok(());
    }

    let keys: Vec<String> = profile.values.keys().map(|k| format!("{k}:")).collect();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let w = kv_width(&["Profile:", "Values:"], &key_refs);
    kv("Profile:", id, w);
    if !profile.exists {
        kv("Values:", "profile does not exist", w);
        return Ok(());
    }
    if profile.values.is_empty() {
        kv("Values:", "none", w);
        return Ok(());
    }
    println!("Values:");
    for ((_, value), key) in profile.values.iter().zip(&key_refs) {
        kv_indent(key, value, w);
    }
    Ok(())
}

pub(super) fn cmd_create(id: &ProfileId, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path);
    let mut store = open_store(&config)?;
    store.entry(id).touch()?;
    println!("Created {id}");
    Ok(())
}

pub(super) fn cmd_delete(id: &ProfileId, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path);
    let mut store = open_store(&config)?;
    let mut entry = store.entry(id);
    if !entry.exists() {
        println!("{id} does not exist");
        return Ok(());
    }
    entry.delete_file()?;
    println!("Deleted {id}");
    Ok(())
}

pub(super) fn cmd_set(id: &ProfileId, key: &str, raw: &str, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path);
    let value = resolve_value(&config, key, raw);
    let mut store = open_store(&config)?;
    store.entry(id).set(key, value.clone())?;
    println!("{id}: {key} = {value}");
    Ok(())
}

pub(super) fn cmd_unset(id: &ProfileId, key: &str, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path);
    let mut store = open_store(&config)?;
    store.entry(id).delete(key)?;
    println!("{id}: {key} removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerctl_lib::config::SettingConfig;

    #[test]
    fn resolve_value_follows_configured_kind() {
        let mut config = Config::default();
        let mut rate = SettingConfig::new("Refresh Rate");
        rate.values = vec![Value::from("40"), Value::from("60")];
        config.settings.push(rate);

        assert_eq!(resolve_value(&config, "Refresh Rate", "60"), Value::from("60"));
        assert_eq!(resolve_value(&config, "ApplyDelay", "750"), Value::Int(750));
    }

    #[test]
    fn set_show_and_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.profiles_dir = dir.path().join("profiles").display().to_string();
        config.save_to(&config_path).unwrap();

        let id = super::super::profile_id(Some("game.exe"), false);
        cmd_set(&id, "TDP", "10W", Some(&config_path)).unwrap();

        let mut store = open_store(&config).unwrap();
        assert_eq!(store.entry(&id).get("TDP"), Some(Value::from("10W")));
        assert!(cmd_show(&id, false, Some(&config_path)).is_ok());
        assert!(cmd_profiles(true, Some(&config_path)).is_ok());

        cmd_unset(&id, "TDP", Some(&config_path)).unwrap();
        assert_eq!(store.entry(&id).get("TDP"), None);
        cmd_delete(&id, Some(&config_path)).unwrap();
        assert!(!store.entry(&id).exists());
    }
}
