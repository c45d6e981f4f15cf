//! Engine: owns the setting group, profile store, timer queue and profile
//! controller, and is the single entry point for the daemon loop and the
//! user-facing commands.
//!
//! The engine is single-threaded. Callers pass the current time into every
//! entry point and call [`Engine::run_due`] whenever
//! [`Engine::next_deadline`] has passed.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{Config, SettingConfig};
use crate::control::{CommandControl, FileControl};
use crate::controller::{Context, ControllerConfig, ProfileBatch, ProfileController};
use crate::error::{PowerctlError, Result};
use crate::foreground::{ForegroundSource, ProcessId};
use crate::group::SettingGroup;
use crate::guard::{InstanceLock, NoLock};
use crate::scheduler::Scheduler;
use crate::setting::{Origin, Setting, SettingId, ValueChange};
use crate::store::{ProfileId, ProfileStore, Topology};
use crate::value::Value;

/// Title line of the rendered group.
pub const GROUP_TITLE: &str = "Power Control";

/// Delayed work owned by the engine's scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// A setting's debounce timer.
    ApplySetting(SettingId),
    /// A profile's delayed apply batch.
    ApplyProfile(ProfileBatch),
}

pub struct Engine {
    group: SettingGroup,
    store: ProfileStore,
    timers: Scheduler<Task>,
    controller: ProfileController,
}

impl Engine {
    pub fn new(group: SettingGroup, store: ProfileStore, config: ControllerConfig) -> Self {
        Self {
            group,
            store,
            timers: Scheduler::new(),
            controller: ProfileController::new(config),
        }
    }

    /// Build the engine from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        if let Err(errors) = config.validate() {
            let msg: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(PowerctlError::Config(msg.join("; ")));
        }
        let dir = config
            .profiles_path()
            .ok_or_else(|| PowerctlError::Config("no profiles directory".into()))?;

        let mut group = SettingGroup::new(GROUP_TITLE);
        for sc in &config.settings {
            group.push(build_setting(sc, config));
        }
        Ok(Self::new(
            group,
            ProfileStore::open_dir(dir),
            config.controller_config(),
        ))
    }

    fn split(&mut self, now: Instant) -> (&mut ProfileController, Context<'_>) {
        (
            &mut self.controller,
            Context {
                group: &mut self.group,
                store: &mut self.store,
                timers: &mut self.timers,
                now,
            },
        )
    }

    /// Probe every setting and activate the Autostart profile.
    pub fn start(&mut self, now: Instant) {
        self.group.refresh();
        let (controller, mut ctx) = self.split(now);
        controller.start(&mut ctx);
    }

    /// One foreground/topology poll.
    pub fn poll(&mut self, now: Instant, source: &mut dyn ForegroundSource) {
        let (controller, mut ctx) = self.split(now);
        controller.tick(&mut ctx, source);
    }

    /// Run every task due at `now`. Returns how many ran.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        while let Some(task) = self.timers.pop_due(now) {
            ran += 1;
            match task {
                Task::ApplySetting(id) => {
                    if let Some(setting) = self.group.get_mut(id) {
                        setting.fire();
                    }
                }
                Task::ApplyProfile(batch) => {
                    let (controller, mut ctx) = self.split(now);
                    controller.run_batch(&mut ctx, batch);
                }
            }
        }
        ran
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Re-probe every setting.
    pub fn refresh(&mut self) {
        self.group.refresh();
    }

    // ── Navigation ──

    pub fn next(&mut self) {
        self.group.next();
    }

    pub fn prev(&mut self) {
        self.group.prev();
    }

    pub fn select_next(&mut self, now: Instant) -> Result<()> {
        let change = self.group.select_next(&mut self.timers, now)?;
        self.record(change, now);
        Ok(())
    }

    pub fn select_prev(&mut self, now: Instant) -> Result<()> {
        let change = self.group.select_prev(&mut self.timers, now)?;
        self.record(change, now);
        Ok(())
    }

    /// Set a setting by name, as a user edit.
    pub fn set(&mut self, name: &str, value: Value, now: Instant) -> Result<()> {
        let id = self
            .group
            .find(name)
            .ok_or_else(|| PowerctlError::UnknownSetting(name.to_string()))?;
        let Some(setting) = self.group.get_mut(id) else {
            return Err(PowerctlError::UnknownSetting(name.to_string()));
        };
        let change = setting.set(value, Origin::User, true, &mut self.timers, now)?;
        self.record(change, now);
        Ok(())
    }

    /// Like [`Engine::set`], but resolves `raw` against the setting's legal
    /// values by their text first, so `"60"` finds `60` whatever its kind.
    pub fn set_text(&mut self, name: &str, raw: &str, now: Instant) -> Result<()> {
        let setting = self
            .group
            .find(name)
            .and_then(|id| self.group.get(id))
            .ok_or_else(|| PowerctlError::UnknownSetting(name.to_string()))?;
        let value = resolve_value(setting, raw);
        self.set(name, value, now)
    }

    fn record(&mut self, change: Option<ValueChange>, now: Instant) {
        if let Some(change) = change {
            let (controller, mut ctx) = self.split(now);
            controller.on_user_change(&mut ctx, &change);
        }
    }

    // ── Visibility and rendering ──

    /// Reveal the group. Returns `true` if it was hidden.
    pub fn show(&mut self) -> bool {
        self.group.show()
    }

    pub fn hide(&mut self) {
        self.group.hide();
    }

    pub fn render(&self) -> impl Iterator<Item = String> + '_ {
        self.group.render()
    }

    pub fn render_text(&self) -> String {
        self.group.render_text()
    }

    // ── Profiles ──

    pub fn create_profile(&mut self, now: Instant) -> Result<()> {
        let (controller, mut ctx) = self.split(now);
        controller.create_profile(&mut ctx)
    }

    pub fn delete_profile(&mut self, now: Instant) -> Result<()> {
        let (controller, mut ctx) = self.split(now);
        controller.delete_profile(&mut ctx)
    }

    // ── Accessors ──

    pub fn group(&self) -> &SettingGroup {
        &self.group
    }

    pub fn controller(&self) -> &ProfileController {
        &self.controller
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ProfileStore {
        &mut self.store
    }

    /// Serializable snapshot of the engine state.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            profile: self.controller.current().clone(),
            topology: self.controller.topology(),
            profile_pending: self.controller.is_pending(),
            watched: self
                .controller
                .watched_profiles()
                .map(|(pid, id)| WatchedProcess {
                    pid,
                    profile: id.clone(),
                })
                .collect(),
            settings: self.group.iter().map(SettingStatus::from).collect(),
        }
    }
}

fn build_setting(sc: &SettingConfig, config: &Config) -> Setting {
    let timeout = config.command_timeout();
    let setting = if sc.write_path.trim().is_empty() {
        Setting::new(
            &sc.name,
            CommandControl::new(
                &sc.apply_command,
                &sc.current_command,
                &sc.values_command,
                timeout,
            ),
        )
    } else if sc.guarded {
        let lock = InstanceLock::new(&config.lock_name);
        Setting::new(
            &sc.name,
            FileControl::new(sc.write_path.trim(), sc.write_map.clone(), lock)
                .with_values_command(&sc.values_command, timeout),
        )
    } else {
        Setting::new(
            &sc.name,
            FileControl::new(sc.write_path.trim(), sc.write_map.clone(), NoLock)
                .with_values_command(&sc.values_command, timeout),
        )
    };
    setting
        .with_values(sc.values.clone())
        .with_apply_delay(Duration::from_millis(sc.apply_delay_ms))
        .with_persistent(sc.persistent)
        .with_persist_on_create(sc.persist_on_create)
        .with_visible(sc.visible)
}

fn resolve_value(setting: &Setting, raw: &str) -> Value {
    let raw = raw.trim();
    setting
        .values()
        .iter()
        .find(|v| v.to_string() == raw)
        .cloned()
        .unwrap_or_else(|| Value::parse(raw))
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub profile: ProfileId,
    pub topology: Option<Topology>,
    pub profile_pending: bool,
    pub watched: Vec<WatchedProcess>,
    pub settings: Vec<SettingStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchedProcess {
    pub pid: ProcessId,
    pub profile: ProfileId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingStatus {
    pub name: String,
    pub values: Vec<Value>,
    pub selected: Option<Value>,
    pub active: Option<Value>,
    pub profile: Option<Value>,
    pub persistent: bool,
    pub pending: bool,
    pub last_error: Option<String>,
}

impl From<&Setting> for SettingStatus {
    fn from(s: &Setting) -> Self {
        Self {
            name: s.name().to_string(),
            values: s.values().to_vec(),
            selected: s.selected().cloned(),
            active: s.active().cloned(),
            profile: s.profile_value().cloned(),
            persistent: s.is_persistent(),
            pending: s.is_pending(),
            last_error: s.last_error().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mock::MockControl;
    use crate::store::mock::MemoryBackend;

    fn engine_with(mock: &MockControl, delay_ms: u64) -> (Engine, MemoryBackend) {
        let mut group = SettingGroup::new(GROUP_TITLE);
        group.push(
            Setting::new("Refresh Rate", mock.clone())
                .with_values(vec![Value::Int(40), Value::Int(60)])
                .with_apply_delay(Duration::from_millis(delay_ms))
                .with_persistent(true),
        );
        let backend = MemoryBackend::new();
        let engine = Engine::new(
            group,
            ProfileStore::new(backend.clone()),
            ControllerConfig::default(),
        );
        (engine, backend)
    }

    #[test]
    fn set_unknown_setting_fails() {
        let (mut engine, _) = engine_with(&MockControl::new(), 0);
        let err = engine
            .set("Fan", Value::from("High"), Instant::now())
            .unwrap_err();
        assert!(matches!(err, PowerctlError::UnknownSetting(_)));
    }

    #[test]
    fn set_text_matches_legal_values_by_text() {
        let mock = MockControl::new();
        let (mut engine, _) = engine_with(&mock, 0);
        engine.set_text("Refresh Rate", "60", Instant::now()).unwrap();
        assert_eq!(mock.applied(), vec![Value::Int(60)]);
    }

    #[test]
    fn run_due_fires_debounced_apply() {
        let mock = MockControl::new();
        let (mut engine, _) = engine_with(&mock, 200);
        let t0 = Instant::now();
        engine.set("Refresh Rate", Value::Int(60), t0).unwrap();
        assert_eq!(engine.next_deadline(), Some(t0 + Duration::from_millis(200)));
        assert_eq!(engine.run_due(t0 + Duration::from_millis(199)), 0);
        assert_eq!(engine.run_due(t0 + Duration::from_millis(200)), 1);
        assert_eq!(mock.applied(), vec![Value::Int(60)]);
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn status_reports_settings_and_profile() {
        let (mut engine, _) = engine_with(&MockControl::new(), 0);
        engine.start(Instant::now());
        let status = engine.status();
        assert!(status.profile.is_autostart());
        assert_eq!(status.settings.len(), 1);
        assert_eq!(status.settings[0].active, Some(Value::Int(40)));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["profile"], "PowerControl.Autostart");
        assert_eq!(json["settings"][0]["selected"], 40);
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let mut config = Config::default();
        config.settings.push(SettingConfig::new(""));
        let err = Engine::from_config(&config).err().unwrap();
        assert!(matches!(err, PowerctlError::Config(_)));
    }

    #[test]
    fn from_config_builds_settings_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.profiles_dir = dir.path().display().to_string();
        let mut tdp = SettingConfig::new("TDP");
        tdp.values = vec![Value::from("5W"), Value::from("10W")];
        let mut gpu = SettingConfig::new("GPU");
        gpu.values = vec![Value::from("Auto")];
        gpu.write_path = dir.path().join("gpu").display().to_string();
        gpu.persistent = false;
        config.settings = vec![tdp, gpu];

        let engine = Engine::from_config(&config).unwrap();
        let names: Vec<&str> = engine.group().iter().map(Setting::name).collect();
        assert_eq!(names, vec!["TDP", "GPU"]);
        assert!(!engine.group().get(1).unwrap().is_persistent());
        assert_eq!(engine.group().title(), GROUP_TITLE);
    }
}
