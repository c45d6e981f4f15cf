//! Profile controller: maps the foreground process to a profile and keeps
//! the setting group in sync with it.
//!
//! Every tick the controller asks its [`ForegroundSource`] for the
//! foreground process and the display topology. A newly seen process gets a
//! topology-qualified [`ProfileId`] and is activated; a process that exits
//! drops back to Autostart once nothing else is bound to its profile.
//!
//! Activation pushes the profile's persisted values as overlays right away
//! and schedules the actual apply as one cancellable batch, so only the most
//! recent profile's values ever reach the controls.
//!
//! User edits to persistent settings are written into the current profile.
//! The value each setting had before its first edit is remembered and put
//! back when the controller returns to Autostart.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::engine::Task;
use crate::error::Result;
use crate::foreground::{ForegroundSource, ProcessId};
use crate::group::SettingGroup;
use crate::scheduler::{CancelToken, Scheduler};
use crate::setting::{Origin, ValueChange};
use crate::store::{ProfileId, ProfileStore, Topology};
use crate::value::Value;

/// Persisted key holding a profile's own apply delay in milliseconds.
pub const APPLY_DELAY_KEY: &str = "ApplyDelay";

/// Default delay between activating a profile and applying its values.
pub const DEFAULT_APPLY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Apply delay for profiles without an `ApplyDelay` value.
    pub apply_delay: Duration,
    /// Persist user edits into profiles that don't exist yet.
    pub auto_create: bool,
    /// Process names (case-insensitive) that never get a profile.
    pub ignore: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            apply_delay: DEFAULT_APPLY_DELAY,
            auto_create: true,
            ignore: Vec::new(),
        }
    }
}

/// A scheduled profile apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileBatch {
    pub id: ProfileId,
    /// Pre-edit values to put back after the profile's own values.
    pub restore: Vec<(String, Value)>,
}

/// Everything the controller mutates, borrowed from the engine per call.
pub struct Context<'a> {
    pub group: &'a mut SettingGroup,
    pub store: &'a mut ProfileStore,
    pub timers: &'a mut Scheduler<Task>,
    pub now: Instant,
}

struct PendingBatch {
    token: CancelToken,
    restore: Vec<(String, Value)>,
}

pub struct ProfileController {
    config: ControllerConfig,
    own_pid: ProcessId,
    watched: BTreeMap<ProcessId, ProfileId>,
    current: ProfileId,
    topology: Option<Topology>,
    revert: BTreeMap<String, Value>,
    pending: Option<PendingBatch>,
}

impl ProfileController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            own_pid: std::process::id(),
            watched: BTreeMap::new(),
            current: ProfileId::autostart(),
            topology: None,
            revert: BTreeMap::new(),
            pending: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The profile currently in control of the group.
    pub fn current(&self) -> &ProfileId {
        &self.current
    }

    /// Profiles bound to live processes, one per watched process.
    pub fn watched_profiles(&self) -> impl Iterator<Item = (ProcessId, &ProfileId)> {
        self.watched.iter().map(|(pid, id)| (*pid, id))
    }

    pub fn topology(&self) -> Option<Topology> {
        self.topology
    }

    /// Whether a profile batch is waiting to be applied.
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| !p.token.is_cancelled())
    }

    /// Pre-edit values waiting to be restored on return to Autostart.
    pub fn revert_buffer(&self) -> &BTreeMap<String, Value> {
        &self.revert
    }

    /// Activate the Autostart profile.
    pub fn start(&mut self, ctx: &mut Context<'_>) {
        self.activate(ctx, ProfileId::autostart());
    }

    // ── Foreground tracking ──

    /// One poll of the foreground source.
    pub fn tick(&mut self, ctx: &mut Context<'_>, source: &mut dyn ForegroundSource) {
        if let Some(docked) = source.external_display() {
            let topology = Topology::from_docked(docked);
            // Processes seen before the first answer were bound as regular.
            let changed = match self.topology {
                Some(t) => t != topology,
                None => self
                    .watched
                    .values()
                    .any(|id| id.topology() != Some(topology)),
            };
            if changed {
                log::info!(
                    "[profile] topology changed to {topology}, dropping {} watched process(es)",
                    self.watched.len()
                );
                self.watched.clear();
                if !self.current.is_autostart() {
                    self.activate(ctx, ProfileId::autostart());
                }
            }
            self.topology = Some(topology);
        }

        // A failed query repeats the last answer, which may name a process
        // that has since exited.
        if let Some(fg) = source.foreground()
            && fg.pid != self.own_pid
            && !self.is_ignored(&fg.name)
            && source.is_running(fg.pid) != Some(false)
        {
            self.bring_up(ctx, fg.pid, &fg.name);
        }

        let exited: Vec<ProcessId> = self
            .watched
            .keys()
            .copied()
            .filter(|&pid| source.is_running(pid) == Some(false))
            .collect();
        for pid in exited {
            self.remove(ctx, pid);
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.config
            .ignore
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(name))
    }

    fn bring_up(&mut self, ctx: &mut Context<'_>, pid: ProcessId, name: &str) {
        let id = match self.watched.get(&pid) {
            Some(id) => id.clone(),
            None => {
                let topology = self.topology.unwrap_or(Topology::Regular);
                let id = ProfileId::for_process(topology, name);
                log::info!("[profile] new process {pid} ({name}) -> {id}");
                self.watched.insert(pid, id.clone());
                id
            }
        };
        if id != self.current {
            self.activate(ctx, id);
        }
    }

    /// Forget an exited process. Reverts to Autostart when it was the last
    /// process bound to the current profile.
    pub fn remove(&mut self, ctx: &mut Context<'_>, pid: ProcessId) {
        let Some(id) = self.watched.remove(&pid) else {
            return;
        };
        log::info!("[profile] process {pid} exited ({id})");
        let still_bound = self.watched.values().any(|other| *other == id);
        if id == self.current && !still_bound {
            self.activate(ctx, ProfileId::autostart());
        }
    }

    // ── Activation ──

    /// Make `id` the current profile: cancel any pending batch, push the
    /// profile's overlays, and schedule its values to be applied.
    pub fn activate(&mut self, ctx: &mut Context<'_>, id: ProfileId) {
        self.cancel_pending();
        log::info!("[profile] activating {id} (was {})", self.current);
        self.current = id;

        let restore: Vec<(String, Value)> = if self.current.is_autostart() {
            std::mem::take(&mut self.revert).into_iter().collect()
        } else {
            Vec::new()
        };

        let entry = ctx.store.entry(&self.current);
        let values = entry.values();
        let exists = entry.exists();
        let delay = entry.get_int(APPLY_DELAY_KEY, self.config.apply_delay.as_millis() as i64);
        self.push_overlays(ctx, &values);

        if !exists && !self.config.auto_create && restore.is_empty() {
            log::debug!("[profile] {} has no stored values", self.current);
            return;
        }

        let delay = Duration::from_millis(delay.max(0) as u64);
        let batch = ProfileBatch {
            id: self.current.clone(),
            restore: restore.clone(),
        };
        let token = ctx
            .timers
            .schedule_after(ctx.now, delay, Task::ApplyProfile(batch));
        self.pending = Some(PendingBatch { token, restore });
    }

    /// Cancel the outstanding batch. Values it would have restored go back
    /// into the revert buffer.
    fn cancel_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.token.is_cancelled() {
            return;
        }
        pending.token.cancel();
        log::debug!("[profile] cancelled pending batch for {}", self.current);
        for (name, value) in pending.restore {
            self.revert.entry(name).or_insert(value);
        }
    }

    fn push_overlays(&self, ctx: &mut Context<'_>, values: &BTreeMap<String, Value>) {
        for setting in ctx.group.iter_mut().filter(|s| s.is_persistent()) {
            setting.set_profile_overlay(values.get(setting.name()).cloned());
        }
    }

    /// Apply a profile batch. Runs when its timer fires.
    ///
    /// A persisted value that fails to apply is deleted from the profile and
    /// its overlay cleared; the rest of the batch still runs.
    pub fn run_batch(&mut self, ctx: &mut Context<'_>, batch: ProfileBatch) {
        self.pending = None;
        if batch.id != self.current {
            log::debug!("[profile] skipping stale batch for {}", batch.id);
            return;
        }

        let mut entry = ctx.store.entry(&batch.id);
        let values = entry.values();
        for id in ctx.group.persistent_ids() {
            let Some(setting) = ctx.group.get_mut(id) else {
                continue;
            };
            let Some(value) = values.get(setting.name()).cloned() else {
                continue;
            };
            match setting.set(value.clone(), Origin::Profile, false, ctx.timers, ctx.now) {
                Ok(_) => log::debug!("[profile] {}: {} = {value}", batch.id, setting.name()),
                Err(e) => {
                    log::warn!(
                        "[profile] {}: dropping {} = {value}: {e}",
                        batch.id,
                        setting.name()
                    );
                    setting.clear_profile();
                    if let Err(e) = entry.delete(setting.name()) {
                        log::warn!("[store] {}: {e}", batch.id);
                    }
                }
            }
        }

        for (name, value) in batch.restore {
            if values.contains_key(&name) {
                continue;
            }
            let Some(setting) = ctx.group.find(&name).and_then(|id| ctx.group.get_mut(id)) else {
                continue;
            };
            match setting.set(value.clone(), Origin::User, false, ctx.timers, ctx.now) {
                Ok(_) => log::info!("[profile] restored {name} = {value}"),
                Err(e) => log::warn!("[profile] could not restore {name} = {value}: {e}"),
            }
        }
    }

    // ── User edits ──

    /// Record a user edit into the current profile.
    pub fn on_user_change(&mut self, ctx: &mut Context<'_>, change: &ValueChange) {
        let Some(setting) = ctx
            .group
            .find(&change.setting)
            .and_then(|id| ctx.group.get_mut(id))
        else {
            return;
        };
        if !setting.is_persistent() || self.current.is_autostart() {
            return;
        }

        if let Some(old) = &change.old {
            if !self.revert.contains_key(&change.setting) {
                log::debug!("[profile] remembering {} = {old}", change.setting);
                self.revert.insert(change.setting.clone(), old.clone());
            }
        }

        let mut entry = ctx.store.entry(&self.current);
        if !entry.exists() && !self.config.auto_create {
            return;
        }
        match entry.set(&change.setting, change.new.clone()) {
            Ok(()) => {
                setting.set_profile_overlay(Some(change.new.clone()));
                log::info!(
                    "[profile] stored {}: {} = {}",
                    self.current,
                    change.setting,
                    change.new
                );
            }
            Err(e) => log::warn!("[store] {}: {e}", self.current),
        }
    }

    // ── Profile maintenance ──

    /// Create the current profile and snapshot the active value of every
    /// setting marked `persist_on_create`.
    pub fn create_profile(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        let mut entry = ctx.store.entry(&self.current);
        entry.touch()?;
        for setting in ctx
            .group
            .iter()
            .filter(|s| s.is_persistent() && s.persists_on_create())
        {
            if let Some(active) = setting.active() {
                entry.set(setting.name(), active.clone())?;
            }
        }
        let values = entry.values();
        log::info!("[profile] created {}", self.current);
        self.push_overlays(ctx, &values);
        Ok(())
    }

    /// Delete the current profile's stored values.
    pub fn delete_profile(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        ctx.store.entry(&self.current).delete_file()?;
        log::info!("[profile] deleted {}", self.current);
        self.push_overlays(ctx, &BTreeMap::new());
        Ok(())
    }
}
