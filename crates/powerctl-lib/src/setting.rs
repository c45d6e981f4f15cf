//! A single adjustable setting with debounced application.
//!
//! Each [`Setting`] tracks three values:
//!
//! - `selected`: what the user last picked (or the confirmed value after an
//!   apply normalised it);
//! - `profile`: the overlay pushed by the active profile, which takes
//!   precedence over `selected` for rendering and for what gets applied;
//! - `active`: the last value the control confirmed.
//!
//! [`Setting::set`] is the only mutator of `selected`/`profile`. It cancels
//! any pending debounce timer and either applies synchronously
//! (`apply_delay == 0`) or arms a new timer in the engine's scheduler.

use std::time::{Duration, Instant};

use crate::control::{Applied, Control};
use crate::engine::Task;
use crate::error::{PowerctlError, Result};
use crate::scheduler::{CancelToken, Scheduler};
use crate::value::Value;

/// Position of a setting inside its group.
pub type SettingId = usize;

/// Who asked for a value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// User navigation or an explicit user `set`.
    User,
    /// The active profile.
    Profile,
}

/// Emitted by [`Setting::set`] when `persist` is requested and the effective
/// value actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    pub setting: String,
    pub old: Option<Value>,
    pub new: Value,
}

pub struct Setting {
    id: SettingId,
    name: String,
    values: Vec<Value>,
    selected: Option<Value>,
    active: Option<Value>,
    profile: Option<Value>,
    apply_delay: Duration,
    persistent: bool,
    persist_on_create: bool,
    visible: bool,
    selectable: bool,
    control: Box<dyn Control>,
    pending: Option<CancelToken>,
    last_error: Option<String>,
}

impl std::fmt::Debug for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setting")
            .field("name", &self.name)
            .field("values", &self.values)
            .field("selected", &self.selected)
            .field("active", &self.active)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl Setting {
    pub fn new(name: impl Into<String>, control: impl Control + 'static) -> Self {
        Self {
            id: 0,
            name: name.into(),
            values: Vec::new(),
            selected: None,
            active: None,
            profile: None,
            apply_delay: Duration::ZERO,
            persistent: false,
            persist_on_create: false,
            visible: true,
            selectable: true,
            control: Box::new(control),
            pending: None,
            last_error: None,
        }
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self.ensure_defaults();
        self
    }

    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_persist_on_create(mut self, persist_on_create: bool) -> Self {
        self.persist_on_create = persist_on_create;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_selectable(mut self, selectable: bool) -> Self {
        self.selectable = selectable;
        self
    }

    pub(crate) fn set_id(&mut self, id: SettingId) {
        self.id = id;
    }

    // ── Accessors ──

    pub fn id(&self) -> SettingId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn selected(&self) -> Option<&Value> {
        self.selected.as_ref()
    }

    pub fn active(&self) -> Option<&Value> {
        self.active.as_ref()
    }

    pub fn profile_value(&self) -> Option<&Value> {
        self.profile.as_ref()
    }

    /// The value that is rendered and applied: the profile overlay if any,
    /// otherwise the selected value.
    pub fn effective(&self) -> Option<&Value> {
        self.profile.as_ref().or(self.selected.as_ref())
    }

    pub fn apply_delay(&self) -> Duration {
        self.apply_delay
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn persists_on_create(&self) -> bool {
        self.persist_on_create
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Whether group navigation may land on this setting.
    pub fn is_navigable(&self) -> bool {
        self.visible && self.selectable && !self.values.is_empty()
    }

    /// Whether a debounced apply is waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // ── Probing ──

    /// Re-probe the active value and the legal value set. A probe with no
    /// answer leaves the cached state unchanged.
    pub fn refresh(&mut self) {
        if let Some(current) = self.control.current() {
            self.active = Some(current);
        }
        if let Some(values) = self.control.legal_values() {
            self.values = values;
        }
        self.ensure_defaults();
    }

    /// Once values exist, `active` defaults to the first legal value and
    /// `selected` defaults to `active`.
    fn ensure_defaults(&mut self) {
        if self.values.is_empty() {
            return;
        }
        if self.active.is_none() {
            self.active = self.values.first().cloned();
        }
        if self.selected.is_none() {
            self.selected = self.active.clone();
        }
    }

    // ── Profile overlay ──

    /// Replace the profile overlay without scheduling an apply.
    pub fn set_profile_overlay(&mut self, value: Option<Value>) {
        self.profile = value;
    }

    pub fn clear_profile(&mut self) {
        self.profile = None;
    }

    // ── Mutation ──

    /// Request `value` for this setting.
    ///
    /// `Origin::Profile` writes the overlay; `Origin::User` writes `selected`
    /// and drops any overlay so the user's pick is what gets applied. With
    /// `persist`, a [`ValueChange`] is returned when the effective value
    /// changed, for the profile controller to record.
    ///
    /// Fails with `InvalidValue` if `value` is not legal, or with the apply
    /// error when applying synchronously.
    pub fn set(
        &mut self,
        value: Value,
        origin: Origin,
        persist: bool,
        timers: &mut Scheduler<Task>,
        now: Instant,
    ) -> Result<Option<ValueChange>> {
        if !self.values.is_empty() && !self.values.contains(&value) {
            return Err(PowerctlError::InvalidValue {
                setting: self.name.clone(),
                value: value.to_string(),
            });
        }

        let old = self.effective().cloned();
        match origin {
            Origin::Profile => self.profile = Some(value.clone()),
            Origin::User => {
                self.selected = Some(value.clone());
                self.profile = None;
            }
        }

        let change = (persist && old.as_ref() != Some(&value)).then(|| ValueChange {
            setting: self.name.clone(),
            old,
            new: value,
        });

        self.schedule_apply(timers, now)?;
        Ok(change)
    }

    /// Move to the next legal value, clamped at the last one.
    pub fn select_next(
        &mut self,
        timers: &mut Scheduler<Task>,
        now: Instant,
    ) -> Result<Option<ValueChange>> {
        self.step(1, timers, now)
    }

    /// Move to the previous legal value, clamped at the first one.
    pub fn select_prev(
        &mut self,
        timers: &mut Scheduler<Task>,
        now: Instant,
    ) -> Result<Option<ValueChange>> {
        self.step(-1, timers, now)
    }

    fn step(
        &mut self,
        dir: isize,
        timers: &mut Scheduler<Task>,
        now: Instant,
    ) -> Result<Option<ValueChange>> {
        if self.values.is_empty() {
            return Ok(None);
        }
        let last = self.values.len() - 1;
        let index = match self.effective().and_then(|v| self.values.iter().position(|x| x == v)) {
            Some(i) => i.saturating_add_signed(dir).min(last),
            None => 0,
        };
        let value = self.values[index].clone();
        self.set(value, Origin::User, true, timers, now)
    }

    fn schedule_apply(&mut self, timers: &mut Scheduler<Task>, now: Instant) -> Result<()> {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        if self.apply_delay.is_zero() {
            return self.apply_now();
        }
        self.pending = Some(timers.schedule_after(now, self.apply_delay, Task::ApplySetting(self.id)));
        Ok(())
    }

    /// Debounce timer fired. Errors are logged and kept in `last_error`.
    pub fn fire(&mut self) {
        self.pending = None;
        if let Err(e) = self.apply_now() {
            log::warn!("[setting] {}: {e}", self.name);
        }
    }

    fn apply_now(&mut self) -> Result<()> {
        let Some(requested) = self.effective().cloned() else {
            return Ok(());
        };
        match self.control.apply(&requested) {
            Ok(Applied::Confirmed(confirmed)) => {
                if confirmed != requested {
                    log::debug!(
                        "[setting] {}: requested {requested}, confirmed {confirmed}",
                        self.name
                    );
                }
                if self.profile.as_ref() == Some(&requested) {
                    self.profile = Some(confirmed.clone());
                }
                self.active = Some(confirmed.clone());
                self.selected = Some(confirmed);
                self.last_error = None;
                Ok(())
            }
            Ok(Applied::Unconfirmed(_)) => {
                log::info!("[setting] {}: {requested} not confirmed yet", self.name);
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    // ── Rendering ──

    /// One display line. Shows a "still confirming" note while the confirmed
    /// value lags behind the requested one.
    pub fn render_line(&self, is_selected: bool) -> String {
        let marker = if is_selected { "> " } else { "  " };
        let shown = self
            .effective()
            .map(ToString::to_string)
            .unwrap_or_else(|| "?".into());
        let mut line = format!("{marker}{:<20}{shown}", format!("{}:", self.name));
        if self.active.as_ref() != self.effective() {
            let active = self
                .active
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "?".into());
            line.push_str(&format!(" (still confirming, active: {active})"));
        }
        line
    }
}
