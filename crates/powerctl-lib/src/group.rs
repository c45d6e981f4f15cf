//! Ordered setting collection with cursor navigation and text rendering.
//!
//! Insertion order is both navigation order and render order. The cursor
//! only ever rests on a navigable setting (visible, selectable, with legal
//! values) and wraps around at either end. While the group is hidden, the
//! first navigation call only reveals it.

use std::time::Instant;

use crate::engine::Task;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::setting::{Setting, SettingId, ValueChange};

#[derive(Debug)]
pub struct SettingGroup {
    title: String,
    items: Vec<Setting>,
    selected: Option<SettingId>,
    visible: bool,
}

impl SettingGroup {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
            selected: None,
            visible: false,
        }
    }

    /// Append a setting and return its id.
    pub fn push(&mut self, mut setting: Setting) -> SettingId {
        let id = self.items.len();
        setting.set_id(id);
        self.items.push(setting);
        self.fix_selection();
        id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: SettingId) -> Option<&Setting> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: SettingId) -> Option<&mut Setting> {
        self.items.get_mut(id)
    }

    pub fn find(&self, name: &str) -> Option<SettingId> {
        self.items.iter().position(|s| s.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Setting> {
        self.items.iter_mut()
    }

    /// Ids of settings that take part in profiles.
    pub fn persistent_ids(&self) -> Vec<SettingId> {
        self.items
            .iter()
            .filter(|s| s.is_persistent())
            .map(Setting::id)
            .collect()
    }

    pub fn selected(&self) -> Option<SettingId> {
        self.selected
    }

    pub fn selected_setting(&self) -> Option<&Setting> {
        self.selected.and_then(|i| self.items.get(i))
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Reveal the group. Returns `true` if it was hidden (the reveal consumed
    /// the caller's navigation intent).
    pub fn show(&mut self) -> bool {
        if self.visible {
            return false;
        }
        self.visible = true;
        self.refresh();
        true
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    pub fn set_visible(&mut self, id: SettingId, visible: bool) {
        if let Some(s) = self.items.get_mut(id) {
            s.set_visible(visible);
        }
        self.fix_selection();
    }

    /// Re-probe every setting, then repair the cursor if the selected setting
    /// lost its values.
    pub fn refresh(&mut self) {
        for item in &mut self.items {
            item.refresh();
        }
        self.fix_selection();
    }

    // ── Navigation ──

    /// Move the cursor to the next navigable setting, wrapping.
    pub fn next(&mut self) {
        if self.show() {
            return;
        }
        self.step(1);
    }

    /// Move the cursor to the previous navigable setting, wrapping.
    pub fn prev(&mut self) {
        if self.show() {
            return;
        }
        self.step(-1);
    }

    /// Advance the selected setting's value.
    pub fn select_next(
        &mut self,
        timers: &mut Scheduler<Task>,
        now: Instant,
    ) -> Result<Option<ValueChange>> {
        if self.show() {
            return Ok(None);
        }
        match self.selected.and_then(|i| self.items.get_mut(i)) {
            Some(s) => s.select_next(timers, now),
            None => Ok(None),
        }
    }

    /// Retreat the selected setting's value.
    pub fn select_prev(
        &mut self,
        timers: &mut Scheduler<Task>,
        now: Instant,
    ) -> Result<Option<ValueChange>> {
        if self.show() {
            return Ok(None);
        }
        match self.selected.and_then(|i| self.items.get_mut(i)) {
            Some(s) => s.select_prev(timers, now),
            None => Ok(None),
        }
    }

    fn step(&mut self, dir: isize) {
        let n = self.items.len();
        if n == 0 {
            return;
        }
        let n_signed = n as isize;
        // With no cursor, start just outside the range so the first step
        // lands on index 0 (forward) or n-1 (backward).
        let mut index = match self.selected {
            Some(i) => i as isize,
            None if dir > 0 => -1,
            None => n_signed,
        };
        for _ in 0..n {
            index = (index + dir).rem_euclid(n_signed);
            if self.items[index as usize].is_navigable() {
                self.selected = Some(index as usize);
                return;
            }
        }
    }

    fn fix_selection(&mut self) {
        if self
            .selected
            .and_then(|i| self.items.get(i))
            .is_some_and(Setting::is_navigable)
        {
            return;
        }
        let start = self.selected.unwrap_or(0);
        let n = self.items.len();
        self.selected = (0..n)
            .map(|k| (start + k) % n)
            .find(|&i| self.items[i].is_navigable());
    }

    // ── Rendering ──

    /// Lazily render the group: the title line followed by one line per
    /// visible setting with legal values. Never mutates state.
    pub fn render(&self) -> impl Iterator<Item = String> + '_ {
        let title = (!self.title.is_empty()).then(|| self.title.clone());
        title.into_iter().chain(
            self.items
                .iter()
                .filter(|s| s.is_visible() && !s.values().is_empty())
                .map(|s| s.render_line(self.selected == Some(s.id()))),
        )
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for line in self.render() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}
