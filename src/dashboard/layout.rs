//! Grid placement for dashboard widgets.
//!
//! All placement runs in grid units. A layout is collision free when no
//! two widget rectangles overlap; touching edges do not count.

use crate::common::{Subscribers, Subscription};
use crate::dashboard::config::{Breakpoint, DashboardConfig, LayoutPatch, WidgetLayout};
use crate::dashboard::instance::WidgetInstance;
use crate::dashboard::registry::WidgetRegistry;
use crate::dashboard::storage::{LayoutStore, MemoryLayoutStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Rows scanned by the placement search before falling back to the
/// bottom of the layout.
const SEARCH_ROWS: i32 = 100;

const RESOLVE_RADIUS: i32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LayoutChangeKind {
    Add,
    Remove,
    Move,
    Resize,
}

impl LayoutChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutChangeKind::Add => "add",
            LayoutChangeKind::Remove => "remove",
            LayoutChangeKind::Move => "move",
            LayoutChangeKind::Resize => "resize",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutChange {
    #[serde(rename = "type")]
    pub kind: LayoutChangeKind,
    pub instance_id: String,
    pub layout: WidgetLayout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_layout: Option<WidgetLayout>,
}

/// Saved form of a dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedLayout {
    pub config: DashboardConfig,
    pub timestamp: DateTime<Utc>,
}

/// AABB overlap with touching edges treated as free.
pub fn collides(a: &WidgetLayout, b: &WidgetLayout) -> bool {
    !(a.right() <= b.x || a.x >= b.right() || a.bottom() <= b.y || a.y >= b.bottom())
}

/// Cells claimed so far, grown row by row as widgets are placed.
struct Occupancy {
    cols: usize,
    cells: Vec<Vec<bool>>,
}

impl Occupancy {
    fn new(cols: i32) -> Self {
        Self {
            cols: cols.max(1) as usize,
            cells: Vec::new(),
        }
    }

    fn is_free(&self, layout: &WidgetLayout) -> bool {
        for r in layout.y..layout.bottom() {
            let Some(row) = self.cells.get(r as usize) else {
                continue;
            };
            for c in layout.x..layout.right() {
                if row[c as usize] {
                    return false;
                }
            }
        }
        true
    }

    fn claim(&mut self, layout: &WidgetLayout) {
        let bottom = layout.bottom() as usize;
        if self.cells.len() < bottom {
            self.cells.resize(bottom, vec![false; self.cols]);
        }
        for r in layout.y..layout.bottom() {
            for c in layout.x..layout.right() {
                self.cells[r as usize][c as usize] = true;
            }
        }
    }
}

/// Owns the dashboard config and keeps its widget list collision free.
pub struct LayoutEngine {
    config: DashboardConfig,
    store: Box<dyn LayoutStore>,
    history: VecDeque<LayoutChange>,
    history_limit: usize,
    listeners: Subscribers<(), LayoutChange>,
    breakpoint: Breakpoint,
}

impl LayoutEngine {
    pub fn new(config: DashboardConfig) -> Self {
        Self::with_store(config, Box::new(MemoryLayoutStore::new()))
    }

    pub fn with_store(config: DashboardConfig, store: Box<dyn LayoutStore>) -> Self {
        Self {
            config,
            store,
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            listeners: Subscribers::new(),
            breakpoint: Breakpoint::default(),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn widgets(&self) -> &[WidgetInstance] {
        &self.config.widgets
    }

    pub fn get_widget(&self, id: &str) -> Option<&WidgetInstance> {
        self.config.widget(id)
    }

    fn grid_cols(&self) -> i32 {
        self.config.grid.cols.max(1)
    }

    /// Place `instance` and append it to the dashboard.
    ///
    /// Without a position the first free row-major cell is used. An
    /// explicit position that is out of bounds or occupied is moved to the
    /// nearest free cell. Returns `None` if the id is already placed.
    pub fn add_widget(
        &mut self,
        mut instance: WidgetInstance,
        position: Option<(i32, i32)>,
    ) -> Option<WidgetLayout> {
        if self.get_widget(&instance.id).is_some() {
            tracing::warn!(id = %instance.id, "widget already placed");
            return None;
        }
        let mut layout = instance.config.layout;
        layout.cols = layout.cols.clamp(1, self.grid_cols());
        layout.rows = layout.rows.max(1);

        let placed = match position {
            Some((x, y)) => {
                let wanted = layout.at(x, y);
                let fits = self.validate_layout(&wanted)
                    && !self.collides_with_others(&wanted, &instance.id);
                if fits {
                    wanted
                } else {
                    self.resolve_overlaps(&wanted, &instance.id)
                        .unwrap_or_else(|| self.find_optimal_position(&layout, None))
                }
            }
            None => self.find_optimal_position(&layout, None),
        };

        instance.config.layout = placed;
        let id = instance.id.clone();
        self.config.widgets.push(instance);
        self.record(LayoutChangeKind::Add, &id, placed, None);
        Some(placed)
    }

    pub fn remove_widget(&mut self, id: &str) -> bool {
        let Some(index) = self.config.widgets.iter().position(|w| w.id == id) else {
            return false;
        };
        let removed = self.config.widgets.remove(index);
        self.record(LayoutChangeKind::Remove, id, removed.config.layout, None);
        true
    }

    /// Apply `patch` to a widget's layout. Fails without mutating when the
    /// result is invalid or collides and no free cell is found nearby.
    pub fn update_widget_layout(&mut self, id: &str, patch: &LayoutPatch) -> bool {
        let Some(previous) = self.get_widget(id).map(|w| w.config.layout) else {
            return false;
        };
        let mut next = patch.apply(&previous);
        if !self.validate_layout(&next) {
            tracing::debug!(%id, "layout update rejected by validation");
            return false;
        }
        if self.collides_with_others(&next, id) {
            match self.resolve_overlaps(&next, id) {
                Some(resolved) => next = resolved,
                None => {
                    tracing::debug!(%id, "no free cell near requested layout");
                    return false;
                }
            }
        }
        if next == previous {
            return true;
        }
        if let Some(widget) = self.config.widgets.iter_mut().find(|w| w.id == id) {
            widget.config.layout = next;
            widget.touch();
        }
        let kind = if next.same_position(&previous) {
            LayoutChangeKind::Resize
        } else {
            LayoutChangeKind::Move
        };
        self.record(kind, id, next, Some(previous));
        true
    }

    pub fn validate_layout(&self, layout: &WidgetLayout) -> bool {
        let cols = self.grid_cols();
        layout.cols >= 1
            && layout.rows >= 1
            && layout.x >= 0
            && layout.y >= 0
            && layout.right() <= cols
            && layout.min_cols.map_or(true, |min| layout.cols >= min)
            && layout.max_cols.map_or(true, |max| layout.cols <= max)
            && layout.min_rows.map_or(true, |min| layout.rows >= min)
            && layout.max_rows.map_or(true, |max| layout.rows <= max)
    }

    fn collides_with_others(&self, layout: &WidgetLayout, id: &str) -> bool {
        self.config
            .widgets
            .iter()
            .any(|w| w.id != id && collides(layout, &w.config.layout))
    }

    /// First free row-major cell for a widget of `layout`'s size. `exclude`
    /// names a widget to ignore (the one being moved).
    pub fn find_optimal_position(
        &self,
        layout: &WidgetLayout,
        exclude: Option<&str>,
    ) -> WidgetLayout {
        let cols = layout.cols.clamp(1, self.grid_cols());
        let sized = WidgetLayout { cols, ..*layout };
        let ignore = exclude.unwrap_or_default();
        for y in 0..SEARCH_ROWS {
            for x in 0..=(self.grid_cols() - cols) {
                let candidate = sized.at(x, y);
                if !self.collides_with_others(&candidate, ignore) {
                    return candidate;
                }
            }
        }
        let max_y = self
            .config
            .widgets
            .iter()
            .filter(|w| w.id != ignore)
            .map(|w| w.config.layout.bottom())
            .max()
            .unwrap_or(0);
        sized.at(0, max_y)
    }

    /// Search expanding rings around `layout` (radius 1 to 10) for the
    /// first in-bounds position free of collisions.
    pub fn resolve_overlaps(&self, layout: &WidgetLayout, id: &str) -> Option<WidgetLayout> {
        for radius in 1..=RESOLVE_RADIUS {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs() != radius && dy.abs() != radius {
                        continue;
                    }
                    let candidate =
                        layout.at(layout.x.saturating_add(dx), layout.y.saturating_add(dy));
                    if self.validate_layout(&candidate)
                        && !self.collides_with_others(&candidate, id)
                    {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    /// Pack widgets toward the top-left, keeping their `(y, x)` order.
    /// Returns how many widgets moved.
    pub fn compact_layout(&mut self) -> usize {
        let cols = self.grid_cols();
        let mut order: Vec<usize> = (0..self.config.widgets.len()).collect();
        order.sort_by_key(|&i| {
            let l = &self.config.widgets[i].config.layout;
            (l.y, l.x)
        });

        let mut occupied = Occupancy::new(cols);
        let mut moves = Vec::new();
        for index in order {
            let previous = self.config.widgets[index].config.layout;
            let width = previous.cols.clamp(1, cols);
            let sized = WidgetLayout { cols: width, ..previous };
            let placed = (0..)
                .flat_map(|y| (0..=(cols - width)).map(move |x| (x, y)))
                .map(|(x, y)| sized.at(x, y))
                .find(|candidate| occupied.is_free(candidate))
                .unwrap_or(sized);
            occupied.claim(&placed);
            if placed != previous {
                let widget = &mut self.config.widgets[index];
                widget.config.layout = placed;
                widget.touch();
                moves.push((widget.id.clone(), placed, previous));
            }
        }
        let moved = moves.len();
        for (id, layout, previous) in moves {
            self.record(LayoutChangeKind::Move, &id, layout, Some(previous));
        }
        moved
    }

    /// Clamp widths and positions to the breakpoint's column count. Rows
    /// are untouched and collisions are not resolved.
    pub fn optimize_layout_for_breakpoint(&mut self, breakpoint: Breakpoint) {
        let bp_cols = self.config.grid.breakpoint(breakpoint).cols.max(1);
        let mut changes = Vec::new();
        for widget in &mut self.config.widgets {
            let previous = widget.config.layout;
            let cols = previous.cols.min(bp_cols).max(1);
            let x = previous.x.min(bp_cols - cols).max(0);
            if cols == previous.cols && x == previous.x {
                continue;
            }
            let next = WidgetLayout { cols, x, ..previous };
            widget.config.layout = next;
            widget.touch();
            let kind = if next.same_size(&previous) {
                LayoutChangeKind::Move
            } else {
                LayoutChangeKind::Resize
            };
            changes.push((kind, widget.id.clone(), next, previous));
        }
        for (kind, id, layout, previous) in changes {
            self.record(kind, &id, layout, Some(previous));
        }
    }

    pub fn current_breakpoint(&self) -> Breakpoint {
        self.breakpoint
    }

    /// Select the breakpoint for a viewport `width` in pixels. On change the
    /// grid takes the breakpoint's parameters and, when responsive, the
    /// layout is remapped.
    pub fn set_viewport_width(&mut self, width: u32) -> Breakpoint {
        let next = Breakpoint::for_width(width);
        if next == self.breakpoint {
            return next;
        }
        tracing::debug!(from = %self.breakpoint, to = %next, "breakpoint changed");
        self.breakpoint = next;
        let params = self.config.grid.breakpoint(next);
        self.config.grid.apply_breakpoint(&params);
        if self.config.grid.responsive {
            self.optimize_layout_for_breakpoint(next);
        }
        next
    }

    pub fn save_layout(&mut self, key: &str) -> anyhow::Result<()> {
        let saved = SavedLayout {
            config: self.config.clone(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&saved)?;
        self.store.save(key, &json)?;
        tracing::info!(%key, widgets = self.config.widgets.len(), "layout saved");
        Ok(())
    }

    /// Replace the dashboard with the one saved under `key`. Returns
    /// `false` without mutating if nothing usable is stored there.
    pub fn load_layout(&mut self, key: &str) -> bool {
        let content = match self.store.load(key) {
            Ok(Some(content)) => content,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to read saved layout");
                return false;
            }
        };
        match serde_json::from_str::<SavedLayout>(&content) {
            Ok(saved) => {
                self.config = saved.config;
                tracing::info!(%key, "layout loaded");
                true
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "saved layout is not valid");
                false
            }
        }
    }

    pub fn export_dashboard(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.config)?)
    }

    /// Replace the dashboard with an exported document. Requires `id`,
    /// `title`, `grid` and a `widgets` array; fails closed otherwise.
    pub fn import_dashboard(&mut self, json: &str) -> bool {
        let value: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "dashboard import is not valid JSON");
                return false;
            }
        };
        let complete = ["id", "title", "grid"]
            .iter()
            .all(|key| value.get(key).is_some())
            && value.get("widgets").map_or(false, Value::is_array);
        if !complete {
            tracing::warn!("dashboard import is missing required fields");
            return false;
        }
        match serde_json::from_value::<DashboardConfig>(value) {
            Ok(config) => {
                let widgets = config.widgets.len();
                tracing::info!(id = %config.id, widgets, "dashboard imported");
                self.config = config;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "dashboard import rejected");
                false
            }
        }
    }

    /// Drop widgets whose type is not registered. Returns one warning per
    /// dropped widget.
    pub fn sanitize(&mut self, registry: &WidgetRegistry) -> Vec<String> {
        self.config.sanitize(registry)
    }

    /// Replace the stored copy of an instance, keeping its placement.
    pub fn sync_instance(&mut self, instance: &WidgetInstance) -> bool {
        let Some(widget) = self.config.widgets.iter_mut().find(|w| w.id == instance.id) else {
            return false;
        };
        let layout = widget.config.layout;
        *widget = instance.clone();
        widget.config.layout = layout;
        true
    }

    pub fn history(&self) -> &VecDeque<LayoutChange> {
        &self.history
    }

    pub fn subscribe_changes(
        &self,
        handler: impl Fn(&LayoutChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe_fn(handler)
    }

    fn record(
        &mut self,
        kind: LayoutChangeKind,
        id: &str,
        layout: WidgetLayout,
        previous_layout: Option<WidgetLayout>,
    ) {
        let change = LayoutChange {
            kind,
            instance_id: id.to_string(),
            layout,
            previous_layout,
        };
        tracing::debug!(%id, change = kind.as_str(), "layout change");
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(change.clone());
        self.listeners.emit(&change);
    }
}
