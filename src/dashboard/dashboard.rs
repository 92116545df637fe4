use crate::dashboard::config::{Breakpoint, DashboardConfig, LayoutPatch};
use crate::dashboard::error::{DashboardError, DashboardResult};
use crate::dashboard::events::EventBus;
use crate::dashboard::instance::WidgetInstance;
use crate::dashboard::layout::LayoutEngine;
use crate::dashboard::orchestrator::{SharedRegistry, SharedRenderHost, WidgetOrchestrator};
use crate::dashboard::registry::WidgetRegistry;
use crate::dashboard::storage::{FileLayoutStore, LayoutStore, MemoryLayoutStore};
use crate::settings::Settings;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

pub const DEFAULT_DASHBOARD_ID: &str = "default";

/// One dashboard: its bus, registry, live instances and grid.
///
/// Instances are created by the orchestrator and then placed by the layout
/// engine; layout changes are mirrored back into the instance records.
pub struct Dashboard {
    settings: Settings,
    registry: SharedRegistry,
    orchestrator: WidgetOrchestrator,
    layout: LayoutEngine,
}

impl Dashboard {
    pub fn new(settings: Settings, registry: WidgetRegistry) -> Self {
        let config = DashboardConfig::new(DEFAULT_DASHBOARD_ID, "Dashboard", settings.grid.clone());
        Self::with_config(settings, registry, config)
    }

    pub fn with_config(
        settings: Settings,
        registry: WidgetRegistry,
        config: DashboardConfig,
    ) -> Self {
        let store: Box<dyn LayoutStore> = match &settings.layout_dir {
            Some(dir) => Box::new(FileLayoutStore::new(dir.clone())),
            None => Box::new(MemoryLayoutStore::new()),
        };
        let registry: SharedRegistry = Arc::new(RwLock::new(registry));
        let bus = EventBus::with_request_timeout(settings.request_timeout());
        let orchestrator = WidgetOrchestrator::new(Arc::clone(&registry), bus);
        let mut layout =
            LayoutEngine::with_store(config, store).with_history_limit(settings.history_limit);
        let warnings = layout.sanitize(&read(&registry));
        if !warnings.is_empty() {
            tracing::warn!(count = warnings.len(), "dashboard config sanitized");
        }
        let dashboard = Self {
            settings,
            registry,
            orchestrator,
            layout,
        };
        dashboard.reconcile_instances();
        dashboard
    }

    pub fn id(&self) -> &str {
        &self.layout.config().id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bus(&self) -> &EventBus {
        self.orchestrator.bus()
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub fn orchestrator(&self) -> &WidgetOrchestrator {
        &self.orchestrator
    }

    pub fn layout(&self) -> &LayoutEngine {
        &self.layout
    }

    pub fn layout_mut(&mut self) -> &mut LayoutEngine {
        &mut self.layout
    }

    pub fn config(&self) -> &DashboardConfig {
        self.layout.config()
    }

    /// Create an instance of `widget_type` and place it on the grid.
    pub fn add_widget(
        &mut self,
        widget_type: &str,
        overrides: Value,
        host: Option<SharedRenderHost>,
    ) -> DashboardResult<WidgetInstance> {
        self.add_widget_at(widget_type, overrides, host, None)
    }

    pub fn add_widget_at(
        &mut self,
        widget_type: &str,
        overrides: Value,
        host: Option<SharedRenderHost>,
        position: Option<(i32, i32)>,
    ) -> DashboardResult<WidgetInstance> {
        let instance = self.orchestrator.create_widget(widget_type, overrides, host)?;
        let id = instance.id.clone();
        let Some(placed) = self.layout.add_widget(instance, position) else {
            self.orchestrator.destroy_widget(&id);
            return Err(DashboardError::InstanceNotFound(id));
        };
        self.orchestrator.update_widget_layout(&id, &placed);
        self.auto_save();
        self.orchestrator
            .get_widget(&id)
            .ok_or(DashboardError::InstanceNotFound(id))
    }

    /// Destroy the instance and take it off the grid. A widget whose
    /// disposal fails stays on the grid and the call returns `false`.
    pub fn remove_widget(&mut self, id: &str) -> bool {
        let live = self.orchestrator.get_widget(id).is_some();
        if live && !self.orchestrator.destroy_widget(id) {
            tracing::warn!(%id, "widget disposal failed; keeping it on the grid");
            return false;
        }
        let removed = self.layout.remove_widget(id);
        if removed {
            self.auto_save();
        }
        live || removed
    }

    pub fn update_widget_layout(&mut self, id: &str, patch: &LayoutPatch) -> bool {
        if !self.layout.update_widget_layout(id, patch) {
            return false;
        }
        self.mirror_layouts();
        self.auto_save();
        true
    }

    pub fn compact(&mut self) -> usize {
        let moved = self.layout.compact_layout();
        if moved > 0 {
            self.mirror_layouts();
            self.auto_save();
        }
        moved
    }

    pub fn set_viewport_width(&mut self, width: u32) -> Breakpoint {
        let before = self.layout.current_breakpoint();
        let breakpoint = self.layout.set_viewport_width(width);
        if breakpoint != before {
            self.mirror_layouts();
        }
        breakpoint
    }

    /// Copy grid placements into the orchestrator's instance records.
    fn mirror_layouts(&self) {
        for widget in self.layout.widgets() {
            let current = self.orchestrator.get_widget(&widget.id);
            if current.map_or(false, |w| w.config.layout != widget.config.layout) {
                self.orchestrator
                    .update_widget_layout(&widget.id, &widget.config.layout);
            }
        }
    }

    /// Refresh stored instances from the orchestrator, then save under `key`.
    pub fn save(&mut self, key: &str) -> anyhow::Result<()> {
        for instance in self.orchestrator.get_all_widgets() {
            self.layout.sync_instance(&instance);
        }
        self.layout.save_layout(key)
    }

    /// Replace the grid with the layout saved under `key`. Widgets of
    /// unregistered types are dropped and live instances are reconciled
    /// with the loaded widget list.
    pub fn load(&mut self, key: &str) -> bool {
        if !self.layout.load_layout(key) {
            return false;
        }
        self.layout.sanitize(&read(&self.registry));
        self.reconcile_instances();
        true
    }

    pub fn export(&self) -> anyhow::Result<String> {
        self.layout.export_dashboard()
    }

    /// Replace the grid with an exported document; see [`Self::load`].
    pub fn import(&mut self, json: &str) -> bool {
        if !self.layout.import_dashboard(json) {
            return false;
        }
        self.layout.sanitize(&read(&self.registry));
        self.reconcile_instances();
        true
    }

    /// Make the orchestrator's instance table match the grid.
    ///
    /// Live instances missing from the grid are destroyed. Grid widgets
    /// without a live instance are restored unmounted. Instances present
    /// in both keep their live record and take the grid placement.
    fn reconcile_instances(&self) {
        let placed: HashSet<&str> =
            self.layout.widgets().iter().map(|w| w.id.as_str()).collect();
        for live in self.orchestrator.get_all_widgets() {
            if !placed.contains(live.id.as_str()) && !self.orchestrator.destroy_widget(&live.id) {
                tracing::warn!(id = %live.id, "stale widget could not be destroyed");
            }
        }
        for widget in self.layout.widgets() {
            self.orchestrator.restore_widget(widget.clone());
        }
        self.mirror_layouts();
    }

    fn auto_save(&mut self) {
        let enabled = self
            .layout
            .config()
            .auto_save
            .unwrap_or(self.settings.auto_save);
        if !enabled {
            return;
        }
        let key = self.id().to_string();
        if let Err(e) = self.save(&key) {
            tracing::warn!(%key, error = %e, "auto save failed");
        }
    }
}

fn read(registry: &SharedRegistry) -> std::sync::RwLockReadGuard<'_, WidgetRegistry> {
    registry
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::config::{WidgetConfig, WidgetLayout};
    use crate::dashboard::instance::WidgetState;
    use crate::dashboard::orchestrator::HeadlessHost;
    use crate::dashboard::registry::WidgetDefinition;
    use crate::dashboard::storage::LayoutStore;
    use crate::dashboard::widgets::{Widget, WidgetFactory};
    use serde_json::json;
    use tempfile::tempdir;

    #[derive(Default, serde::Deserialize)]
    struct NoSettings;

    struct Blank;

    impl Widget for Blank {}

    struct Pinned;

    impl Widget for Pinned {
        fn on_destroy(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("pinned widgets cannot be disposed")
        }
    }

    fn registry() -> WidgetRegistry {
        let mut reg = WidgetRegistry::new();
        reg.register(
            WidgetDefinition::new("note", "Note", "productivity")
                .with_default_config(WidgetConfig::new("note", "Note", WidgetLayout::sized(3, 2)))
                .with_component(WidgetFactory::new("note", |_: NoSettings| Blank)),
        )
        .unwrap();
        reg.register(
            WidgetDefinition::new("pinned", "Pinned", "productivity")
                .with_default_config(WidgetConfig::new(
                    "pinned",
                    "Pinned",
                    WidgetLayout::sized(2, 2),
                ))
                .with_component(WidgetFactory::new("pinned", |_: NoSettings| Pinned)),
        )
        .unwrap();
        reg
    }

    #[test]
    fn added_widgets_are_placed_and_mirrored() {
        let mut dash = Dashboard::new(Settings::default(), registry());
        let a = dash.add_widget("note", json!({}), None).unwrap();
        let b = dash.add_widget("note", json!({}), None).unwrap();
        assert_eq!((a.config.layout.x, a.config.layout.y), (0, 0));
        assert_eq!((b.config.layout.x, b.config.layout.y), (3, 0));

        assert!(dash.update_widget_layout(&b.id, &LayoutPatch::position(0, 4)));
        let mirrored = dash.orchestrator().get_widget(&b.id).unwrap();
        assert_eq!(mirrored.config.layout, WidgetLayout::sized(3, 2).at(0, 4));

        assert!(dash.remove_widget(&a.id));
        assert!(!dash.remove_widget(&a.id));
        assert_eq!(dash.config().widgets.len(), 1);
        assert_eq!(dash.orchestrator().get_all_widgets().len(), 1);
    }

    #[test]
    fn failed_disposal_keeps_widget_on_grid() {
        let mut dash = Dashboard::new(Settings::default(), registry());
        let pinned = dash
            .add_widget("pinned", json!({}), Some(HeadlessHost::shared()))
            .unwrap();
        assert!(!dash.remove_widget(&pinned.id));
        assert!(dash.layout().get_widget(&pinned.id).is_some());
        let failed = dash.orchestrator().get_widget(&pinned.id).unwrap();
        assert_eq!(failed.state, WidgetState::Error);

        assert!(dash.remove_widget(&pinned.id));
        assert!(dash.layout().get_widget(&pinned.id).is_none());
        assert!(dash.orchestrator().get_widget(&pinned.id).is_none());
    }

    #[test]
    fn load_and_import_reconcile_live_instances() {
        let mut dash = Dashboard::new(Settings::default(), registry());
        let kept = dash.add_widget("note", json!({}), None).unwrap();
        dash.save("snapshot").unwrap();
        let extra = dash.add_widget("note", json!({}), None).unwrap();
        assert!(dash.update_widget_layout(&kept.id, &LayoutPatch::position(6, 6)));

        assert!(dash.load("snapshot"));
        assert!(dash.orchestrator().get_widget(&extra.id).is_none());
        let live = dash.orchestrator().get_widget(&kept.id).unwrap();
        assert_eq!(live.config.layout, WidgetLayout::sized(3, 2).at(0, 0));

        let mut fresh = Dashboard::new(Settings::default(), registry());
        assert!(fresh.import(&dash.export().unwrap()));
        let adopted = fresh.orchestrator().get_widget(&kept.id).unwrap();
        assert_eq!(adopted.state, WidgetState::Loaded);
        assert!(!fresh.orchestrator().is_mounted(&kept.id));
        assert_eq!(fresh.orchestrator().get_all_widgets().len(), 1);
    }

    #[test]
    fn auto_save_writes_under_dashboard_id() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            auto_save: true,
            layout_dir: Some(dir.path().to_path_buf()),
            ..Settings::default()
        };
        let mut dash = Dashboard::new(settings, registry());
        dash.add_widget("note", json!({}), None).unwrap();
        let store = FileLayoutStore::new(dir.path());
        let saved = store.load(DEFAULT_DASHBOARD_ID).unwrap().unwrap();
        assert!(saved.contains("\"note\""));
    }

    #[test]
    fn import_drops_unknown_types() {
        let mut source = Dashboard::new(Settings::default(), registry());
        source.add_widget("note", json!({}), None).unwrap();
        let exported = source.export().unwrap();

        let mut target = Dashboard::new(Settings::default(), WidgetRegistry::new());
        assert!(target.import(&exported));
        assert!(target.config().widgets.is_empty());
    }
}
