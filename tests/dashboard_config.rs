use serde_json::json;
use tempfile::tempdir;
use widget_grid::dashboard::config::{Breakpoint, DashboardConfig, WidgetConfig, WidgetLayout};
use widget_grid::dashboard::registry::{WidgetDefinition, WidgetRegistry};
use widget_grid::dashboard::widgets::{Widget, WidgetFactory};
use widget_grid::dashboard::WidgetState;
use widget_grid::{Dashboard, Settings};

#[derive(Default, serde::Deserialize)]
struct Plain;

struct Tile;

impl Widget for Tile {}

fn registry() -> WidgetRegistry {
    let mut reg = WidgetRegistry::new();
    reg.register(
        WidgetDefinition::new("stats", "Stats", "data")
            .with_default_config(WidgetConfig::new("stats", "Stats", WidgetLayout::sized(4, 2)))
            .with_component(WidgetFactory::new("stats", |_: Plain| Tile)),
    )
    .unwrap();
    reg
}

const DOCUMENT: &str = r#"{
    "id": "ops",
    "title": "Operations",
    "grid": {
        "cols": 12,
        "rowHeight": 120,
        "breakpoints": { "sm": { "cols": 4, "rowHeight": 60, "margin": 4 } }
    },
    "autoSave": false,
    "widgets": [
        {
            "id": "stats-1",
            "definition": { "type": "stats", "name": "Stats", "category": "data" },
            "config": {
                "type": "stats",
                "title": "Requests",
                "layout": { "cols": 4, "rows": 2, "x": 2, "y": 1, "minCols": 2 },
                "dataSource": {
                    "type": "rest",
                    "params": { "url": "/api/stats" },
                    "refreshInterval": 30000
                }
            },
            "state": "LOADED",
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z"
        },
        {
            "id": "legacy-1",
            "definition": { "type": "legacy", "name": "Legacy", "category": "old" },
            "config": { "type": "legacy" },
            "state": "LOADED",
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z"
        }
    ]
}"#;

#[test]
fn camel_case_document_parses_with_defaults() {
    let config: DashboardConfig = serde_json::from_str(DOCUMENT).unwrap();
    assert_eq!(config.version, 1);
    assert_eq!(config.grid.row_height, 120);
    assert_eq!(config.grid.margin, 10);
    assert!(config.grid.responsive);
    assert_eq!(config.grid.breakpoint(Breakpoint::Sm).cols, 4);
    assert_eq!(config.auto_save, Some(false));

    let stats = config.widget("stats-1").unwrap();
    assert_eq!(stats.state, WidgetState::Loaded);
    assert_eq!(stats.config.layout.min_cols, Some(2));
    let source = stats.config.data_source.as_ref().unwrap();
    assert_eq!(source.kind, "rest");
    assert_eq!(source.refresh_interval, Some(30000));
    assert!(stats.config.resizable);

    let legacy = config.widget("legacy-1").unwrap();
    assert_eq!(legacy.config.layout, WidgetLayout::sized(1, 1));
}

#[test]
fn import_drops_unregistered_widget_types() {
    let mut dash = Dashboard::new(Settings::default(), registry());
    assert!(dash.import(DOCUMENT));
    assert_eq!(dash.id(), "ops");
    let ids: Vec<&str> = dash.config().widgets.iter().map(|w| w.id.as_str()).collect();
    assert_eq!(ids, vec!["stats-1"]);
}

#[test]
fn settings_file_drives_dashboard_persistence() {
    let dir = tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    std::fs::write(
        &settings_path,
        json!({
            "layout_dir": dir.path().join("layouts"),
            "history_limit": 5,
            "grid": { "cols": 8 }
        })
        .to_string(),
    )
    .unwrap();
    let settings = Settings::load(&settings_path).unwrap();
    assert_eq!(settings.request_timeout_ms, 5000);
    assert_eq!(settings.grid.cols, 8);

    let mut first = Dashboard::new(settings.clone(), registry());
    let added = first.add_widget("stats", json!({"title": "Latency"}), None).unwrap();
    first.save("ops").unwrap();
    assert!(dir.path().join("layouts").join("ops.json").exists());

    let mut second = Dashboard::new(settings, registry());
    assert!(second.config().widgets.is_empty());
    assert!(second.load("ops"));
    let restored = second.layout().get_widget(&added.id).unwrap();
    assert_eq!(restored.config.title, "Latency");
    assert_eq!(restored.config.layout, WidgetLayout::sized(4, 2));
    assert!(second.orchestrator().get_widget(&added.id).is_some());
    assert!(!second.load("missing"));
}

#[test]
fn missing_settings_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let settings = Settings::load(dir.path().join("absent.json")).unwrap();
    assert_eq!(settings, Settings::default());
}
