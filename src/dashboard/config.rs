use crate::dashboard::instance::WidgetInstance;
use crate::dashboard::registry::WidgetRegistry;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn default_version() -> u32 {
    1
}

fn default_span() -> i32 {
    1
}

fn default_grid_cols() -> i32 {
    12
}

fn default_row_height() -> u32 {
    100
}

fn default_margin() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Keeps an explicit `null` as `Some(Value::Null)`; a missing field is
/// `None` through `#[serde(default)]`.
pub(crate) fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Position and span of a widget on the grid, in grid units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetLayout {
    #[serde(default = "default_span")]
    pub cols: i32,
    #[serde(default = "default_span")]
    pub rows: i32,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cols: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cols: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rows: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<i32>,
}

impl Default for WidgetLayout {
    fn default() -> Self {
        Self::sized(default_span(), default_span())
    }
}

impl WidgetLayout {
    pub fn sized(cols: i32, rows: i32) -> Self {
        Self {
            cols,
            rows,
            x: 0,
            y: 0,
            min_cols: None,
            max_cols: None,
            min_rows: None,
            max_rows: None,
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Exclusive right edge; saturates so oversized coordinates fail
    /// bounds checks instead of overflowing.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.cols)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.rows)
    }

    pub fn same_position(&self, other: &WidgetLayout) -> bool {
        self.x == other.x && self.y == other.y
    }

    pub fn same_size(&self, other: &WidgetLayout) -> bool {
        self.cols == other.cols && self.rows == other.rows
    }
}

/// Partial layout update; `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPatch {
    pub cols: Option<i32>,
    pub rows: Option<i32>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub min_cols: Option<i32>,
    pub max_cols: Option<i32>,
    pub min_rows: Option<i32>,
    pub max_rows: Option<i32>,
}

impl LayoutPatch {
    pub fn position(x: i32, y: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn size(cols: i32, rows: i32) -> Self {
        Self {
            cols: Some(cols),
            rows: Some(rows),
            ..Self::default()
        }
    }

    pub fn apply(&self, base: &WidgetLayout) -> WidgetLayout {
        WidgetLayout {
            cols: self.cols.unwrap_or(base.cols),
            rows: self.rows.unwrap_or(base.rows),
            x: self.x.unwrap_or(base.x),
            y: self.y.unwrap_or(base.y),
            min_cols: self.min_cols.or(base.min_cols),
            max_cols: self.max_cols.or(base.max_cols),
            min_rows: self.min_rows.or(base.min_rows),
            max_rows: self.max_rows.or(base.max_rows),
        }
    }
}

/// Where a widget pulls its data from. The `type` tag is what
/// providers match on; `params` is opaque to the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<u64>,
}

impl DataSourceConfig {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            params: Value::Null,
            refresh_interval: None,
        }
    }
}

/// Per-instance widget configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    #[serde(rename = "type", default)]
    pub widget_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub layout: WidgetLayout,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub appearance: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceConfig>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default = "default_true")]
    pub resizable: bool,
    #[serde(default = "default_true")]
    pub movable: bool,
    #[serde(default = "default_true")]
    pub removable: bool,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub permissions: Option<Value>,
}

impl WidgetConfig {
    pub fn new(widget_type: &str, title: &str, layout: WidgetLayout) -> Self {
        Self {
            widget_type: widget_type.to_string(),
            title: title.to_string(),
            layout,
            appearance: None,
            data_source: None,
            settings: Map::new(),
            resizable: true,
            movable: true,
            removable: true,
            permissions: None,
        }
    }

    pub fn with_data_source(mut self, source: DataSourceConfig) -> Self {
        self.data_source = Some(source);
        self
    }

    pub fn with_setting(mut self, key: &str, value: Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }
}

/// Named viewport buckets, in matching priority order.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    Xs,
    Sm,
    Md,
    Lg,
    Xl,
}

impl Default for Breakpoint {
    fn default() -> Self {
        Self::Lg
    }
}

impl Breakpoint {
    pub const PRIORITY: [Breakpoint; 5] = [
        Breakpoint::Xs,
        Breakpoint::Sm,
        Breakpoint::Md,
        Breakpoint::Lg,
        Breakpoint::Xl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Breakpoint::Xs => "xs",
            Breakpoint::Sm => "sm",
            Breakpoint::Md => "md",
            Breakpoint::Lg => "lg",
            Breakpoint::Xl => "xl",
        }
    }

    /// Viewport width predicate in pixels.
    pub fn matches(&self, width: u32) -> bool {
        match self {
            Breakpoint::Xs => width < 600,
            Breakpoint::Sm => (600..960).contains(&width),
            Breakpoint::Md => (960..1280).contains(&width),
            Breakpoint::Lg => (1280..1920).contains(&width),
            Breakpoint::Xl => width >= 1920,
        }
    }

    /// First breakpoint in priority order whose predicate matches.
    pub fn for_width(width: u32) -> Self {
        Self::PRIORITY
            .iter()
            .copied()
            .find(|bp| bp.matches(width))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid parameters applied while a breakpoint is active.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GridBreakpoint {
    pub cols: i32,
    pub row_height: u32,
    pub margin: u32,
}

pub fn default_breakpoints() -> BTreeMap<Breakpoint, GridBreakpoint> {
    let entry = |cols, row_height, margin| GridBreakpoint {
        cols,
        row_height,
        margin,
    };
    BTreeMap::from([
        (Breakpoint::Xs, entry(1, 80, 5)),
        (Breakpoint::Sm, entry(2, 90, 8)),
        (Breakpoint::Md, entry(6, 100, 10)),
        (Breakpoint::Lg, entry(12, 100, 10)),
        (Breakpoint::Xl, entry(12, 110, 12)),
    ])
}

/// Grid definition for the dashboard layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GridConfig {
    #[serde(default = "default_grid_cols")]
    pub cols: i32,
    #[serde(default = "default_row_height")]
    pub row_height: u32,
    #[serde(default = "default_margin")]
    pub margin: u32,
    #[serde(default = "default_true")]
    pub outer_margin: bool,
    #[serde(default = "default_true")]
    pub responsive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<BTreeMap<Breakpoint, GridBreakpoint>>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cols: default_grid_cols(),
            row_height: default_row_height(),
            margin: default_margin(),
            outer_margin: true,
            responsive: true,
            breakpoints: None,
        }
    }
}

impl GridConfig {
    pub fn with_cols(cols: i32) -> Self {
        Self {
            cols,
            ..Self::default()
        }
    }

    /// Breakpoint table entry, falling back to the built-in table when the
    /// config does not declare one (or omits this bucket).
    pub fn breakpoint(&self, bp: Breakpoint) -> GridBreakpoint {
        self.breakpoints
            .as_ref()
            .and_then(|table| table.get(&bp).copied())
            .or_else(|| default_breakpoints().get(&bp).copied())
            .unwrap_or(GridBreakpoint {
                cols: self.cols,
                row_height: self.row_height,
                margin: self.margin,
            })
    }

    pub fn apply_breakpoint(&mut self, bp: &GridBreakpoint) {
        self.cols = bp.cols.max(1);
        self.row_height = bp.row_height;
        self.margin = bp.margin;
    }
}

/// Unit of persistence and export/import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub id: String,
    pub title: String,
    pub grid: GridConfig,
    pub widgets: Vec<WidgetInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_save: Option<bool>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub permissions: Option<Value>,
}

impl DashboardConfig {
    pub fn new(id: &str, title: &str, grid: GridConfig) -> Self {
        Self {
            version: default_version(),
            id: id.to_string(),
            title: title.to_string(),
            grid,
            widgets: Vec::new(),
            theme: None,
            auto_save: None,
            permissions: None,
        }
    }

    pub fn widget(&self, id: &str) -> Option<&WidgetInstance> {
        self.widgets.iter().find(|w| w.id == id)
    }

    /// Remove widgets whose type is no longer registered.
    pub fn sanitize(&mut self, registry: &WidgetRegistry) -> Vec<String> {
        let mut warnings = Vec::new();
        self.widgets.retain(|w| {
            let widget_type = &w.definition.widget_type;
            if registry.contains(widget_type) {
                return true;
            }
            tracing::warn!(widget = %widget_type, id = %w.id, "unknown dashboard widget dropped");
            warnings.push(format!("unknown dashboard widget '{widget_type}' dropped"));
            false
        });
        warnings
    }
}
