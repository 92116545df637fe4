pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod instance;
pub mod layout;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod storage;
pub mod widgets;

pub use config::{
    Breakpoint, DashboardConfig, DataSourceConfig, GridBreakpoint, GridConfig, LayoutPatch,
    WidgetConfig, WidgetLayout,
};
pub use dashboard::Dashboard;
pub use error::{DashboardError, DashboardResult};
pub use events::{EventBus, WidgetEvent};
pub use instance::{InstanceError, WidgetError, WidgetErrorCode, WidgetInstance, WidgetState};
pub use layout::{LayoutChange, LayoutChangeKind, LayoutEngine};
pub use orchestrator::{HeadlessHost, RenderHost, SharedRenderHost, WidgetOrchestrator};
pub use providers::{DataSink, WidgetDataProvider};
pub use registry::{WidgetDefinition, WidgetMetadata, WidgetRegistry};
pub use storage::{FileLayoutStore, LayoutStore, MemoryLayoutStore};
pub use widgets::{Widget, WidgetContext, WidgetEmitter, WidgetFactory};
