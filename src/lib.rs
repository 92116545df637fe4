pub mod common;
pub mod dashboard;
pub mod logging;
pub mod settings;

pub use dashboard::Dashboard;
pub use settings::Settings;
