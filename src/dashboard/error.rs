use crate::dashboard::instance::WidgetErrorCode;
use std::time::Duration;

/// Errors surfaced synchronously to the caller of a dashboard operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DashboardError {
    #[error("invalid widget definition: missing `{field}`")]
    InvalidDefinition { field: &'static str },

    #[error("widget type '{0}' is not registered")]
    WidgetNotFound(String),

    #[error("widget instance '{0}' does not exist")]
    InstanceNotFound(String),

    #[error("widget type '{widget_type}' is missing dependencies: {}", missing.join(", "))]
    MissingDependencies {
        widget_type: String,
        missing: Vec<String>,
    },

    #[error("failed to load component for '{widget_type}': {reason}")]
    ComponentLoadFailed { widget_type: String, reason: String },

    #[error("no data provider supports source '{0}'")]
    NoProviderFound(String),

    #[error("request '{request_type}' to '{target}' timed out after {timeout:?}")]
    RequestTimeout {
        target: String,
        request_type: String,
        timeout: Duration,
    },

    #[error("request '{request_type}' failed: {message}")]
    RequestFailed {
        request_type: String,
        message: String,
    },

    #[error("{code}: {message}")]
    Widget {
        code: WidgetErrorCode,
        message: String,
    },
}

pub type DashboardResult<T> = Result<T, DashboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dependencies_lists_types() {
        let err = DashboardError::MissingDependencies {
            widget_type: "chart".into(),
            missing: vec!["clock".into(), "feed".into()],
        };
        assert_eq!(
            err.to_string(),
            "widget type 'chart' is missing dependencies: clock, feed"
        );
    }

    #[test]
    fn widget_error_uses_code_name() {
        let err = DashboardError::Widget {
            code: WidgetErrorCode::CreationFailed,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "CREATION_FAILED: boom");
    }
}
