use crate::dashboard::config::WidgetConfig;
use crate::dashboard::registry::WidgetMetadata;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a widget instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WidgetState {
    Initializing,
    Loading,
    Loaded,
    Error,
    Destroyed,
}

impl WidgetState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Destroyed` is terminal. `Error` is reachable from every live state;
    /// a recoverable error may go back to `Loading` for a retry.
    pub fn can_transition(self, next: WidgetState) -> bool {
        use WidgetState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Error) => true,
            (Initializing, Loading) | (Initializing, Loaded) => true,
            (Loading, Loaded) => true,
            (Loaded, Loading) | (Error, Loading) => true,
            (Loaded, Destroyed) | (Error, Destroyed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetState::Initializing => "INITIALIZING",
            WidgetState::Loading => "LOADING",
            WidgetState::Loaded => "LOADED",
            WidgetState::Error => "ERROR",
            WidgetState::Destroyed => "DESTROYED",
        }
    }
}

impl std::fmt::Display for WidgetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime failure categories recorded on an instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WidgetErrorCode {
    CreationFailed,
    LoadFailed,
    ConfigUpdateFailed,
    DataUpdateFailed,
    DataFetchFailed,
    DestroyFailed,
}

impl WidgetErrorCode {
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            WidgetErrorCode::CreationFailed | WidgetErrorCode::DestroyFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetErrorCode::CreationFailed => "CREATION_FAILED",
            WidgetErrorCode::LoadFailed => "LOAD_FAILED",
            WidgetErrorCode::ConfigUpdateFailed => "CONFIG_UPDATE_FAILED",
            WidgetErrorCode::DataUpdateFailed => "DATA_UPDATE_FAILED",
            WidgetErrorCode::DataFetchFailed => "DATA_FETCH_FAILED",
            WidgetErrorCode::DestroyFailed => "DESTROY_FAILED",
        }
    }
}

impl std::fmt::Display for WidgetErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetError {
    pub code: WidgetErrorCode,
    pub message: String,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

impl WidgetError {
    pub fn new(code: WidgetErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.recoverable(),
            timestamp: Utc::now(),
        }
    }
}

/// Error stream item: which instance failed and how.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceError {
    pub instance_id: String,
    pub error: WidgetError,
}

/// A live widget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetInstance {
    pub id: String,
    pub definition: WidgetMetadata,
    pub config: WidgetConfig,
    #[serde(
        default,
        deserialize_with = "crate::dashboard::config::present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    pub state: WidgetState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WidgetError>,
}

impl WidgetInstance {
    pub fn new(id: String, definition: WidgetMetadata, config: WidgetConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            definition,
            config,
            data: None,
            state: WidgetState::Initializing,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn widget_type(&self) -> &str {
        &self.definition.widget_type
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&mut self, next: WidgetState) -> bool {
        if !self.state.can_transition(next) {
            tracing::debug!(
                id = %self.id,
                from = %self.state,
                to = %next,
                "illegal widget transition ignored"
            );
            return false;
        }
        tracing::debug!(id = %self.id, from = %self.state, to = %next, "widget transition");
        self.state = next;
        if next != WidgetState::Error {
            self.error = None;
        }
        self.touch();
        true
    }

    pub fn fail(&mut self, error: WidgetError) {
        self.transition(WidgetState::Error);
        self.error = Some(error);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Instance id in the form `{type}_{timestamp}_{random}`.
pub fn generate_instance_id(widget_type: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!(
        "{}_{}_{}",
        widget_type,
        crate::common::now_millis(),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::config::WidgetLayout;

    fn instance() -> WidgetInstance {
        WidgetInstance::new(
            "todo_1_abc".into(),
            WidgetMetadata::new("todo", "Todo", "productivity"),
            WidgetConfig::new("todo", "Todo", WidgetLayout::sized(2, 2)),
        )
    }

    #[test]
    fn state_machine_happy_path() {
        let mut w = instance();
        assert!(w.transition(WidgetState::Loading));
        assert!(w.transition(WidgetState::Loaded));
        assert!(w.transition(WidgetState::Destroyed));
        assert!(!w.transition(WidgetState::Loaded));
        assert!(!w.transition(WidgetState::Error));
    }

    #[test]
    fn error_records_and_clears() {
        let mut w = instance();
        w.fail(WidgetError::new(WidgetErrorCode::LoadFailed, "nope"));
        assert_eq!(w.state, WidgetState::Error);
        assert!(w.error.as_ref().unwrap().recoverable);
        assert!(w.transition(WidgetState::Loading));
        assert!(w.error.is_none());
    }

    #[test]
    fn initializing_cannot_be_destroyed_directly() {
        let mut w = instance();
        assert!(!w.transition(WidgetState::Destroyed));
        assert_eq!(w.state, WidgetState::Initializing);
    }

    #[test]
    fn generated_ids_have_expected_shape() {
        let id = generate_instance_id("todo");
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts[0], "todo");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(generate_instance_id("todo"), id);
    }

    #[test]
    fn null_data_survives_serialization() {
        let mut w = instance();
        w.data = Some(Value::Null);
        w.config.appearance = Some(Value::Null);
        let encoded = serde_json::to_value(&w).unwrap();
        let back: WidgetInstance = serde_json::from_value(encoded).unwrap();
        assert_eq!(back, w);

        let encoded = serde_json::to_value(instance()).unwrap();
        let bare: WidgetInstance = serde_json::from_value(encoded).unwrap();
        assert_eq!(bare.data, None);
        assert_eq!(bare.config.permissions, None);
    }

    #[test]
    fn recoverability_follows_code() {
        assert!(!WidgetErrorCode::CreationFailed.recoverable());
        assert!(!WidgetErrorCode::DestroyFailed.recoverable());
        assert!(WidgetErrorCode::DataFetchFailed.recoverable());
    }
}
