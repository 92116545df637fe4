use crate::dashboard::config::WidgetConfig;
use crate::dashboard::events::WidgetEvent;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Values injected into a widget when it is mounted.
#[derive(Clone)]
pub struct WidgetContext {
    pub id: String,
    pub config: WidgetConfig,
    pub data: Option<Value>,
    pub emitter: WidgetEmitter,
}

/// Capability surface implemented by mounted widgets. Every hook has a
/// no-op default so widgets only implement what they use.
pub trait Widget: Send {
    /// Called once after mounting with the instance id, config, data and
    /// an emitter routed through the orchestrator.
    fn attach(&mut self, _ctx: WidgetContext) {}

    fn on_init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_destroy(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_data_change(&mut self, _data: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Receives the partial config that was merged, not the full config.
    fn on_config_change(&mut self, _partial: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_event(&mut self, _event: &WidgetEvent) {}
}

type EmitFn = Arc<dyn Fn(WidgetEvent) + Send + Sync>;

/// Outbound event entry point handed to widgets.
#[derive(Clone)]
pub struct WidgetEmitter {
    source: String,
    emit: EmitFn,
}

impl WidgetEmitter {
    pub fn new(source: &str, emit: impl Fn(WidgetEvent) + Send + Sync + 'static) -> Self {
        Self {
            source: source.to_string(),
            emit: Arc::new(emit),
        }
    }

    /// Emitter that drops everything; used before a widget is mounted.
    pub fn detached(source: &str) -> Self {
        Self::new(source, |_| {})
    }

    pub fn emit(&self, event_type: &str, payload: Value) {
        (self.emit)(WidgetEvent::new(event_type, &self.source).with_payload(payload));
    }

    /// Directed event; it does not bubble to other widgets.
    pub fn emit_to(&self, target: &str, event_type: &str, payload: Value) {
        (self.emit)(
            WidgetEvent::new(event_type, &self.source)
                .with_target(target)
                .with_bubble(false)
                .with_payload(payload),
        );
    }

    pub fn emit_event(&self, mut event: WidgetEvent) {
        if event.source.is_empty() {
            event.source = self.source.clone();
        }
        (self.emit)(event);
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

type Ctor = Arc<dyn Fn(&WidgetConfig) -> anyhow::Result<Box<dyn Widget>> + Send + Sync>;

/// Named component constructor resolved from a widget definition.
#[derive(Clone)]
pub struct WidgetFactory {
    name: String,
    ctor: Ctor,
}

impl WidgetFactory {
    /// Build from a typed settings struct parsed out of `config.settings`.
    /// Unparseable settings fall back to `C::default()`.
    pub fn new<T, C>(name: &str, build: fn(C) -> T) -> Self
    where
        T: Widget + 'static,
        C: DeserializeOwned + Default + 'static,
    {
        Self {
            name: name.to_string(),
            ctor: Arc::new(move |cfg: &WidgetConfig| {
                let settings = Value::Object(cfg.settings.clone());
                let typed = serde_json::from_value::<C>(settings).unwrap_or_default();
                Ok(Box::new(build(typed)) as Box<dyn Widget>)
            }),
        }
    }

    pub fn from_fn(
        name: &str,
        ctor: impl Fn(&WidgetConfig) -> anyhow::Result<Box<dyn Widget>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            ctor: Arc::new(ctor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&self, config: &WidgetConfig) -> anyhow::Result<Box<dyn Widget>> {
        (self.ctor)(config)
    }
}

impl std::fmt::Debug for WidgetFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetFactory")
            .field("name", &self.name)
            .finish()
    }
}

/// Shallow merge: top-level keys of `updates` replace those of `base`.
pub(crate) fn merge_json(base: &Value, updates: &Value) -> Value {
    match (base, updates) {
        (Value::Object(a), Value::Object(b)) => {
            let mut merged = a.clone();
            for (k, v) in b {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => updates.clone(),
    }
}

/// Recursive merge used when creating an instance from its defaults.
pub(crate) fn deep_merge_json(base: &Value, updates: &Value) -> Value {
    match (base, updates) {
        (Value::Object(a), Value::Object(b)) => {
            let mut merged = a.clone();
            for (k, v) in b {
                let next = match merged.get(k) {
                    Some(existing) => deep_merge_json(existing, v),
                    None => v.clone(),
                };
                merged.insert(k.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        _ => updates.clone(),
    }
}
