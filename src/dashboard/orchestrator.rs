//! Widget instance lifecycle.
//!
//! [`WidgetOrchestrator`] owns the live instance table. Each instance may
//! have a mounted component (a [`Widget`] created from the registry's
//! factory and placed into a [`RenderHost`]) and at most one active data
//! binding. Component hooks run with the orchestrator's tables unlocked, so
//! a widget may call back into the orchestrator from its hooks as long as
//! it does not target its own instance.

use crate::common::{lock, Subscribers, Subscription};
use crate::dashboard::config::{WidgetConfig, WidgetLayout};
use crate::dashboard::error::{DashboardError, DashboardResult};
use crate::dashboard::events::{EventBus, WidgetEvent};
use crate::dashboard::instance::{
    generate_instance_id, InstanceError, WidgetError, WidgetErrorCode, WidgetInstance, WidgetState,
};
use crate::dashboard::providers::{
    DataEvent, DataProviders, DataSink, DataSubscription, WidgetDataProvider,
};
use crate::dashboard::registry::WidgetRegistry;
use crate::dashboard::widgets::{deep_merge_json, merge_json, Widget, WidgetContext, WidgetEmitter};
use chrono::Utc;
use hashlink::LinkedHashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Mount point supplied by the rendering layer.
pub trait RenderHost: Send {
    /// Instantiate `component` for `instance_id`.
    fn mount(&mut self, instance_id: &str, component: &str) -> anyhow::Result<()>;

    fn dispose(&mut self, instance_id: &str) -> anyhow::Result<()>;
}

pub type SharedRenderHost = Arc<Mutex<dyn RenderHost>>;

pub type SharedRegistry = Arc<RwLock<WidgetRegistry>>;

/// Render host without a view; tracks which instances are mounted.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    mounted: Vec<String>,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRenderHost {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn mounted(&self) -> &[String] {
        &self.mounted
    }
}

impl RenderHost for HeadlessHost {
    fn mount(&mut self, instance_id: &str, _component: &str) -> anyhow::Result<()> {
        self.mounted.push(instance_id.to_string());
        Ok(())
    }

    fn dispose(&mut self, instance_id: &str) -> anyhow::Result<()> {
        self.mounted.retain(|id| id != instance_id);
        Ok(())
    }
}

type SharedWidget = Arc<Mutex<Box<dyn Widget>>>;

struct Mounted {
    widget: SharedWidget,
    host: SharedRenderHost,
}

struct Inner {
    registry: SharedRegistry,
    bus: EventBus,
    instances: Mutex<LinkedHashMap<String, WidgetInstance>>,
    mounted: Mutex<HashMap<String, Mounted>>,
    bindings: Mutex<HashMap<String, DataSubscription>>,
    providers: Mutex<DataProviders>,
    instance_listeners: Subscribers<(), Vec<WidgetInstance>>,
    error_listeners: Subscribers<(), InstanceError>,
}

#[derive(Clone)]
pub struct WidgetOrchestrator {
    inner: Arc<Inner>,
}

impl WidgetOrchestrator {
    pub fn new(registry: SharedRegistry, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                bus,
                instances: Mutex::new(LinkedHashMap::new()),
                mounted: Mutex::new(HashMap::new()),
                bindings: Mutex::new(HashMap::new()),
                providers: Mutex::new(DataProviders::new()),
                instance_listeners: Subscribers::new(),
                error_listeners: Subscribers::new(),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.inner.registry)
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Create an instance of `widget_type`.
    ///
    /// `overrides` is deep-merged over the definition's default config and
    /// `type` is always forced to `widget_type`. With a `host` the
    /// component is loaded before returning.
    pub fn create_widget(
        &self,
        widget_type: &str,
        overrides: Value,
        host: Option<SharedRenderHost>,
    ) -> DashboardResult<WidgetInstance> {
        let (metadata, defaults) = {
            let registry = self
                .inner
                .registry
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let definition = registry
                .get_widget(widget_type)
                .ok_or_else(|| DashboardError::WidgetNotFound(widget_type.to_string()))?;
            let check = registry.check_dependencies(widget_type);
            if !check.satisfied {
                return Err(DashboardError::MissingDependencies {
                    widget_type: widget_type.to_string(),
                    missing: check.missing,
                });
            }
            (definition.metadata.clone(), definition.default_config.clone())
        };

        let id = self.unique_id(widget_type);
        let config = match build_config(widget_type, defaults, &overrides) {
            Ok(config) => config,
            Err(e) => return Err(self.creation_failed(&id, e.to_string())),
        };

        lock(&self.inner.instances).insert(
            id.clone(),
            WidgetInstance::new(id.clone(), metadata, config),
        );

        match host {
            Some(host) => {
                if let Err(e) = self.load_widget_component(&id, host) {
                    self.discard(&id);
                    return Err(self.creation_failed(&id, e.to_string()));
                }
            }
            None => {
                self.with_instance(&id, |instance| instance.transition(WidgetState::Loaded));
            }
        }

        tracing::debug!(%id, widget = %widget_type, "widget created");
        self.notify_instances();
        self.get_widget(&id)
            .ok_or_else(|| DashboardError::InstanceNotFound(id))
    }

    fn unique_id(&self, widget_type: &str) -> String {
        let instances = lock(&self.inner.instances);
        loop {
            let id = generate_instance_id(widget_type);
            if !instances.contains_key(&id) {
                return id;
            }
        }
    }

    fn creation_failed(&self, id: &str, message: String) -> DashboardError {
        let error = WidgetError::new(WidgetErrorCode::CreationFailed, message.clone());
        tracing::error!(%id, error = %message, "widget creation failed");
        self.inner.error_listeners.emit(&InstanceError {
            instance_id: id.to_string(),
            error,
        });
        DashboardError::Widget {
            code: WidgetErrorCode::CreationFailed,
            message,
        }
    }

    /// Adopt a saved instance without mounting it. Anything but an error
    /// comes back as `LOADED`; mount it later with [`Self::reload_widget`].
    /// Returns `false` when the id is already live.
    pub fn restore_widget(&self, mut instance: WidgetInstance) -> bool {
        {
            let mut instances = lock(&self.inner.instances);
            if instances.contains_key(&instance.id) {
                return false;
            }
            if instance.state != WidgetState::Error {
                instance.state = WidgetState::Loaded;
            }
            tracing::debug!(id = %instance.id, "widget restored");
            instances.insert(instance.id.clone(), instance);
        }
        self.notify_instances();
        true
    }

    /// Drop an instance that never finished creation.
    fn discard(&self, id: &str) {
        self.unmount(id);
        lock(&self.inner.instances).remove(id);
    }

    /// Resolve, instantiate and mount the component for instance `id`.
    ///
    /// Any component already mounted for the instance is disposed first.
    pub fn load_widget_component(&self, id: &str, host: SharedRenderHost) -> DashboardResult<()> {
        let (widget_type, config, data) = {
            let mut instances = lock(&self.inner.instances);
            let instance = instances
                .get_mut(id)
                .ok_or_else(|| DashboardError::InstanceNotFound(id.to_string()))?;
            if !instance.transition(WidgetState::Loading) {
                return Err(DashboardError::Widget {
                    code: WidgetErrorCode::LoadFailed,
                    message: format!("cannot load widget in state {}", instance.state),
                });
            }
            (
                instance.widget_type().to_string(),
                instance.config.clone(),
                instance.data.clone(),
            )
        };
        self.unmount(id);

        match self.mount(id, &widget_type, config, data, host) {
            Ok(()) => {
                self.with_instance(id, |instance| instance.transition(WidgetState::Loaded));
                self.notify_instances();
                let has_source = self
                    .get_widget(id)
                    .map(|w| w.config.data_source.is_some())
                    .unwrap_or(false);
                if has_source {
                    if let Err(e) = self.bind_data_source(id) {
                        self.unmount(id);
                        return Err(self.load_failed(id, e.to_string()));
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.unmount(id);
                Err(self.load_failed(id, e.to_string()))
            }
        }
    }

    fn mount(
        &self,
        id: &str,
        widget_type: &str,
        config: WidgetConfig,
        data: Option<Value>,
        host: SharedRenderHost,
    ) -> anyhow::Result<()> {
        let factory = self
            .inner
            .registry
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .load_component(widget_type)?;
        let mut widget = factory.create(&config)?;
        lock(&host).mount(id, factory.name())?;

        let weak = self.downgrade();
        let emitter = WidgetEmitter::new(id, move |event| {
            if let Some(orchestrator) = Self::upgrade(&weak) {
                orchestrator.emit_event(event);
            }
        });
        widget.attach(WidgetContext {
            id: id.to_string(),
            config,
            data,
            emitter,
        });

        let widget: SharedWidget = Arc::new(Mutex::new(widget));
        lock(&self.inner.mounted).insert(
            id.to_string(),
            Mounted {
                widget: Arc::clone(&widget),
                host,
            },
        );
        let init = lock(&widget).on_init();
        init
    }

    fn load_failed(&self, id: &str, message: String) -> DashboardError {
        self.record_error(id, WidgetError::new(WidgetErrorCode::LoadFailed, message.clone()));
        DashboardError::Widget {
            code: WidgetErrorCode::LoadFailed,
            message,
        }
    }

    /// Dispose the mounted component and cancel the data binding without
    /// touching the instance record. Disposal errors are returned.
    fn unmount(&self, id: &str) -> Option<String> {
        lock(&self.inner.bindings).remove(id);
        let mounted = lock(&self.inner.mounted).remove(id)?;
        let mut failure = None;
        if let Err(e) = lock(&mounted.widget).on_destroy() {
            failure = Some(e.to_string());
        }
        if let Err(e) = lock(&mounted.host).dispose(id) {
            failure.get_or_insert(e.to_string());
        }
        failure
    }

    /// Retry loading an instance that failed with a recoverable error.
    pub fn reload_widget(&self, id: &str, host: SharedRenderHost) -> DashboardResult<()> {
        let instance = self
            .get_widget(id)
            .ok_or_else(|| DashboardError::InstanceNotFound(id.to_string()))?;
        if let Some(error) = instance.error.filter(|e| !e.recoverable) {
            return Err(DashboardError::Widget {
                code: error.code,
                message: format!("widget {id} is not recoverable: {}", error.message),
            });
        }
        self.load_widget_component(id, host)
    }

    /// Tear down instance `id`. Returns `false` for unknown ids and when
    /// disposal fails; the latter is recorded as `DESTROY_FAILED`.
    pub fn destroy_widget(&self, id: &str) -> bool {
        if !lock(&self.inner.instances).contains_key(id) {
            return false;
        }
        if let Some(message) = self.unmount(id) {
            self.record_error(id, WidgetError::new(WidgetErrorCode::DestroyFailed, message));
            return false;
        }
        let removed = lock(&self.inner.instances).remove(id);
        if let Some(mut instance) = removed {
            instance.transition(WidgetState::Destroyed);
        }
        tracing::debug!(%id, "widget destroyed");
        self.notify_instances();
        true
    }

    /// Shallow-merge `partial` into the instance config and forward it to
    /// the mounted component.
    pub fn update_widget_config(&self, id: &str, partial: Value) -> bool {
        let merged = self.with_instance(id, |instance| {
            let current = serde_json::to_value(&instance.config).unwrap_or(Value::Null);
            let mut merged = merge_json(&current, &partial);
            if let Some(fields) = merged.as_object_mut() {
                fields.insert("type".into(), Value::String(instance.config.widget_type.clone()));
            }
            serde_json::from_value::<WidgetConfig>(merged).map(|config| {
                instance.config = config;
                instance.touch();
            })
        });
        let Some(merged) = merged else {
            self.report_unknown(id, WidgetErrorCode::ConfigUpdateFailed);
            return false;
        };
        if let Err(e) = merged {
            let error = WidgetError::new(WidgetErrorCode::ConfigUpdateFailed, e.to_string());
            self.record_error(id, error);
            return false;
        }

        if let Some(widget) = self.mounted_widget(id) {
            if let Err(e) = lock(&widget).on_config_change(&partial) {
                let error = WidgetError::new(WidgetErrorCode::ConfigUpdateFailed, e.to_string());
                self.record_error(id, error);
                return false;
            }
            if partial.get("dataSource").is_some() {
                match self.bind_data_source(id) {
                    Ok(()) => {}
                    Err(DashboardError::NoProviderFound(kind)) => {
                        let message = format!("no data provider supports {kind}");
                        let error = WidgetError::new(WidgetErrorCode::DataFetchFailed, message);
                        self.record_error(id, error);
                        return false;
                    }
                    // provider failures are recorded by the binding itself
                    Err(_) => return false,
                }
            }
        }
        self.notify_instances();
        true
    }

    /// Replace the layout stored in the instance config.
    pub fn update_widget_layout(&self, id: &str, layout: &WidgetLayout) -> bool {
        self.update_widget_config(id, json!({ "layout": layout }))
    }

    pub fn update_widget_data(&self, id: &str, data: Value) -> bool {
        let known = self
            .with_instance(id, |instance| {
                instance.data = Some(data.clone());
                instance.touch();
            })
            .is_some();
        if !known {
            self.report_unknown(id, WidgetErrorCode::DataUpdateFailed);
            return false;
        }
        if let Some(widget) = self.mounted_widget(id) {
            if let Err(e) = lock(&widget).on_data_change(&data) {
                let error = WidgetError::new(WidgetErrorCode::DataUpdateFailed, e.to_string());
                self.record_error(id, error);
                return false;
            }
        }
        self.notify_instances();
        true
    }

    /// Bind the instance to the first provider supporting its data source,
    /// replacing any previous binding. The previous binding is cancelled
    /// even when no provider is found.
    pub fn bind_data_source(&self, id: &str) -> DashboardResult<()> {
        let source = self
            .get_widget(id)
            .ok_or_else(|| DashboardError::InstanceNotFound(id.to_string()))?
            .config
            .data_source;
        lock(&self.inner.bindings).remove(id);
        let Some(source) = source else {
            return Ok(());
        };
        let provider = lock(&self.inner.providers)
            .find(&source)
            .ok_or_else(|| DashboardError::NoProviderFound(source.kind.clone()))?;

        let weak = self.downgrade();
        let instance_id = id.to_string();
        let (sink, subscription) = DataSink::new(move |event| {
            let Some(orchestrator) = Self::upgrade(&weak) else {
                return;
            };
            match event {
                DataEvent::Next(value) => {
                    orchestrator.update_widget_data(&instance_id, value);
                }
                DataEvent::Error(message) => orchestrator.record_error(
                    &instance_id,
                    WidgetError::new(WidgetErrorCode::DataFetchFailed, message),
                ),
            }
        });
        lock(&self.inner.bindings).insert(id.to_string(), subscription);

        tracing::debug!(%id, provider = %provider.name(), "data source bound");
        if let Err(e) = provider.get_data(&source, sink) {
            lock(&self.inner.bindings).remove(id);
            let message = e.to_string();
            let error = WidgetError::new(WidgetErrorCode::DataFetchFailed, message.clone());
            self.record_error(id, error);
            return Err(DashboardError::Widget {
                code: WidgetErrorCode::DataFetchFailed,
                message,
            });
        }
        Ok(())
    }

    pub fn has_data_binding(&self, id: &str) -> bool {
        lock(&self.inner.bindings)
            .get(id)
            .map(|sub| !sub.is_cancelled())
            .unwrap_or(false)
    }

    /// Publish a widget event on the bus and deliver it to mounted
    /// components: the target first, then, when bubbling, every other
    /// component except the source.
    pub fn emit_event(&self, mut event: WidgetEvent) -> usize {
        event.timestamp = Utc::now();
        let mut delivered = self.inner.bus.publish(event.clone());

        let components: Vec<(String, SharedWidget)> = lock(&self.inner.mounted)
            .iter()
            .map(|(id, m)| (id.clone(), Arc::clone(&m.widget)))
            .collect();
        let target = event.target.as_deref();
        if let Some((_, widget)) = components.iter().find(|(id, _)| Some(id.as_str()) == target) {
            delivered += deliver(widget, &event);
        }
        if event.bubble {
            for (id, widget) in &components {
                if *id == event.source || Some(id.as_str()) == target {
                    continue;
                }
                delivered += deliver(widget, &event);
            }
        }
        delivered
    }

    fn mounted_widget(&self, id: &str) -> Option<SharedWidget> {
        lock(&self.inner.mounted)
            .get(id)
            .map(|m| Arc::clone(&m.widget))
    }

    pub fn is_mounted(&self, id: &str) -> bool {
        lock(&self.inner.mounted).contains_key(id)
    }

    fn with_instance<R>(&self, id: &str, f: impl FnOnce(&mut WidgetInstance) -> R) -> Option<R> {
        lock(&self.inner.instances).get_mut(id).map(f)
    }

    /// Mark the instance as failed and publish the error.
    fn record_error(&self, id: &str, error: WidgetError) {
        tracing::error!(%id, code = %error.code, error = %error.message, "widget error");
        self.with_instance(id, |instance| instance.fail(error.clone()));
        self.inner.error_listeners.emit(&InstanceError {
            instance_id: id.to_string(),
            error,
        });
        self.notify_instances();
    }

    fn report_unknown(&self, id: &str, code: WidgetErrorCode) {
        tracing::debug!(%id, %code, "operation on unknown widget");
        self.inner.error_listeners.emit(&InstanceError {
            instance_id: id.to_string(),
            error: WidgetError::new(code, format!("widget {id} not found")),
        });
    }

    fn notify_instances(&self) {
        let snapshot = self.get_all_widgets();
        self.inner.instance_listeners.emit(&snapshot);
    }

    pub fn get_widget(&self, id: &str) -> Option<WidgetInstance> {
        lock(&self.inner.instances).get(id).cloned()
    }

    /// Live instances in creation order.
    pub fn get_all_widgets(&self) -> Vec<WidgetInstance> {
        lock(&self.inner.instances).values().cloned().collect()
    }

    pub fn get_widgets_by_type(&self, widget_type: &str) -> Vec<WidgetInstance> {
        lock(&self.inner.instances)
            .values()
            .filter(|w| w.widget_type() == widget_type)
            .cloned()
            .collect()
    }

    pub fn widgets_in_state(&self, state: WidgetState) -> Vec<WidgetInstance> {
        lock(&self.inner.instances)
            .values()
            .filter(|w| w.state == state)
            .cloned()
            .collect()
    }

    pub fn errors_for(&self, id: &str) -> Option<WidgetError> {
        lock(&self.inner.instances)
            .get(id)
            .and_then(|w| w.error.clone())
    }

    /// Instance table change stream. `handler` first receives the current
    /// table, then every later snapshot.
    pub fn subscribe_instances(
        &self,
        handler: impl Fn(&Vec<WidgetInstance>) + Send + Sync + 'static,
    ) -> Subscription {
        let handler = Arc::new(handler);
        let sub = self.inner.instance_listeners.subscribe((), handler.clone());
        handler(&self.get_all_widgets());
        sub
    }

    pub fn subscribe_errors(
        &self,
        handler: impl Fn(&InstanceError) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.error_listeners.subscribe_fn(handler)
    }

    pub fn register_data_provider(&self, provider: Arc<dyn WidgetDataProvider>) -> bool {
        lock(&self.inner.providers).register(provider)
    }

    pub fn unregister_data_provider(&self, name: &str) -> bool {
        lock(&self.inner.providers).unregister(name)
    }

    pub fn data_provider_names(&self) -> Vec<String> {
        lock(&self.inner.providers).names()
    }
}

fn build_config(
    widget_type: &str,
    defaults: Option<WidgetConfig>,
    overrides: &Value,
) -> anyhow::Result<WidgetConfig> {
    let base = match defaults {
        Some(config) => serde_json::to_value(config)?,
        None => json!({}),
    };
    let mut merged = deep_merge_json(&base, overrides);
    let Some(fields) = merged.as_object_mut() else {
        anyhow::bail!("config overrides for {widget_type} must be an object");
    };
    fields.insert("type".into(), Value::String(widget_type.to_string()));
    Ok(serde_json::from_value(merged)?)
}

/// A component that is busy (already inside one of its own hooks) does not
/// receive the event.
fn deliver(widget: &SharedWidget, event: &WidgetEvent) -> usize {
    match widget.try_lock() {
        Ok(mut widget) => {
            widget.on_event(event);
            1
        }
        Err(_) => {
            tracing::debug!(event = %event.event_type, "component busy; event not delivered");
            0
        }
    }
}
