//! Pluggable data sources for widget instances.

use crate::common::lock;
use crate::dashboard::config::DataSourceConfig;
use hashlink::LinkedHashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// External producer of widget data.
///
/// `get_data` starts a push stream: the provider may call [`DataSink::next`]
/// synchronously, or keep the sink and push later from any thread. The
/// stream ends when the provider calls [`DataSink::error`] or
/// [`DataSink::complete`], or when the orchestrator cancels the binding.
pub trait WidgetDataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, source: &DataSourceConfig) -> bool;

    fn get_data(&self, source: &DataSourceConfig, sink: DataSink) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    Next(Value),
    Error(String),
}

type Deliver = Arc<dyn Fn(DataEvent) + Send + Sync>;

/// Producer half of a data binding.
#[derive(Clone)]
pub struct DataSink {
    closed: Arc<AtomicBool>,
    gate: Arc<Mutex<()>>,
    deliver: Deliver,
}

impl DataSink {
    /// Create a sink and the subscription that cancels it.
    pub fn new(deliver: impl Fn(DataEvent) + Send + Sync + 'static) -> (Self, DataSubscription) {
        let closed = Arc::new(AtomicBool::new(false));
        let sink = Self {
            closed: Arc::clone(&closed),
            gate: Arc::new(Mutex::new(())),
            deliver: Arc::new(deliver),
        };
        (sink, DataSubscription { closed })
    }

    /// Push a value. Returns `false` once the binding is closed; the value
    /// is dropped in that case.
    ///
    /// Emissions from clones of the same sink are serialized.
    pub fn next(&self, value: Value) -> bool {
        let _gate = lock(&self.gate);
        if self.is_closed() {
            return false;
        }
        (self.deliver)(DataEvent::Next(value));
        true
    }

    /// Terminate the stream with an error.
    pub fn error(&self, message: impl Into<String>) {
        let _gate = lock(&self.gate);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        (self.deliver)(DataEvent::Error(message.into()));
    }

    pub fn complete(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Consumer half of a data binding. Dropping it cancels the stream.
#[derive(Debug)]
pub struct DataSubscription {
    closed: Arc<AtomicBool>,
}

impl DataSubscription {
    pub fn cancel(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for DataSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Providers keyed by name, consulted in registration order.
#[derive(Clone, Default)]
pub struct DataProviders {
    entries: LinkedHashMap<String, Arc<dyn WidgetDataProvider>>,
}

impl DataProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `provider`, replacing any provider with the same name. The
    /// replacement is consulted last.
    pub fn register(&mut self, provider: Arc<dyn WidgetDataProvider>) -> bool {
        let name = provider.name().to_string();
        let replaced = self.entries.remove(&name).is_some();
        if replaced {
            tracing::warn!(provider = %name, "data provider replaced");
        }
        self.entries.insert(name, provider);
        replaced
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// First provider whose `supports` accepts `source`.
    pub fn find(&self, source: &DataSourceConfig) -> Option<Arc<dyn WidgetDataProvider>> {
        self.entries
            .values()
            .find(|p| p.supports(source))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
