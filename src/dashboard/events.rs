//! In-process event bus and shared state store.
//!
//! [`EventBus`] keeps four delivery lists: unfiltered subscribers (every
//! event), type and source subscribers (bubbling events only) and target
//! subscribers (events addressed to that id). It is cheap to clone; clones
//! share the same subscribers, state cells and channels.

use crate::common::{lock, Subscribers, Subscription};
use crate::dashboard::error::{DashboardError, DashboardResult};
use crate::dashboard::instance::generate_instance_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Source used for events that do not originate from a widget.
pub const SYSTEM_SOURCE: &str = "system";

pub const STATE_CHANGED: &str = "STATE_CHANGED";
pub const STATE_REMOVED: &str = "STATE_REMOVED";
pub const STATE_CLEARED: &str = "STATE_CLEARED";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

const RESPONSE_SUFFIX: &str = "_RESPONSE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_bubble")]
    pub bubble: bool,
}

fn default_bubble() -> bool {
    true
}

impl WidgetEvent {
    pub fn new(event_type: impl Into<String>, source: &str) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.to_string(),
            target: None,
            payload: Value::Null,
            timestamp: Utc::now(),
            bubble: true,
        }
    }

    pub fn system(event_type: impl Into<String>) -> Self {
        Self::new(event_type, SYSTEM_SOURCE)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_bubble(mut self, bubble: bool) -> Self {
        self.bubble = bubble;
        self
    }

    /// Correlation id carried by request and response events.
    pub fn request_id(&self) -> Option<&str> {
        self.payload.get("requestId").and_then(Value::as_str)
    }
}

struct BusInner {
    all: Subscribers<(), WidgetEvent>,
    by_type: Subscribers<String, WidgetEvent>,
    by_source: Subscribers<String, WidgetEvent>,
    by_target: Subscribers<String, WidgetEvent>,
    state: Mutex<HashMap<String, Value>>,
    state_watchers: Subscribers<String, Option<Value>>,
    channels: Mutex<HashMap<String, EventBus>>,
    request_timeout: Duration,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                all: Subscribers::new(),
                by_type: Subscribers::new(),
                by_source: Subscribers::new(),
                by_target: Subscribers::new(),
                state: Mutex::new(HashMap::new()),
                state_watchers: Subscribers::new(),
                channels: Mutex::new(HashMap::new()),
                request_timeout,
            }),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Deliver `event` as-is. Returns the number of handlers reached.
    pub fn publish(&self, event: WidgetEvent) -> usize {
        let inner = &self.inner;
        let mut delivered = inner.all.emit(&event);
        if let Some(target) = event.target.as_deref() {
            delivered += inner.by_target.notify(&event, |k| k == target);
        }
        if event.bubble {
            delivered += inner
                .by_type
                .notify(&event, |k| *k == event.event_type);
            delivered += inner.by_source.notify(&event, |k| *k == event.source);
        }
        delivered
    }

    /// Stamp, force `bubble`, and deliver to every matching subscriber.
    pub fn broadcast(&self, mut event: WidgetEvent) -> usize {
        event.timestamp = Utc::now();
        event.bubble = true;
        self.publish(event)
    }

    /// Directed delivery to subscribers registered for `target` only.
    pub fn send(&self, target: &str, mut event: WidgetEvent) -> usize {
        event.timestamp = Utc::now();
        event.target = Some(target.to_string());
        event.bubble = false;
        self.publish(event)
    }

    pub fn subscribe(
        &self,
        event_type: &str,
        handler: impl Fn(&WidgetEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .by_type
            .subscribe(event_type.to_string(), Arc::new(handler))
    }

    pub fn subscribe_to_widget(
        &self,
        source_id: &str,
        handler: impl Fn(&WidgetEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .by_source
            .subscribe(source_id.to_string(), Arc::new(handler))
    }

    pub fn subscribe_to_targeted_events(
        &self,
        target_id: &str,
        handler: impl Fn(&WidgetEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .by_target
            .subscribe(target_id.to_string(), Arc::new(handler))
    }

    /// Unfiltered subscription: sees every event, directed or not.
    pub fn subscribe_all(
        &self,
        handler: impl Fn(&WidgetEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.all.subscribe_fn(handler)
    }

    pub fn subscriber_count(&self) -> usize {
        let inner = &self.inner;
        inner.all.len() + inner.by_type.len() + inner.by_source.len() + inner.by_target.len()
    }

    pub fn set_shared_state(&self, key: &str, value: Value) {
        lock(&self.inner.state).insert(key.to_string(), value.clone());
        let current = Some(value.clone());
        self.inner.state_watchers.notify(&current, |k| k == key);
        self.broadcast(
            WidgetEvent::system(STATE_CHANGED).with_payload(json!({ "key": key, "value": value })),
        );
    }

    pub fn get_shared_state(&self, key: &str) -> Option<Value> {
        lock(&self.inner.state).get(key).cloned()
    }

    /// Replay-last subscription: `handler` runs immediately with the
    /// current value (`None` if never set) and again on every change.
    pub fn subscribe_to_shared_state(
        &self,
        key: &str,
        handler: impl Fn(&Option<Value>) + Send + Sync + 'static,
    ) -> Subscription {
        let handler = Arc::new(handler);
        let sub = self
            .inner
            .state_watchers
            .subscribe(key.to_string(), handler.clone());
        handler(&self.get_shared_state(key));
        sub
    }

    /// Returns `false` (and broadcasts nothing) when the key was never set.
    pub fn remove_shared_state(&self, key: &str) -> bool {
        let removed = lock(&self.inner.state).remove(key).is_some();
        if removed {
            self.inner.state_watchers.notify(&None, |k| k == key);
            self.broadcast(WidgetEvent::system(STATE_REMOVED).with_payload(json!({ "key": key })));
        }
        removed
    }

    pub fn clear_shared_state(&self) {
        let keys: Vec<String> = lock(&self.inner.state).drain().map(|(k, _)| k).collect();
        self.inner
            .state_watchers
            .notify(&None, |k| keys.iter().any(|key| key == k));
        self.broadcast(WidgetEvent::system(STATE_CLEARED));
    }

    pub fn shared_state_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.inner.state).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Directed request from the system source. See [`EventBus::request_as`].
    pub async fn request(
        &self,
        target: &str,
        request_type: &str,
        payload: Value,
    ) -> DashboardResult<Value> {
        self.request_as(SYSTEM_SOURCE, target, request_type, payload)
            .await
    }

    /// Send `request_type` to `target` and wait for the matching
    /// `{request_type}_RESPONSE` carrying the same correlation id.
    ///
    /// Must be awaited inside a tokio runtime with the time driver enabled.
    pub async fn request_as(
        &self,
        source: &str,
        target: &str,
        request_type: &str,
        payload: Value,
    ) -> DashboardResult<Value> {
        let request_id = generate_instance_id("req");
        let response_type = format!("{request_type}{RESPONSE_SUFFIX}");
        let (tx, rx) = oneshot::channel::<Value>();
        let pending = Arc::new(Mutex::new(Some(tx)));

        let listener = {
            let pending = Arc::clone(&pending);
            let request_id = request_id.clone();
            self.subscribe_all(move |event| {
                if event.event_type != response_type
                    || event.request_id() != Some(request_id.as_str())
                {
                    return;
                }
                let tx = lock(&pending).take();
                if let Some(tx) = tx {
                    let _ = tx.send(event.payload.clone());
                }
            })
        };

        self.send(
            target,
            WidgetEvent::new(request_type, source)
                .with_payload(json!({ "requestId": request_id, "data": payload })),
        );

        let outcome = tokio::time::timeout(self.inner.request_timeout, rx).await;
        listener.unsubscribe();

        match outcome {
            Err(_) => {
                tracing::debug!(%target, %request_type, "request timed out");
                Err(DashboardError::RequestTimeout {
                    target: target.to_string(),
                    request_type: request_type.to_string(),
                    timeout: self.inner.request_timeout,
                })
            }
            Ok(Err(_)) => Err(DashboardError::RequestFailed {
                request_type: request_type.to_string(),
                message: "response channel closed".into(),
            }),
            Ok(Ok(response)) => match response.get("error").filter(|e| !e.is_null()) {
                Some(error) => Err(DashboardError::RequestFailed {
                    request_type: request_type.to_string(),
                    message: error
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                }),
                None => Ok(response.get("data").cloned().unwrap_or(Value::Null)),
            },
        }
    }

    /// Reply to a request event, addressed back to its source.
    pub fn respond(&self, request: &WidgetEvent, data: Value, error: Option<&str>) -> usize {
        let responder = request.target.as_deref().unwrap_or(SYSTEM_SOURCE);
        let response = WidgetEvent::new(
            format!("{}{RESPONSE_SUFFIX}", request.event_type),
            responder,
        )
        .with_payload(json!({
            "requestId": request.request_id(),
            "data": data,
            "error": error,
        }));
        self.send(&request.source, response)
    }

    /// Get-or-create a dedicated sub-bus.
    pub fn create_channel(&self, id: &str) -> EventBus {
        lock(&self.inner.channels)
            .entry(id.to_string())
            .or_insert_with(|| EventBus::with_request_timeout(self.inner.request_timeout))
            .clone()
    }

    pub fn channel(&self, id: &str) -> Option<EventBus> {
        lock(&self.inner.channels).get(id).cloned()
    }

    /// Drop the channel and all of its subscribers.
    pub fn close_channel(&self, id: &str) -> bool {
        let removed = lock(&self.inner.channels).remove(id);
        match removed {
            Some(channel) => {
                channel.close();
                true
            }
            None => false,
        }
    }

    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.channels).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn close(&self) {
        let inner = &self.inner;
        inner.all.clear();
        inner.by_type.clear();
        inner.by_source.clear();
        inner.by_target.clear();
        inner.state_watchers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&WidgetEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &WidgetEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn broadcast_reaches_matching_type_only() {
        let bus = EventBus::new();
        let (x, on_x) = counter();
        let (y, on_y) = counter();
        let _sx = bus.subscribe("X", on_x);
        let _sy = bus.subscribe("Y", on_y);
        bus.broadcast(WidgetEvent::new("X", "w1"));
        assert_eq!(x.load(Ordering::SeqCst), 1);
        assert_eq!(y.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn send_skips_type_subscribers() {
        let bus = EventBus::new();
        let (by_type, on_type) = counter();
        let (by_target, on_target) = counter();
        let (all, on_all) = counter();
        let _a = bus.subscribe("PING", on_type);
        let _b = bus.subscribe_to_targeted_events("w2", on_target);
        let _c = bus.subscribe_all(on_all);
        bus.send("w2", WidgetEvent::new("PING", "w1"));
        assert_eq!(by_type.load(Ordering::SeqCst), 0);
        assert_eq!(by_target.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_forces_bubble_for_source_subscribers() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        let _s = bus.subscribe_to_widget("w1", handler);
        bus.broadcast(WidgetEvent::new("ANY", "w1").with_bubble(false));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_state_replays_last_value() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _early =
            bus.subscribe_to_shared_state("theme", move |v| s.lock().unwrap().push(v.clone()));
        bus.set_shared_state("theme", json!("dark"));

        let late = Arc::new(Mutex::new(Vec::new()));
        let l = late.clone();
        let _late =
            bus.subscribe_to_shared_state("theme", move |v| l.lock().unwrap().push(v.clone()));

        assert_eq!(*seen.lock().unwrap(), vec![None, Some(json!("dark"))]);
        assert_eq!(*late.lock().unwrap(), vec![Some(json!("dark"))]);
    }

    #[test]
    fn state_changes_are_broadcast() {
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [STATE_CHANGED, STATE_REMOVED, STATE_CLEARED] {
            let events = events.clone();
            let _ = bus.subscribe(kind, move |e| events.lock().unwrap().push(e.event_type.clone()));
        }
        bus.set_shared_state("a", json!(1));
        assert!(bus.remove_shared_state("a"));
        assert!(!bus.remove_shared_state("a"));
        bus.set_shared_state("b", json!(2));
        bus.clear_shared_state();
        assert_eq!(
            *events.lock().unwrap(),
            vec![STATE_CHANGED, STATE_REMOVED, STATE_CHANGED, STATE_CLEARED]
        );
        assert!(bus.get_shared_state("b").is_none());
    }

    #[test]
    fn channels_are_get_or_create() {
        let bus = EventBus::new();
        let a = bus.create_channel("metrics");
        let (count, handler) = counter();
        let _s = a.subscribe("TICK", handler);
        bus.create_channel("metrics").broadcast(WidgetEvent::system("TICK"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.channel_ids(), vec!["metrics".to_string()]);
        assert!(bus.close_channel("metrics"));
        assert!(!bus.close_channel("metrics"));
        assert_eq!(a.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn request_resolves_with_response_data() {
        let bus = EventBus::new();
        let responder = bus.clone();
        let _s = bus.subscribe_to_targeted_events("clock", move |event| {
            if event.event_type == "GET_TIME" {
                responder.respond(event, json!({"now": 42}), None);
            }
        });
        let data = bus.request("clock", "GET_TIME", json!({})).await.unwrap();
        assert_eq!(data, json!({"now": 42}));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn request_reports_responder_error() {
        let bus = EventBus::new();
        let responder = bus.clone();
        let _s = bus.subscribe_to_targeted_events("clock", move |event| {
            responder.respond(event, Value::Null, Some("offline"));
        });
        let err = bus.request("clock", "GET_TIME", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            DashboardError::RequestFailed { ref message, .. } if message == "offline"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_without_responder() {
        let bus = EventBus::with_request_timeout(Duration::from_millis(5000));
        let started = tokio::time::Instant::now();
        let err = bus.request("nobody", "PING", json!({})).await.unwrap_err();
        assert!(matches!(err, DashboardError::RequestTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(5000));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
