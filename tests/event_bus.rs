use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use widget_grid::common::SubscriptionSet;
use widget_grid::dashboard::error::DashboardError;
use widget_grid::dashboard::events::{EventBus, WidgetEvent, STATE_CHANGED};

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&WidgetEvent) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |e: &WidgetEvent| {
        sink.lock().unwrap().push(format!("{}:{}", e.event_type, e.source))
    })
}

#[test]
fn broadcast_is_delivered_by_type() {
    let bus = EventBus::new();
    let (x, on_x) = recorder();
    let (y, on_y) = recorder();
    let _a = bus.subscribe("X", on_x);
    let _b = bus.subscribe("Y", on_y);

    bus.broadcast(WidgetEvent::new("X", "w1"));

    assert_eq!(*x.lock().unwrap(), vec!["X:w1"]);
    assert!(y.lock().unwrap().is_empty());
}

#[test]
fn delivery_follows_subscription_order() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut subs = SubscriptionSet::new();
    for n in 0..3 {
        let order = order.clone();
        subs.push(bus.subscribe("TICK", move |_| order.lock().unwrap().push(n)));
    }
    bus.broadcast(WidgetEvent::system("TICK"));
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

    subs.clear();
    assert_eq!(bus.subscriber_count(), 0);
}

#[test]
fn directed_events_only_reach_target_subscribers() {
    let bus = EventBus::new();
    let (by_type, on_type) = recorder();
    let (by_source, on_source) = recorder();
    let (w2, on_w2) = recorder();
    let (w3, on_w3) = recorder();
    let _a = bus.subscribe("PING", on_type);
    let _b = bus.subscribe_to_widget("w1", on_source);
    let _c = bus.subscribe_to_targeted_events("w2", on_w2);
    let _d = bus.subscribe_to_targeted_events("w3", on_w3);

    bus.send("w2", WidgetEvent::new("PING", "w1"));

    assert!(by_type.lock().unwrap().is_empty());
    assert!(by_source.lock().unwrap().is_empty());
    assert_eq!(*w2.lock().unwrap(), vec!["PING:w1"]);
    assert!(w3.lock().unwrap().is_empty());
}

#[test]
fn unsubscribed_handlers_stop_receiving() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let sub = bus.subscribe("X", handler);
    bus.broadcast(WidgetEvent::new("X", "a"));
    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());
    bus.broadcast(WidgetEvent::new("X", "b"));
    assert_eq!(*seen.lock().unwrap(), vec!["X:a"]);
}

#[test]
fn shared_state_subscription_replays_current_value() {
    let bus = EventBus::new();
    bus.set_shared_state("filter", json!({"q": "rust"}));

    let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::default();
    let s = seen.clone();
    let _sub = bus.subscribe_to_shared_state("filter", move |v| s.lock().unwrap().push(v.clone()));
    bus.set_shared_state("filter", json!({"q": "go"}));
    bus.remove_shared_state("filter");

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some(json!({"q": "rust"})), Some(json!({"q": "go"})), None]
    );
    assert_eq!(bus.get_shared_state("filter"), None);
}

#[test]
fn state_change_event_carries_key_and_value() {
    let bus = EventBus::new();
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let p = payloads.clone();
    let _sub = bus.subscribe(STATE_CHANGED, move |e| p.lock().unwrap().push(e.payload.clone()));
    bus.set_shared_state("theme", json!("dark"));
    assert_eq!(
        *payloads.lock().unwrap(),
        vec![json!({"key": "theme", "value": "dark"})]
    );
    assert_eq!(bus.shared_state_keys(), vec!["theme".to_string()]);
}

#[tokio::test]
async fn request_round_trip_through_responder() {
    let bus = EventBus::new();
    let responder = bus.clone();
    let _sub = bus.subscribe_to_targeted_events("weather", move |event| {
        let city = event.payload["data"]["city"].as_str().unwrap_or_default().to_string();
        responder.respond(event, json!({ "city": city, "temp": 21 }), None);
    });

    let reply = bus
        .request_as("w1", "weather", "GET_FORECAST", json!({"city": "Oslo"}))
        .await
        .unwrap();
    assert_eq!(reply, json!({"city": "Oslo", "temp": 21}));
}

#[tokio::test(start_paused = true)]
async fn request_times_out_after_configured_delay() {
    let bus = EventBus::with_request_timeout(Duration::from_millis(250));
    let started = tokio::time::Instant::now();
    let err = bus.request("ghost", "PING", Value::Null).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(250));
    match err {
        DashboardError::RequestTimeout { target, timeout, .. } => {
            assert_eq!(target, "ghost");
            assert_eq!(timeout, Duration::from_millis(250));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn channels_are_isolated_from_parent_bus() {
    let bus = EventBus::new();
    let (parent, on_parent) = recorder();
    let _p = bus.subscribe("TICK", on_parent);
    let channel = bus.create_channel("metrics");
    let (child, on_child) = recorder();
    let _c = channel.subscribe("TICK", on_child);

    channel.broadcast(WidgetEvent::system("TICK"));

    assert!(parent.lock().unwrap().is_empty());
    assert_eq!(child.lock().unwrap().len(), 1);
    assert!(bus.close_channel("metrics"));
    assert!(bus.channel("metrics").is_none());
}
