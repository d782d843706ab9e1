//! Integration test verifying the per-operation diagnostic events emitted by
//! the `Cache` facade.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use forge_cache::{Cache, CacheConfig};
use tracing::{
    Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records cache operation events with their fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Recorded {
    level: Option<Level>,
    op: String,
    backend: String,
    key: String,
    outcome: String,
    has_latency: bool,
}

impl Visit for Recorded {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "op" => self.op = value.to_owned(),
            "backend" => self.backend = value.to_owned(),
            "key" => self.key = value.to_owned(),
            "outcome" => self.outcome = value.to_owned(),
            _ => {},
        }
    }

    fn record_u64(&mut self, field: &Field, _value: u64) {
        if field.name() == "latency_us" {
            self.has_latency = true;
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

#[derive(Clone, Default)]
struct EventCollector {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl<S> tracing_subscriber::Layer<S> for EventCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut recorded = Recorded { level: Some(*event.metadata().level()), ..Default::default() };
        event.record(&mut recorded);
        if !recorded.op.is_empty() {
            self.events.lock().expect("lock poisoned").push(recorded);
        }
    }
}

fn collect() -> (EventCollector, Arc<Mutex<Vec<Recorded>>>) {
    let collector = EventCollector::default();
    let events = Arc::clone(&collector.events);
    (collector, events)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn debug_mode_reports_every_operation_at_info() {
    let (collector, events) = collect();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let config = CacheConfig::builder().prefix("diag").debug(true).build().expect("config");
    let cache = Cache::in_memory(&config);
    cache.set("k", "v", None).await;
    cache.get("k").await;
    cache.get("absent").await;
    cache.delete("k").await;

    let events = events.lock().expect("lock poisoned");
    let summary: Vec<(&str, &str, &str)> =
        events.iter().map(|e| (e.op.as_str(), e.key.as_str(), e.outcome.as_str())).collect();
    assert_eq!(
        summary,
        vec![
            ("set", "diag:k", "stored"),
            ("get", "diag:k", "hit"),
            ("get", "diag:absent", "miss"),
            ("delete", "diag:k", "deleted"),
        ]
    );
    assert!(events.iter().all(|e| e.level == Some(Level::INFO)));
    assert!(events.iter().all(|e| e.backend == "memory"));
    assert!(events.iter().all(|e| e.has_latency));
}

#[tokio::test]
async fn quiet_mode_reports_at_trace() {
    let (collector, events) = collect();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let cache = Cache::in_memory(&CacheConfig::default());
    cache.get("k").await;

    let events = events.lock().expect("lock poisoned");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Some(Level::TRACE));
}
