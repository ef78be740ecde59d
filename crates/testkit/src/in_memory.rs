//! In-memory observability adapters for port contracts.
//!
//! These implementations are intended for:
//! - Unit/integration tests
//! - Asserting which events and metrics a component emitted

use reindex_ports::{LogEvent, LogFields, LoggerPort, TelemetryPort, TelemetryTags, TelemetryTimer};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A no-op logger implementation.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl LoggerPort for NoopLogger {
    fn log(&self, _event: LogEvent) {}

    fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
        Box::new(Self)
    }
}

/// A no-op telemetry timer.
#[derive(Debug, Default)]
pub struct NoopTimer;

impl TelemetryTimer for NoopTimer {
    fn stop(&self) {}
}

/// A no-op telemetry implementation.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn increment_counter(&self, _name: &str, _value: u64, _tags: Option<&TelemetryTags>) {}

    fn record_gauge(&self, _name: &str, _value: u64, _tags: Option<&TelemetryTags>) {}

    fn record_timer_ms(&self, _name: &str, _duration_ms: u64, _tags: Option<&TelemetryTags>) {}

    fn start_timer(&self, _name: &str, _tags: Option<&TelemetryTags>) -> Box<dyn TelemetryTimer> {
        Box::new(NoopTimer)
    }
}

/// Logger that keeps every event; children share the buffer and merge fields.
#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    events: Arc<Mutex<Vec<LogEvent>>>,
    base_fields: LogFields,
}

impl RecordingLogger {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything logged so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Events with the given name.
    pub fn events_named(&self, name: &str) -> Vec<LogEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event.as_ref() == name)
            .collect()
    }
}

impl LoggerPort for RecordingLogger {
    fn log(&self, mut event: LogEvent) {
        if !self.base_fields.is_empty() {
            let mut fields = self.base_fields.clone();
            fields.extend(event.fields.take().unwrap_or_default());
            event.fields = Some(fields);
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut base_fields = self.base_fields.clone();
        base_fields.extend(fields);
        Box::new(Self {
            events: Arc::clone(&self.events),
            base_fields,
        })
    }
}

/// Telemetry that sums counters and keeps the last gauge values.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    counters: Arc<Mutex<BTreeMap<String, u64>>>,
    gauges: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl RecordingTelemetry {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of every increment of `name`, tags ignored.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|counters| counters.get(name).copied())
            .unwrap_or(0)
    }

    /// Last recorded value of `name`.
    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges
            .lock()
            .ok()
            .and_then(|gauges| gauges.get(name).copied())
    }
}

impl TelemetryPort for RecordingTelemetry {
    fn increment_counter(&self, name: &str, value: u64, _tags: Option<&TelemetryTags>) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name.to_owned()).or_default() += value;
        }
    }

    fn record_gauge(&self, name: &str, value: u64, _tags: Option<&TelemetryTags>) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.insert(name.to_owned(), value);
        }
    }

    fn record_timer_ms(&self, _name: &str, _duration_ms: u64, _tags: Option<&TelemetryTags>) {}

    fn start_timer(&self, _name: &str, _tags: Option<&TelemetryTags>) -> Box<dyn TelemetryTimer> {
        Box::new(NoopTimer)
    }
}

/// Build a single-tag map for tests.
#[must_use]
pub fn tags_1(key: &str, value: &str) -> TelemetryTags {
    let mut tags = TelemetryTags::new();
    tags.insert(key.into(), value.into());
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use reindex_ports::LogLevel;

    #[test]
    fn recording_logger_children_share_events() {
        let logger = RecordingLogger::new();
        let mut fields = LogFields::new();
        fields.insert("jobId".into(), serde_json::json!("j1"));
        let child = logger.child(fields);

        child.info("reindex.job.started", "started", None);
        logger.log(LogEvent::new("other", LogLevel::Debug, "x"));

        let started = logger.events_named("reindex.job.started");
        assert_eq!(started.len(), 1);
        assert_eq!(
            started[0].fields.as_ref().and_then(|f| f.get("jobId")),
            Some(&serde_json::json!("j1"))
        );
        assert_eq!(logger.events().len(), 2);
    }

    #[test]
    fn recording_telemetry_sums_counters() {
        let telemetry = RecordingTelemetry::new();
        telemetry.increment_counter("reindex.actions.applied", 2, Some(&tags_1("type", "Foo")));
        telemetry.increment_counter("reindex.actions.applied", 3, None);
        telemetry.record_gauge("reindex.queue.depth", 4, None);
        telemetry.record_gauge("reindex.queue.depth", 1, None);

        assert_eq!(telemetry.counter("reindex.actions.applied"), 5);
        assert_eq!(telemetry.gauge("reindex.queue.depth"), Some(1));
        assert_eq!(telemetry.counter("missing"), 0);
    }
}
