use std::fmt;
use std::mem::size_of;

use crate::buffer::View;
use crate::sized_map::SizedMap;

/// Seconds and nanoseconds since the unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Timestamp { secs, nanos }
    }

    /// Milliseconds since the epoch, `None` on overflow.
    pub fn as_millis(&self) -> Option<i64> {
        scaled(self.secs, 1_000, self.nanos / 1_000_000)
    }

    pub fn as_micros(&self) -> Option<i64> {
        scaled(self.secs, 1_000_000, self.nanos / 1_000)
    }

    /// Representable up to early 2262.
    pub fn as_nanos(&self) -> Option<i64> {
        scaled(self.secs, 1_000_000_000, self.nanos)
    }
}

fn scaled(secs: i64, per_sec: i64, sub: u32) -> Option<i64> {
    secs.checked_mul(per_sec)?.checked_add(i64::from(sub))
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

const TIMESTAMP_SIZE: usize = size_of::<i64>() + size_of::<u32>();

/// A log line: ordered key/value contents with unique keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogEvent {
    timestamp: Timestamp,
    contents: Vec<(View, View)>,
}

impl LogEvent {
    pub fn new(timestamp: Timestamp) -> Self {
        LogEvent {
            timestamp,
            contents: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    pub fn content(&self, key: &[u8]) -> Option<&View> {
        self.contents
            .iter()
            .find(|(k, _)| k.as_bytes() == key)
            .map(|(_, v)| v)
    }

    pub fn has_content(&self, key: &[u8]) -> bool {
        self.content(key).is_some()
    }

    /// Set a content field. An existing key keeps its position and has its
    /// value replaced; a new key is appended.
    pub fn set_content(&mut self, key: View, value: View) {
        match self.contents.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.contents.push((key, value)),
        }
    }

    pub fn remove_content(&mut self, key: &[u8]) -> Option<View> {
        let index = self.contents.iter().position(|(k, _)| k.as_bytes() == key)?;
        Some(self.contents.remove(index).1)
    }

    pub fn contents(&self) -> impl Iterator<Item = (&View, &View)> {
        self.contents.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn data_size(&self) -> usize {
        TIMESTAMP_SIZE
            + self
                .contents
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Untyped(f64),
    Counter(f64),
    Gauge(f64),
}

impl MetricValue {
    pub fn value(&self) -> f64 {
        match self {
            MetricValue::Untyped(v) | MetricValue::Counter(v) | MetricValue::Gauge(v) => *v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    timestamp: Timestamp,
    pub name: View,
    pub value: MetricValue,
    pub tags: SizedMap,
}

impl MetricEvent {
    pub fn new(timestamp: Timestamp, name: View, value: MetricValue) -> Self {
        MetricEvent {
            timestamp,
            name,
            value,
            tags: SizedMap::new(),
        }
    }

    pub fn data_size(&self) -> usize {
        TIMESTAMP_SIZE + self.name.len() + size_of::<f64>() + self.tags.data_size()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    timestamp: Timestamp,
    pub trace_id: View,
    pub span_id: View,
    pub parent_span_id: Option<View>,
    pub name: View,
    pub start_time_ns: u64,
    pub end_time_ns: u64,
    pub tags: SizedMap,
}

impl SpanEvent {
    pub fn new(timestamp: Timestamp, trace_id: View, span_id: View, name: View) -> Self {
        SpanEvent {
            timestamp,
            trace_id,
            span_id,
            parent_span_id: None,
            name,
            start_time_ns: 0,
            end_time_ns: 0,
            tags: SizedMap::new(),
        }
    }

    pub fn duration_ns(&self) -> u64 {
        self.end_time_ns.saturating_sub(self.start_time_ns)
    }

    pub fn data_size(&self) -> usize {
        TIMESTAMP_SIZE
            + self.trace_id.len()
            + self.span_id.len()
            + self.parent_span_id.as_ref().map_or(0, |p| p.len())
            + self.name.len()
            + 2 * size_of::<u64>()
            + self.tags.data_size()
    }
}

/// A single telemetry event inside an event group.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Log(LogEvent),
    Metric(MetricEvent),
    Span(SpanEvent),
}

impl Event {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Event::Log(e) => e.timestamp,
            Event::Metric(e) => e.timestamp,
            Event::Span(e) => e.timestamp,
        }
    }

    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        match self {
            Event::Log(e) => e.timestamp = timestamp,
            Event::Metric(e) => e.timestamp = timestamp,
            Event::Span(e) => e.timestamp = timestamp,
        }
    }

    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            Event::Log(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_log_mut(&mut self) -> Option<&mut LogEvent> {
        match self {
            Event::Log(e) => Some(e),
            _ => None,
        }
    }

    pub fn data_size(&self) -> usize {
        match self {
            Event::Log(e) => e.data_size(),
            Event::Metric(e) => e.data_size(),
            Event::Span(e) => e.data_size(),
        }
    }

    /// Visit every view this event holds.
    pub fn for_each_view<F: FnMut(&View)>(&self, mut f: F) {
        match self {
            Event::Log(e) => {
                for (k, v) in e.contents.iter() {
                    f(k);
                    f(v);
                }
            }
            Event::Metric(e) => {
                f(&e.name);
                for (k, v) in e.tags.iter() {
                    f(k);
                    f(v);
                }
            }
            Event::Span(e) => {
                f(&e.trace_id);
                f(&e.span_id);
                if let Some(parent) = &e.parent_span_id {
                    f(parent);
                }
                f(&e.name);
                for (k, v) in e.tags.iter() {
                    f(k);
                    f(v);
                }
            }
        }
    }
}

impl From<LogEvent> for Event {
    fn from(e: LogEvent) -> Self {
        Event::Log(e)
    }
}

impl From<MetricEvent> for Event {
    fn from(e: MetricEvent) -> Self {
        Event::Metric(e)
    }
}

impl From<SpanEvent> for Event {
    fn from(e: SpanEvent) -> Self {
        Event::Span(e)
    }
}
