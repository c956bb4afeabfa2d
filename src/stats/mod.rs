//! Self monitoring metrics.
//!
//! The write side ([`WriteMetrics`]) hands out records of named counters and
//! gauges which are updated lock free from any thread. The read side
//! ([`ReadMetrics`]) periodically pulls a snapshot of every live record and
//! serves it to any number of concurrent readers.
//!
//! Both sides are plain values, constructed by the caller and passed to
//! whatever needs them; nothing here is global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

mod read;
mod write;

pub use read::ReadMetrics;
pub use write::{RecordHandle, WriteMetrics};

pub const CATEGORY_PLUGIN: &str = "plugin";
pub const CATEGORY_PIPELINE: &str = "pipeline";

pub const LABEL_PIPELINE_NAME: &str = "pipeline_name";
pub const LABEL_PLUGIN_TYPE: &str = "plugin_type";
pub const LABEL_PLUGIN_ID: &str = "plugin_id";

pub const METRIC_IN_EVENTS_TOTAL: &str = "in_events_total";
pub const METRIC_IN_SIZE_BYTES: &str = "in_size_bytes";
pub const METRIC_OUT_EVENTS_TOTAL: &str = "out_events_total";
pub const METRIC_OUT_SIZE_BYTES: &str = "out_size_bytes";
pub const METRIC_TOTAL_PROCESS_TIME_MS: &str = "total_process_time_ms";
pub const METRIC_DISCARDED_EVENTS_TOTAL: &str = "discarded_events_total";
pub const METRIC_OUT_FAILED_EVENTS_TOTAL: &str = "out_failed_events_total";

pub type Labels = Vec<(String, String)>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("metrics record is already committed")]
    Committed,
    #[error("invalid metric: {0}")]
    Metric(#[from] prometheus::Error),
}

#[derive(Clone, Debug)]
pub struct Counter {
    name: Arc<str>,
    counter: prometheus::IntCounter,
}

impl Counter {
    fn new(name: &str) -> Result<Self, Error> {
        let counter = prometheus::IntCounter::new(name, "a counter")?;
        Ok(Counter {
            name: name.into(),
            counter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increment a counter
    pub fn inc(&self) {
        self.counter.inc();
    }

    pub fn inc_by(&self, value: u64) {
        self.counter.inc_by(value);
    }

    /// Return the current counter value
    pub fn get(&self) -> u64 {
        self.counter.get()
    }
}

#[derive(Clone, Debug)]
pub struct Gauge {
    name: Arc<str>,
    gauge: prometheus::IntGauge,
}

impl Gauge {
    fn new(name: &str) -> Result<Self, Error> {
        let gauge = prometheus::IntGauge::new(name, "a gauge")?;
        Ok(Gauge {
            name: name.into(),
            gauge,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self, value: i64) {
        self.gauge.set(value);
    }

    pub fn add(&self, value: i64) {
        self.gauge.add(value);
    }

    pub fn get(&self) -> i64 {
        self.gauge.get()
    }
}

/// A category and label set together with its counters and gauges. The set
/// of metrics is fixed once the record is committed; only values change.
#[derive(Debug)]
pub struct MetricsRecord {
    category: String,
    labels: Labels,
    counters: Vec<Counter>,
    gauges: Vec<Gauge>,
    deleted: AtomicBool,
}

impl MetricsRecord {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    pub fn counters(&self) -> &[Counter] {
        &self.counters
    }

    pub fn gauges(&self) -> &[Gauge] {
        &self.gauges
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            category: self.category.clone(),
            labels: self.labels.clone(),
            counters: self
                .counters
                .iter()
                .map(|c| (c.name().to_owned(), c.get()))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|g| (g.name().to_owned(), g.get()))
                .collect(),
        }
    }
}

/// Owning handle to a metrics record. Counters and gauges may only be added
/// before the record is committed. Dropping the handle retires the record.
#[derive(Debug)]
pub struct MetricsRecordRef {
    record: Arc<MetricsRecord>,
    handle: Option<RecordHandle>,
}

impl MetricsRecordRef {
    fn new(category: &str, labels: Labels) -> Self {
        MetricsRecordRef {
            record: Arc::new(MetricsRecord {
                category: category.to_owned(),
                labels,
                counters: Vec::new(),
                gauges: Vec::new(),
                deleted: AtomicBool::new(false),
            }),
            handle: None,
        }
    }

    fn record_mut(&mut self) -> Result<&mut MetricsRecord, Error> {
        if self.handle.is_some() {
            return Err(Error::Committed);
        }
        Arc::get_mut(&mut self.record).ok_or(Error::Committed)
    }

    /// Create a new counter on this record, or return the existing counter
    /// with the same name.
    pub fn create_counter(&mut self, name: &str) -> Result<Counter, Error> {
        let record = self.record_mut()?;
        if let Some(existing) = record.counters.iter().find(|c| c.name() == name) {
            return Ok(existing.clone());
        }
        let counter = Counter::new(name)?;
        record.counters.push(counter.clone());
        Ok(counter)
    }

    /// Create a new gauge on this record, or return the existing gauge with
    /// the same name.
    pub fn create_gauge(&mut self, name: &str) -> Result<Gauge, Error> {
        let record = self.record_mut()?;
        if let Some(existing) = record.gauges.iter().find(|g| g.name() == name) {
            return Ok(existing.clone());
        }
        let gauge = Gauge::new(name)?;
        record.gauges.push(gauge.clone());
        Ok(gauge)
    }

    pub fn record(&self) -> &MetricsRecord {
        &self.record
    }

    pub fn handle(&self) -> Option<RecordHandle> {
        self.handle
    }

    pub fn is_committed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for MetricsRecordRef {
    fn drop(&mut self) {
        self.record.deleted.store(true, Ordering::Release);
    }
}

/// Point in time values of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub category: String,
    pub labels: Labels,
    pub counters: Vec<(String, u64)>,
    pub gauges: Vec<(String, i64)>,
}

impl RecordSnapshot {
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Build a label set from borrowed pairs.
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}
