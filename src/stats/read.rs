use log::warn;
use parking_lot::RwLock;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use std::collections::HashMap;

use super::{RecordSnapshot, WriteMetrics};
use crate::buffer::View;
use crate::event::{MetricEvent, MetricValue, Timestamp};
use crate::group::EventGroup;

const CATEGORY_TAG: &[u8] = b"category";

/// Read side of the metrics subsystem. Holds the snapshot taken by the last
/// [`update_metrics`](ReadMetrics::update_metrics) call.
#[derive(Debug, Default)]
pub struct ReadMetrics {
    records: RwLock<Vec<RecordSnapshot>>,
}

impl ReadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of the write side and publish it to readers.
    pub fn update_metrics(&self, write: &WriteMetrics) {
        let snapshot = write.do_snapshot();
        *self.records.write() = snapshot;
    }

    pub fn snapshot(&self) -> Vec<RecordSnapshot> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Render the published snapshot as metric events, one per counter or
    /// gauge, named `<category>_<metric>` and tagged with the record labels.
    pub fn read_as_events(&self, timestamp: Timestamp) -> EventGroup {
        let records = self.records.read();
        let mut group = EventGroup::default();
        for record in records.iter() {
            let values = record
                .counters
                .iter()
                .map(|(name, v)| (name, MetricValue::Counter(*v as f64)))
                .chain(
                    record
                        .gauges
                        .iter()
                        .map(|(name, v)| (name, MetricValue::Gauge(*v as f64))),
                );
            for (name, value) in values {
                let name = group.copy_string(family_name(&record.category, name).as_bytes());
                let mut event = MetricEvent::new(timestamp, name, value);
                let category_value = group.copy_string(record.category.as_bytes());
                event
                    .tags
                    .insert(View::from_static(CATEGORY_TAG), category_value);
                for (k, v) in record.labels.iter() {
                    let k = group.copy_string(k.as_bytes());
                    let v = group.copy_string(v.as_bytes());
                    event.tags.insert(k, v);
                }
                group.push_event(event);
            }
        }
        group
    }

    /// Generate and return a byte buffer containing a Prometheus formatted
    /// text output of the published snapshot.
    pub fn prometheus_output(&self) -> anyhow::Result<Vec<u8>> {
        let registry = Registry::new();
        {
            let records = self.records.read();
            for record in records.iter() {
                let const_labels: HashMap<String, String> = record.labels.iter().cloned().collect();
                for (name, value) in record.counters.iter() {
                    let opts = Opts::new(family_name(&record.category, name), "a counter")
                        .const_labels(const_labels.clone());
                    let counter = IntCounter::with_opts(opts)?;
                    counter.inc_by(*value);
                    if let Err(e) = registry.register(Box::new(counter)) {
                        warn!("skipping metric {}_{}: {}", record.category, name, e);
                    }
                }
                for (name, value) in record.gauges.iter() {
                    let opts = Opts::new(family_name(&record.category, name), "a gauge")
                        .const_labels(const_labels.clone());
                    let gauge = IntGauge::with_opts(opts)?;
                    gauge.set(*value);
                    if let Err(e) = registry.register(Box::new(gauge)) {
                        warn!("skipping metric {}_{}: {}", record.category, name, e);
                    }
                }
            }
        }

        let output = registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = vec![];

        encoder.encode(&output, &mut buffer)?;
        Ok(buffer)
    }
}

fn family_name(category: &str, metric: &str) -> String {
    format!("{}_{}", category, metric)
}
