use thiserror::Error;

use std::time::Instant;

use crate::config::{self, ProcessFlags};
use crate::group::EventGroup;
use crate::stats::{self, Counter, MetricsRecordRef, WriteMetrics};
use crate::timefmt::FormatError;

pub mod filter;
pub mod tag;
pub mod timestamp;

#[derive(Error, Debug)]
pub enum Error {
    #[error("missing required parameter {0}")]
    MissingParameter(&'static str),
    #[error("invalid parameter {key}: {reason}")]
    InvalidParameter { key: &'static str, reason: String },
    #[error("invalid time format: {0}")]
    Format(#[from] FormatError),
    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
    #[error("metrics: {0}")]
    Metrics(#[from] stats::Error),
}

/// A processing stage. Processors see every group of a batch, in order, and
/// may rewrite events in place, drop them, or split groups.
pub trait Processor: Send {
    fn name(&self) -> &'static str;

    fn process_group(&mut self, group: &mut EventGroup);

    fn process(&mut self, groups: &mut Vec<EventGroup>) {
        for group in groups.iter_mut() {
            self.process_group(group);
        }
    }
}

/// Construction time view of the owning pipeline. Processors register their
/// own counters here; the record is committed once the processor is built.
#[derive(Debug)]
pub struct ProcessorContext {
    pipeline_name: String,
    flags: ProcessFlags,
    record: MetricsRecordRef,
}

impl ProcessorContext {
    pub fn new(
        metrics: &WriteMetrics,
        pipeline_name: &str,
        plugin_type: &str,
        plugin_id: &str,
        flags: ProcessFlags,
    ) -> Self {
        let record = metrics.reserve(
            stats::CATEGORY_PLUGIN,
            stats::labels(&[
                (stats::LABEL_PIPELINE_NAME, pipeline_name),
                (stats::LABEL_PLUGIN_TYPE, plugin_type),
                (stats::LABEL_PLUGIN_ID, plugin_id),
            ]),
        );
        ProcessorContext {
            pipeline_name: pipeline_name.to_owned(),
            flags,
            record,
        }
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn flags(&self) -> &ProcessFlags {
        &self.flags
    }

    pub fn counter(&mut self, name: &str) -> Result<Counter, Error> {
        Ok(self.record.create_counter(name)?)
    }
}

fn totals(groups: &[EventGroup]) -> (u64, u64) {
    groups.iter().fold((0, 0), |(events, bytes), g| {
        (events + g.len() as u64, bytes + g.data_size() as u64)
    })
}

/// A processor together with the metrics the pipeline keeps for it.
pub struct ProcessorInstance {
    processor: Box<dyn Processor>,
    plugin_id: String,
    in_events: Counter,
    in_size: Counter,
    out_events: Counter,
    out_size: Counter,
    process_time_ms: Counter,
    record: MetricsRecordRef,
}

impl ProcessorInstance {
    pub fn new(
        processor: Box<dyn Processor>,
        plugin_id: &str,
        mut context: ProcessorContext,
        metrics: &WriteMetrics,
    ) -> Result<Self, Error> {
        let in_events = context.counter(stats::METRIC_IN_EVENTS_TOTAL)?;
        let in_size = context.counter(stats::METRIC_IN_SIZE_BYTES)?;
        let out_events = context.counter(stats::METRIC_OUT_EVENTS_TOTAL)?;
        let out_size = context.counter(stats::METRIC_OUT_SIZE_BYTES)?;
        let process_time_ms = context.counter(stats::METRIC_TOTAL_PROCESS_TIME_MS)?;
        // Every stage reports these, zero when the processor never uses them
        context.counter(stats::METRIC_DISCARDED_EVENTS_TOTAL)?;
        context.counter(stats::METRIC_OUT_FAILED_EVENTS_TOTAL)?;
        let mut record = context.record;
        metrics.commit(&mut record)?;
        Ok(ProcessorInstance {
            processor,
            plugin_id: plugin_id.to_owned(),
            in_events,
            in_size,
            out_events,
            out_size,
            process_time_ms,
            record,
        })
    }

    pub fn name(&self) -> &'static str {
        self.processor.name()
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn record(&self) -> &MetricsRecordRef {
        &self.record
    }

    pub fn process(&mut self, groups: &mut Vec<EventGroup>) {
        let (events, bytes) = totals(groups);
        self.in_events.inc_by(events);
        self.in_size.inc_by(bytes);

        let start = Instant::now();
        self.processor.process(groups);
        self.process_time_ms
            .inc_by(start.elapsed().as_millis() as u64);

        let (events, bytes) = totals(groups);
        self.out_events.inc_by(events);
        self.out_size.inc_by(bytes);
    }
}

/// Build a processor from its configuration and wrap it with stage metrics.
pub fn build(
    from_config: &config::Processor,
    pipeline_name: &str,
    plugin_id: &str,
    flags: &ProcessFlags,
    metrics: &WriteMetrics,
) -> Result<ProcessorInstance, Error> {
    let mut context = ProcessorContext::new(
        metrics,
        pipeline_name,
        from_config.plugin_type(),
        plugin_id,
        flags.clone(),
    );
    let processor: Box<dyn Processor> = match from_config {
        config::Processor::ParseTimestamp(c) => {
            Box::new(timestamp::ParseTimestamp::new(c, &mut context)?)
        }
        config::Processor::RegexFilter(c) => Box::new(filter::RegexFilter::new(c, &mut context)?),
        config::Processor::AddTags(c) => Box::new(tag::AddTags::new(c, &mut context)?),
    };
    ProcessorInstance::new(processor, plugin_id, context, metrics)
}
