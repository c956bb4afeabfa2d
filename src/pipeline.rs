use log::debug;

use std::sync::Arc;

use crate::batch::Exporter;
use crate::config::{PipelineConfig, ProcessFlags};
use crate::group::EventGroup;
use crate::processors::{self, Error, ProcessorInstance};
use crate::stats::{self, Counter, MetricsRecordRef, WriteMetrics};

pub const METRIC_PROCESSED_BATCHES_TOTAL: &str = "processed_batches_total";
pub const METRIC_FLUSHED_BATCHES_TOTAL: &str = "flushed_batches_total";
pub const METRIC_FLUSHED_SIZE_BYTES: &str = "flushed_size_bytes";

/// Shared state handed to every pipeline at construction.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub metrics: Arc<WriteMetrics>,
    pub flags: ProcessFlags,
}

/// An ordered chain of processors. A pipeline handles one batch at a time
/// and introduces no concurrency of its own.
pub struct Pipeline {
    name: String,
    processors: Vec<ProcessorInstance>,

    counter_processed: Counter,
    counter_flushed: Counter,
    counter_flushed_size: Counter,
    _record: MetricsRecordRef,
}

impl Pipeline {
    pub fn new(
        name: &str,
        processors: Vec<ProcessorInstance>,
        context: &PipelineContext,
    ) -> Result<Self, Error> {
        let mut record = context.metrics.reserve(
            stats::CATEGORY_PIPELINE,
            stats::labels(&[(stats::LABEL_PIPELINE_NAME, name)]),
        );
        let counter_processed = record.create_counter(METRIC_PROCESSED_BATCHES_TOTAL)?;
        let counter_flushed = record.create_counter(METRIC_FLUSHED_BATCHES_TOTAL)?;
        let counter_flushed_size = record.create_counter(METRIC_FLUSHED_SIZE_BYTES)?;
        context.metrics.commit(&mut record)?;

        Ok(Pipeline {
            name: name.to_owned(),
            processors,
            counter_processed,
            counter_flushed,
            counter_flushed_size,
            _record: record,
        })
    }

    /// Build every configured processor, in order. Processors are numbered
    /// from 1 by position.
    pub fn from_config(
        from_config: &PipelineConfig,
        context: &PipelineContext,
    ) -> Result<Self, Error> {
        let processors = from_config
            .processors
            .iter()
            .enumerate()
            .map(|(i, p)| {
                processors::build(
                    p,
                    &from_config.name,
                    &(i + 1).to_string(),
                    &context.flags,
                    &context.metrics,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "pipeline {} built with {} processors",
            from_config.name,
            processors.len()
        );
        Pipeline::new(&from_config.name, processors, context)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processors(&self) -> &[ProcessorInstance] {
        &self.processors
    }

    /// Run every processor over the groups. Groups left without events are
    /// dropped.
    pub fn process(&mut self, groups: &mut Vec<EventGroup>) {
        for processor in self.processors.iter_mut() {
            processor.process(groups);
        }
        groups.retain(|g| !g.is_empty());
        self.counter_processed.inc();
    }

    /// Finalize each remaining group and hand it to the exporter.
    pub fn flush<E: Exporter + ?Sized>(&mut self, groups: &mut Vec<EventGroup>, exporter: &mut E) {
        for group in groups.drain(..) {
            if group.is_empty() {
                continue;
            }
            let batch = group.into_batched();
            self.counter_flushed.inc();
            self.counter_flushed_size.inc_by(batch.size_bytes() as u64);
            exporter.export(batch);
        }
    }

    pub fn run<E: Exporter + ?Sized>(&mut self, mut groups: Vec<EventGroup>, exporter: &mut E) {
        self.process(&mut groups);
        self.flush(&mut groups, exporter);
    }
}
