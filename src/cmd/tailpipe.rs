use anyhow::Context;
use chrono::Utc;
use structopt::StructOpt;

use std::io::{Read, Write};
use std::sync::Arc;

use env_logger::Env;
use log::{debug, info};

use tailpipe::batch::{BatchedOutput, Exporter};
use tailpipe::buffer::SourceBuffer;
use tailpipe::event::Timestamp;
use tailpipe::group::EventGroup;
use tailpipe::pipeline::{Pipeline, PipelineContext};
use tailpipe::stats::{ReadMetrics, WriteMetrics};

#[derive(StructOpt, Debug)]
struct Options {
    #[structopt(short = "c", long = "--config", default_value = "/etc/tailpipe.json")]
    pub config: String,

    #[structopt(long = "--config-check-and-exit")]
    pub config_check: bool,

    /// Content key each input line is stored under
    #[structopt(short = "k", long = "--content-key", default_value = "content")]
    pub content_key: String,
}

/// Logs a one line summary of every exported batch.
struct LogExporter {
    pipeline: String,
    batches: usize,
}

impl Exporter for LogExporter {
    fn export(&mut self, batch: BatchedOutput) {
        self.batches += 1;
        info!(
            "pipeline {} exported batch of {} events, {} bytes, {} buffers",
            self.pipeline,
            batch.len(),
            batch.size_bytes(),
            batch.source_buffers().len()
        );
        for event in batch.events() {
            debug!("{} {:?}", event.timestamp(), event);
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let opts = Options::from_args();

    info!("tailpipe loading - {}", env!("CARGO_PKG_VERSION"));

    let config = tailpipe::config::load(opts.config.as_ref())
        .with_context(|| format!("can't load config file from {}", opts.config))?;
    info!("loaded config file {}", opts.config);
    debug!("pipelines defined: {:?}", config.pipelines);

    let context = PipelineContext {
        metrics: Arc::new(WriteMetrics::new()),
        flags: config.flags.clone(),
    };
    let mut pipelines = config
        .pipelines
        .iter()
        .map(|p| {
            Pipeline::from_config(p, &context)
                .with_context(|| format!("can't build pipeline {}", p.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if opts.config_check {
        info!("--config-check-and-exit set, exiting");
        return Ok(());
    }

    let mut input = Vec::new();
    std::io::stdin()
        .read_to_end(&mut input)
        .context("reading stdin")?;
    let buffer = SourceBuffer::new(input);
    let key_buffer = SourceBuffer::new(opts.content_key.into_bytes());
    let content_key = key_buffer.view_all();
    let now = Utc::now();
    let received = Timestamp::new(now.timestamp(), now.timestamp_subsec_nanos());

    for pipeline in pipelines.iter_mut() {
        let mut group = EventGroup::from_lines(buffer.clone(), content_key.clone(), received);
        group.add_source_buffer(key_buffer.clone());
        info!("pipeline {} processing {} events", pipeline.name(), group.len());
        let mut exporter = LogExporter {
            pipeline: pipeline.name().to_owned(),
            batches: 0,
        };
        pipeline.run(vec![group], &mut exporter);
        debug!("pipeline {} exported {} batches", pipeline.name(), exporter.batches);
    }

    let read = ReadMetrics::new();
    read.update_metrics(&context.metrics);
    let output = read.prometheus_output()?;
    std::io::stdout()
        .write_all(&output)
        .context("writing metrics")?;
    Ok(())
}
