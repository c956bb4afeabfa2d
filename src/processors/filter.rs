use regex::bytes::RegexSet;

use super::{Error, Processor, ProcessorContext};
use crate::config::{self, processor};
use crate::event::Event;
use crate::group::EventGroup;
use crate::stats::{self, Counter};

/// Keeps log events whose source field matches any `Allow` expression and
/// none of the `Remove` expressions.
pub struct RegexFilter {
    source_key: String,
    allow: Option<RegexSet>,
    remove: Option<RegexSet>,

    counter_discarded: Counter,
}

impl RegexFilter {
    pub fn new(
        from_config: &processor::RegexFilter,
        context: &mut ProcessorContext,
    ) -> Result<Self, Error> {
        if from_config.source_key.is_empty() {
            return Err(Error::MissingParameter("SourceKey"));
        }
        let allow = from_config.allow.as_ref().map(RegexSet::new).transpose()?;
        let remove = from_config.remove.as_ref().map(RegexSet::new).transpose()?;
        Ok(RegexFilter {
            source_key: from_config.source_key.clone(),
            allow,
            remove,
            counter_discarded: context.counter(stats::METRIC_DISCARDED_EVENTS_TOTAL)?,
        })
    }

    fn keep(&self, event: &Event) -> bool {
        let log = match event.as_log() {
            Some(log) => log,
            None => return true,
        };
        let value = match log.content(self.source_key.as_bytes()) {
            Some(value) => value,
            None => return self.allow.is_none(),
        };
        if let Some(allow) = &self.allow {
            if !allow.is_match(value) {
                return false;
            }
        }
        if let Some(remove) = &self.remove {
            if remove.is_match(value) {
                return false;
            }
        }
        true
    }
}

impl Processor for RegexFilter {
    fn name(&self) -> &'static str {
        config::TYPE_FILTER_REGEX
    }

    fn process_group(&mut self, group: &mut EventGroup) {
        let before = group.len();
        let events = group.events_mut();
        let mut kept = Vec::with_capacity(before);
        for event in events.drain(..) {
            if self.keep(&event) {
                kept.push(event);
            }
        }
        *events = kept;
        self.counter_discarded.inc_by((before - group.len()) as u64);
    }
}
