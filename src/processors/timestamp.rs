use chrono::{Datelike, Utc};
use log::{debug, warn};

use std::convert::TryFrom;
use std::fmt;

use super::{Error, Processor, ProcessorContext};
use crate::buffer::View;
use crate::config::processor::{self, TimestampUnit};
use crate::event::{Event, Timestamp};
use crate::group::EventGroup;
use crate::stats::{self, Counter};
use crate::timefmt::{self, SecondCache, TimeFormat};

/// Replaces each log event's timestamp with the time parsed out of one of its
/// content fields.
pub struct ParseTimestamp {
    pipeline_name: String,
    source_key: String,
    source_format: String,
    format: Option<TimeFormat>,
    /// Seconds east of UTC of the source wall clock
    offset_secs: i64,
    source_year: Option<i32>,
    precise: Option<(String, TimestampUnit)>,
    discard_old_data: bool,
    discard_interval: i64,
    cache: SecondCache,

    counter_discarded: Counter,
    counter_failed: Counter,
}

impl ParseTimestamp {
    pub fn new(
        from_config: &processor::ParseTimestamp,
        context: &mut ProcessorContext,
    ) -> Result<Self, Error> {
        if from_config.source_key.is_empty() {
            return Err(Error::MissingParameter("SourceKey"));
        }
        let format = if from_config.source_format.is_empty() {
            None
        } else {
            Some(TimeFormat::compile(&from_config.source_format)?)
        };
        let offset_secs = timefmt::parse_gmt_offset(&from_config.source_timezone).map_err(|e| {
            Error::InvalidParameter {
                key: "SourceTimezone",
                reason: e.to_string(),
            }
        })?;
        let precise = match &from_config.precise_timestamp_key {
            Some(key) if key.is_empty() => {
                return Err(Error::InvalidParameter {
                    key: "PreciseTimestampKey",
                    reason: "must not be empty".to_owned(),
                })
            }
            Some(key) => Some((key.clone(), from_config.precise_timestamp_unit)),
            None => None,
        };
        let flags = context.flags().clone();
        debug!(
            "pipeline {} parses {} with format {:?}, zone offset {}s",
            context.pipeline_name(),
            from_config.source_key,
            from_config.source_format,
            offset_secs
        );

        Ok(ParseTimestamp {
            pipeline_name: context.pipeline_name().to_owned(),
            source_key: from_config.source_key.clone(),
            source_format: from_config.source_format.clone(),
            format,
            offset_secs,
            source_year: Some(from_config.source_year).filter(|y| *y > 0),
            precise,
            discard_old_data: flags.discard_old_data,
            discard_interval: i64::try_from(flags.discard_interval).unwrap_or(i64::MAX),
            cache: SecondCache::new(),
            counter_discarded: context.counter(stats::METRIC_DISCARDED_EVENTS_TOTAL)?,
            counter_failed: context.counter(stats::METRIC_OUT_FAILED_EVENTS_TOTAL)?,
        })
    }

    pub fn discarded(&self) -> u64 {
        self.counter_discarded.get()
    }

    pub fn failed(&self) -> u64 {
        self.counter_failed.get()
    }

    /// Process a single event outside of a group pass. With no format
    /// configured, a timestamp parsed elsewhere may be supplied and is applied
    /// as is. Returns false when the event should be dropped.
    pub fn process_event(
        &mut self,
        group: &mut EventGroup,
        event: &mut Event,
        preparsed: Option<Timestamp>,
    ) -> bool {
        let now = Utc::now().timestamp();
        let mut precise_key = None;
        if self.format.is_some() {
            let year = self.default_year();
            return self.parse_event(group, event, now, year, &mut precise_key);
        }
        match preparsed {
            Some(timestamp) => self.apply(group, event, timestamp, now, &mut precise_key),
            None => true,
        }
    }

    fn default_year(&self) -> i32 {
        self.source_year.unwrap_or_else(|| Utc::now().year())
    }

    fn is_history(&self, secs: i64, now: i64) -> bool {
        self.discard_old_data && secs < now.saturating_sub(self.discard_interval)
    }

    fn fail(&self, reason: &str, value: &dyn fmt::Display) {
        if self.counter_failed.get() % 1000 == 0 {
            warn!(
                "{} {:?} with format {:?} (pipeline {}, failures {})",
                reason,
                value.to_string(),
                self.source_format,
                self.pipeline_name,
                self.counter_failed.get()
            );
        }
        self.counter_failed.inc();
    }

    fn parse_event(
        &mut self,
        group: &mut EventGroup,
        event: &mut Event,
        now: i64,
        year: i32,
        precise_key: &mut Option<View>,
    ) -> bool {
        let format = match &self.format {
            Some(format) => format,
            None => return true,
        };
        let value = match event
            .as_log()
            .and_then(|log| log.content(self.source_key.as_bytes()))
        {
            Some(value) => value.clone(),
            None => return true,
        };

        let parsed = match format.parse_cached(&value, year, &mut self.cache) {
            Some(parsed) => parsed,
            None => {
                self.fail("failed to parse time", &value);
                return true;
            }
        };

        let secs = if parsed.is_epoch {
            Some(parsed.secs)
        } else {
            parsed.secs.checked_sub(self.offset_secs)
        };
        match secs {
            Some(secs) => {
                let timestamp = Timestamp::new(secs, parsed.nanos);
                self.apply(group, event, timestamp, now, precise_key)
            }
            None => {
                self.fail("time out of range", &value);
                true
            }
        }
    }

    /// Set the timestamp, and the precise timestamp field when configured.
    /// The precise key is copied into the group on first use and reused.
    fn apply(
        &mut self,
        group: &mut EventGroup,
        event: &mut Event,
        timestamp: Timestamp,
        now: i64,
        precise_key: &mut Option<View>,
    ) -> bool {
        if self.is_history(timestamp.secs, now) {
            self.counter_discarded.inc();
            return false;
        }
        let mut precise = None;
        if let (Some((key, unit)), Some(_)) = (&self.precise, event.as_log()) {
            let value = match unit {
                TimestampUnit::Ms => timestamp.as_millis(),
                TimestampUnit::Us => timestamp.as_micros(),
                TimestampUnit::Ns => timestamp.as_nanos(),
            };
            match value {
                Some(value) => precise = Some((key, value)),
                None => {
                    self.fail("precise timestamp out of range for", &timestamp);
                    return true;
                }
            }
        }

        event.set_timestamp(timestamp);
        if let (Some((key, value)), Some(log)) = (precise, event.as_log_mut()) {
            let key = precise_key
                .get_or_insert_with(|| group.copy_string(key.as_bytes()))
                .clone();
            let value = group.copy_string(value.to_string().as_bytes());
            log.set_content(key, value);
        }
        true
    }
}

impl Processor for ParseTimestamp {
    fn name(&self) -> &'static str {
        crate::config::TYPE_PARSE_TIMESTAMP
    }

    fn process_group(&mut self, group: &mut EventGroup) {
        if self.format.is_none() {
            return;
        }
        self.cache.clear();
        let now = Utc::now().timestamp();
        let year = self.default_year();
        let mut precise_key = None;

        let events = std::mem::take(group.events_mut());
        let mut kept = Vec::with_capacity(events.len());
        for mut event in events {
            if self.parse_event(group, &mut event, now, year, &mut precise_key) {
                kept.push(event);
            }
        }
        *group.events_mut() = kept;
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::config::ProcessFlags;
    use crate::event::{LogEvent, MetricEvent, MetricValue};
    use crate::stats::WriteMetrics;

    const KEY: &[u8] = b"time";

    fn build(format: &str, zone: &str, flags: ProcessFlags) -> ParseTimestamp {
        build_with(
            processor::ParseTimestamp {
                source_key: "time".to_owned(),
                source_format: format.to_owned(),
                source_timezone: zone.to_owned(),
                ..Default::default()
            },
            flags,
        )
    }

    fn build_with(from_config: processor::ParseTimestamp, flags: ProcessFlags) -> ParseTimestamp {
        let metrics = WriteMetrics::new();
        let mut context = ProcessorContext::new(
            &metrics,
            "test",
            crate::config::TYPE_PARSE_TIMESTAMP,
            "1",
            flags,
        );
        ParseTimestamp::new(&from_config, &mut context).unwrap()
    }

    fn no_discard() -> ProcessFlags {
        ProcessFlags {
            discard_old_data: false,
            ..Default::default()
        }
    }

    fn group_of(times: &[String]) -> EventGroup {
        let mut group = EventGroup::default();
        for time in times {
            let value = group.copy_string(time.as_bytes());
            let mut log = LogEvent::new(Timestamp::new(7, 7));
            log.set_content(View::from_static(KEY), value);
            log.set_content(View::from_static(b"content"), View::from_static(b"line"));
            group.push_event(log);
        }
        group
    }

    fn timestamps(group: &EventGroup) -> Vec<Timestamp> {
        group.events().iter().map(Event::timestamp).collect()
    }

    #[test]
    fn parse_with_zone() {
        let mut p = build("%Y-%m-%d %H:%M:%S.%f", "GMT+00:00", no_discard());
        let mut group = group_of(&["2017-1-11 15:05:07.012".to_owned()]);
        p.process_group(&mut group);
        assert_eq!(timestamps(&group), vec![Timestamp::new(1484147107, 12_000_000)]);
        assert_eq!(p.failed(), 0);
        assert_eq!(p.discarded(), 0);
    }

    #[test]
    fn current_time_with_offset() {
        let mut p = build("%Y-%m-%d %H:%M:%S", "GMT+08:00", ProcessFlags::default());
        let now = Utc::now();
        let text = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let mut group = group_of(&[text.clone(), text]);
        p.process_group(&mut group);

        let expected = Timestamp::new(now.timestamp() - 28800, 0);
        assert_eq!(timestamps(&group), vec![expected, expected]);
        assert_eq!(p.discarded(), 0);
        assert_eq!(p.failed(), 0);
    }

    #[test]
    fn zone_shifts_cached_minute() {
        let mut p = build("%Y-%m-%d %H:%M:%S", "GMT+07:00", no_discard());
        let times: Vec<String> = (0..5).map(|i| format!("2012-01-01 15:05:0{}", i)).collect();
        let mut group = group_of(&times);
        p.process_group(&mut group);
        let secs: Vec<i64> = timestamps(&group).iter().map(|t| t.secs).collect();
        assert_eq!(secs, (0..5).map(|i| 1325405100 + i).collect::<Vec<_>>());
    }

    #[test]
    fn epoch_is_not_shifted() {
        let mut p = build("%s", "GMT+08:00", no_discard());
        let mut group = group_of(&["1484147107123".to_owned()]);
        p.process_group(&mut group);
        assert_eq!(timestamps(&group), vec![Timestamp::new(1484147107, 123_000_000)]);
    }

    #[test]
    fn history_is_discarded() {
        let flags = ProcessFlags::default();
        let mut p = build("%Y-%m-%d %H:%M:%S", "GMT+00:00", flags.clone());
        let old = Utc::now() - chrono::Duration::seconds(flags.discard_interval as i64 + 1);
        let text = old.format("%Y-%m-%d %H:%M:%S").to_string();
        let mut group = group_of(&[text.clone(), text.clone()]);
        assert_ne!(group.data_size(), 0);
        p.process_group(&mut group);
        assert!(group.is_empty());
        assert_eq!(p.discarded(), 2);
        assert_eq!(p.failed(), 0);

        // Same input passes once discarding is disabled
        let mut p = build("%Y-%m-%d %H:%M:%S", "GMT+00:00", no_discard());
        let mut group = group_of(&[text]);
        p.process_group(&mut group);
        assert_eq!(group.len(), 1);
        assert_eq!(p.discarded(), 0);
    }

    #[test]
    fn failures_leave_events_untouched() {
        let mut p = build("%Y-%m-%d %H:%M:%S", "", no_discard());
        let mut group = group_of(&["yesterday".to_owned(), "2017-13-40 99:99:99".to_owned()]);
        let before = group.events().to_vec();
        p.process_group(&mut group);
        assert_eq!(group.events(), &before[..]);
        assert_eq!(p.failed(), 2);
        assert_eq!(p.discarded(), 0);
    }

    #[test]
    fn unrelated_events_pass_uncounted() {
        let mut p = build("%Y-%m-%d %H:%M:%S", "", ProcessFlags::default());
        let mut group = EventGroup::default();
        let mut log = LogEvent::new(Timestamp::new(3, 0));
        log.set_content(View::from_static(b"other"), View::from_static(b"x"));
        group.push_event(log);
        group.push_event(MetricEvent::new(
            Timestamp::new(4, 0),
            View::from_static(b"cpu"),
            MetricValue::Gauge(1.0),
        ));
        p.process_group(&mut group);
        assert_eq!(timestamps(&group), vec![Timestamp::new(3, 0), Timestamp::new(4, 0)]);
        assert_eq!(p.failed(), 0);
        assert_eq!(p.discarded(), 0);
    }

    #[test]
    fn reprocessing_is_idempotent() {
        let mut p = build_with(
            processor::ParseTimestamp {
                source_key: "time".to_owned(),
                source_format: "%d %b %y %H:%M".to_owned(),
                precise_timestamp_key: Some("precise".to_owned()),
                ..Default::default()
            },
            no_discard(),
        );
        let mut group = group_of(&["11 Jan 17 15:05 MST".to_owned()]);
        p.process_group(&mut group);
        let first = group.events().to_vec();
        p.process_group(&mut group);
        assert_eq!(group.events(), &first[..]);
        let log = group.events()[0].as_log().unwrap();
        assert_eq!(log.timestamp(), Timestamp::new(1484147100, 0));
        assert_eq!(log.content(b"precise").unwrap(), "1484147100000");
        assert_eq!(log.len(), 3);
        assert!(group.into_batched().retains_all_views());
    }

    #[test]
    fn precise_timestamp_units() {
        for (unit, expected) in [
            (TimestampUnit::Ms, "1484147107012"),
            (TimestampUnit::Us, "1484147107012345"),
            (TimestampUnit::Ns, "1484147107012345678"),
        ]
        .iter()
        {
            let mut p = build_with(
                processor::ParseTimestamp {
                    source_key: "time".to_owned(),
                    source_format: "%Y-%m-%d %H:%M:%S.%f".to_owned(),
                    precise_timestamp_key: Some("precise".to_owned()),
                    precise_timestamp_unit: *unit,
                    ..Default::default()
                },
                no_discard(),
            );
            let mut group = group_of(&["2017-01-11 15:05:07.012345678".to_owned()]);
            p.process_group(&mut group);
            let log = group.events()[0].as_log().unwrap();
            assert_eq!(log.content(b"precise").unwrap(), *expected);
        }
    }

    fn with_precise(unit: TimestampUnit) -> ParseTimestamp {
        build_with(
            processor::ParseTimestamp {
                source_key: "time".to_owned(),
                source_format: "%Y-%m-%d %H:%M:%S".to_owned(),
                precise_timestamp_key: Some("precise".to_owned()),
                precise_timestamp_unit: unit,
                ..Default::default()
            },
            no_discard(),
        )
    }

    #[test]
    fn precise_overflow_is_a_failure() {
        let mut p = with_precise(TimestampUnit::Ns);
        let mut group = group_of(&["9999-12-31 23:59:59".to_owned()]);
        let before = group.events().to_vec();
        p.process_group(&mut group);
        assert_eq!(group.events(), &before[..]);
        assert_eq!(p.failed(), 1);
        assert_eq!(p.discarded(), 0);

        // Fits once the unit is coarse enough
        let mut p = with_precise(TimestampUnit::Ms);
        let mut group = group_of(&["9999-12-31 23:59:59".to_owned()]);
        p.process_group(&mut group);
        let log = group.events()[0].as_log().unwrap();
        assert_eq!(log.timestamp(), Timestamp::new(253402300799, 0));
        assert_eq!(log.content(b"precise").unwrap(), "253402300799000");
        assert_eq!(p.failed(), 0);
    }

    #[test]
    fn precise_key_copied_once_per_group() {
        let mut p = with_precise(TimestampUnit::Ms);
        let times: Vec<String> = (0..100)
            .map(|i| format!("2017-01-11 15:{:02}:07", i % 60))
            .collect();
        let mut group = group_of(&times);
        assert_eq!(group.source_buffers().len(), 100);
        p.process_group(&mut group);

        // One buffer for the key, one per precise value
        assert_eq!(group.source_buffers().len(), 201);
        let keys: Vec<_> = group
            .events()
            .iter()
            .map(|e| {
                let log = e.as_log().unwrap();
                let (key, _) = log.contents().find(|(k, _)| k.as_bytes() == b"precise").unwrap();
                key.origin()
            })
            .collect();
        assert!(keys.iter().all(|origin| *origin == keys[0]));
        assert!(group.into_batched().retains_all_views());
    }

    #[test]
    fn huge_discard_interval_keeps_everything() {
        let flags = ProcessFlags {
            discard_old_data: true,
            discard_interval: u64::MAX,
        };
        let mut p = build("%Y-%m-%d %H:%M:%S", "", flags);
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut group = group_of(&[now, "1970-01-02 00:00:00".to_owned()]);
        p.process_group(&mut group);
        assert_eq!(group.len(), 2);
        assert_eq!(p.discarded(), 0);
    }

    #[test]
    fn source_year_fills_missing_year() {
        let mut p = build_with(
            processor::ParseTimestamp {
                source_key: "time".to_owned(),
                source_format: "%m-%d %H:%M:%S".to_owned(),
                source_year: 2017,
                ..Default::default()
            },
            no_discard(),
        );
        let mut group = group_of(&["01-11 15:05:07".to_owned()]);
        p.process_group(&mut group);
        assert_eq!(timestamps(&group), vec![Timestamp::new(1484147107, 0)]);
    }

    #[test]
    fn empty_format_passes_through() {
        let mut p = build("", "", ProcessFlags::default());
        let mut group = group_of(&["2017-1-11 15:05:07".to_owned()]);
        p.process_group(&mut group);
        assert_eq!(timestamps(&group), vec![Timestamp::new(7, 7)]);
        assert_eq!(p.failed(), 0);
    }

    #[test]
    fn preparsed_timestamp() {
        let mut p = build("", "", ProcessFlags::default());
        let mut group = EventGroup::default();
        let recent = Timestamp::new(Utc::now().timestamp(), 5);
        let mut event: Event = LogEvent::new(Timestamp::default()).into();
        assert!(p.process_event(&mut group, &mut event, Some(recent)));
        assert_eq!(event.timestamp(), recent);

        let mut event: Event = LogEvent::new(Timestamp::default()).into();
        assert!(!p.process_event(&mut group, &mut event, Some(Timestamp::new(1, 0))));
        assert_eq!(p.discarded(), 1);

        let mut event: Event = LogEvent::new(Timestamp::new(9, 0)).into();
        assert!(p.process_event(&mut group, &mut event, None));
        assert_eq!(event.timestamp(), Timestamp::new(9, 0));
    }

    #[test]
    fn single_event_with_format() {
        let mut p = build("%Y-%m-%d %H:%M:%S", "", no_discard());
        let mut group = EventGroup::default();
        let mut log = LogEvent::new(Timestamp::default());
        log.set_content(View::from_static(KEY), View::from_static(b"2017-01-11 15:05:07"));
        let mut event: Event = log.into();
        assert!(p.process_event(&mut group, &mut event, None));
        assert_eq!(event.timestamp(), Timestamp::new(1484147107, 0));
    }

    #[test]
    fn invalid_configuration() {
        let metrics = WriteMetrics::new();
        let mut context = ProcessorContext::new(
            &metrics,
            "test",
            crate::config::TYPE_PARSE_TIMESTAMP,
            "1",
            ProcessFlags::default(),
        );
        let missing_key = processor::ParseTimestamp::default();
        assert!(matches!(
            ParseTimestamp::new(&missing_key, &mut context),
            Err(Error::MissingParameter("SourceKey"))
        ));
        let bad_zone = processor::ParseTimestamp {
            source_key: "time".to_owned(),
            source_timezone: "UTC+8".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            ParseTimestamp::new(&bad_zone, &mut context),
            Err(Error::InvalidParameter { key: "SourceTimezone", .. })
        ));
    }
}
