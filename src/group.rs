use bytes::BytesMut;
use memchr::memchr;

use std::collections::HashSet;

use crate::batch::{BatchedOutput, DeliveryCheckpoint};
use crate::buffer::{BufferId, SourceBuffer, View};
use crate::event::{Event, LogEvent, Timestamp};
use crate::sized_map::SizedMap;

const COPY_ARENA_BLOCK: usize = 4096;

/// A mutable, in-flight batch of events travelling through one pass of a
/// processor chain.
///
/// The group owns every buffer its views point into. Views from a buffer the
/// group does not hold must be registered with
/// [`add_source_buffer`](EventGroup::add_source_buffer) before they are stored
/// in an event or tag; [`copy_string`](EventGroup::copy_string) does this
/// automatically for newly produced data.
#[derive(Debug, Default)]
pub struct EventGroup {
    events: Vec<Event>,
    tags: SizedMap,
    source_buffers: Vec<SourceBuffer>,
    buffer_ids: HashSet<BufferId>,
    checkpoint: Option<DeliveryCheckpoint>,
    pack_id_prefix: Option<View>,
    arena: BytesMut,
}

impl EventGroup {
    pub fn new(buffer: SourceBuffer) -> Self {
        let mut group = EventGroup::default();
        group.add_source_buffer(buffer);
        group
    }

    /// Tokenize a buffer into one log event per line, each holding the line
    /// under `content_key`. A trailing `\r` is stripped and a final line
    /// without a terminating newline is kept.
    pub fn from_lines(buffer: SourceBuffer, content_key: View, timestamp: Timestamp) -> Self {
        let mut group = EventGroup::new(buffer.clone());
        let mut scan = buffer.as_bytes();
        while !scan.is_empty() {
            let (mut line, rest) = match memchr(b'\n', scan) {
                Some(newline) => (&scan[..newline], &scan[newline + 1..]),
                None => (scan, &scan[scan.len()..]),
            };
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if let Some(view) = buffer.span_of(line).and_then(|span| buffer.view(span)) {
                let mut log = LogEvent::new(timestamp);
                log.set_content(content_key.clone(), view);
                group.events.push(Event::Log(log));
            }
            scan = rest;
        }
        group
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut Vec<Event> {
        &mut self.events
    }

    pub fn push_event<E: Into<Event>>(&mut self, event: E) {
        self.events.push(event.into());
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn tags(&self) -> &SizedMap {
        &self.tags
    }

    pub fn set_tag(&mut self, key: View, value: View) {
        self.tags.insert(key, value);
    }

    /// Copy key and value into group storage and set them as a tag.
    pub fn set_tag_copied(&mut self, key: &[u8], value: &[u8]) {
        let key = self.copy_string(key);
        let value = self.copy_string(value);
        self.tags.insert(key, value);
    }

    pub fn remove_tag(&mut self, key: &[u8]) -> Option<View> {
        self.tags.remove(key)
    }

    pub fn source_buffers(&self) -> &[SourceBuffer] {
        &self.source_buffers
    }

    pub fn holds_buffer(&self, id: BufferId) -> bool {
        id.is_static() || self.buffer_ids.contains(&id)
    }

    /// Retain an additional buffer. Adding a buffer already held is a no-op.
    pub fn add_source_buffer(&mut self, buffer: SourceBuffer) {
        if !buffer.id().is_static() && self.buffer_ids.insert(buffer.id()) {
            self.source_buffers.push(buffer);
        }
    }

    /// Copy bytes into storage owned by this group and return a view of them.
    /// Copies share larger arena allocations, and each copy is frozen into
    /// its own immutable buffer.
    pub fn copy_string(&mut self, input: &[u8]) -> View {
        if self.arena.capacity() - self.arena.len() < input.len() {
            self.arena.reserve(COPY_ARENA_BLOCK.max(input.len()));
        }
        self.arena.extend_from_slice(input);
        let buffer = SourceBuffer::new(self.arena.split().freeze());
        let view = buffer.view_all();
        self.buffer_ids.insert(buffer.id());
        self.source_buffers.push(buffer);
        view
    }

    pub fn checkpoint(&self) -> Option<&DeliveryCheckpoint> {
        self.checkpoint.as_ref()
    }

    pub fn set_checkpoint(&mut self, checkpoint: DeliveryCheckpoint) {
        self.checkpoint = Some(checkpoint);
    }

    pub fn pack_id_prefix(&self) -> Option<&View> {
        self.pack_id_prefix.as_ref()
    }

    pub fn set_pack_id_prefix(&mut self, prefix: View) {
        self.pack_id_prefix = Some(prefix);
    }

    /// Serialized size of all events and tags.
    pub fn data_size(&self) -> usize {
        self.events.iter().map(Event::data_size).sum::<usize>() + self.tags.data_size()
    }

    /// Move the events of `other` into this group. Buffers are unioned, and
    /// tags of `other` are adopted only where this group has no value.
    pub fn merge(&mut self, mut other: EventGroup) {
        self.source_buffers.reserve(other.source_buffers.len());
        for buffer in other.source_buffers.drain(..) {
            self.add_source_buffer(buffer);
        }
        for (k, v) in other.tags.iter() {
            if !self.tags.contains_key(k.as_bytes()) {
                self.tags.insert(k.clone(), v.clone());
            }
        }
        self.events.append(&mut other.events);
        if self.checkpoint.is_none() {
            self.checkpoint = other.checkpoint.take();
        }
    }

    /// Split off the events at `at..` into a new group which shares this
    /// group's buffers, tags and pack id prefix.
    pub fn split_off(&mut self, at: usize) -> EventGroup {
        EventGroup {
            events: self.events.split_off(at),
            tags: self.tags.clone(),
            source_buffers: self.source_buffers.clone(),
            buffer_ids: self.buffer_ids.clone(),
            checkpoint: None,
            pack_id_prefix: self.pack_id_prefix.clone(),
            arena: BytesMut::new(),
        }
    }

    /// Finalize the group into an immutable batch for export.
    pub fn into_batched(self) -> BatchedOutput {
        let size_bytes = self.data_size();
        BatchedOutput::new(
            self.events,
            self.tags,
            self.source_buffers,
            size_bytes,
            self.checkpoint,
            self.pack_id_prefix,
        )
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::buffer::SourceBufferBuilder;

    fn lines_group(input: &'static [u8]) -> EventGroup {
        EventGroup::from_lines(
            SourceBuffer::new(input),
            View::from_static(b"content"),
            Timestamp::new(1, 0),
        )
    }

    #[test]
    fn split_lines() {
        let group = lines_group(b"first\r\nsecond\nthird");
        assert_eq!(group.len(), 3);
        let contents: Vec<String> = group
            .events()
            .iter()
            .map(|e| e.as_log().unwrap().content(b"content").unwrap().to_string())
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(group.source_buffers().len(), 1);
    }

    #[test]
    fn split_lines_keeps_empty_lines() {
        let group = lines_group(b"a\n\nb\n");
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn copy_string_registers_buffer() {
        let mut group = EventGroup::default();
        let view = group.copy_string(b"copied");
        assert_eq!(view, "copied");
        assert!(group.holds_buffer(view.origin()));

        let second = group.copy_string(b"again");
        assert_ne!(view.origin(), second.origin());
        assert!(group.holds_buffer(second.origin()));
        // First copy unaffected by later arena writes
        assert_eq!(view, "copied");
    }

    #[test]
    fn add_buffer_is_idempotent() {
        let buffer = SourceBuffer::new(&b"x"[..]);
        let mut group = EventGroup::new(buffer.clone());
        group.add_source_buffer(buffer);
        assert_eq!(group.source_buffers().len(), 1);
    }

    #[test]
    fn merge_groups() {
        let mut a = lines_group(b"one\ntwo");
        a.set_tag(View::from_static(b"host"), View::from_static(b"a"));
        let mut b = lines_group(b"three");
        b.set_tag(View::from_static(b"host"), View::from_static(b"b"));
        b.set_tag(View::from_static(b"zone"), View::from_static(b"z"));

        a.merge(b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.source_buffers().len(), 2);
        assert_eq!(a.tags().get(b"host").unwrap(), "a");
        assert_eq!(a.tags().get(b"zone").unwrap(), "z");
    }

    #[test]
    fn merge_many_copied_buffers() {
        let copied = |n: usize| {
            let mut group = EventGroup::default();
            for i in 0..n {
                let value = group.copy_string(i.to_string().as_bytes());
                let mut log = LogEvent::new(Timestamp::default());
                log.set_content(View::from_static(b"n"), value);
                group.push_event(log);
            }
            group
        };
        let mut a = copied(20_000);
        let b = copied(20_000);
        let shared = a.source_buffers()[0].clone();
        a.merge(b);
        assert_eq!(a.len(), 40_000);
        assert_eq!(a.source_buffers().len(), 40_000);
        a.add_source_buffer(shared);
        assert_eq!(a.source_buffers().len(), 40_000);
        assert!(a.into_batched().retains_all_views());
    }

    #[test]
    fn split_off_shares_buffers() {
        let mut group = lines_group(b"1\n2\n3\n4");
        group.set_tag(View::from_static(b"t"), View::from_static(b"v"));
        let tail = group.split_off(3);
        assert_eq!(group.len(), 3);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail.source_buffers()[0].id(), group.source_buffers()[0].id());
        assert_eq!(tail.tags().get(b"t").unwrap(), "v");
    }

    #[test]
    fn data_size_counts_events_and_tags() {
        let mut builder = SourceBufferBuilder::default();
        let span = builder.push(b"payload");
        let buffer = builder.freeze();
        let mut group = EventGroup::new(buffer.clone());
        let mut log = LogEvent::new(Timestamp::default());
        log.set_content(View::from_static(b"k"), buffer.view(span).unwrap());
        let event_size = log.data_size();
        group.push_event(log);
        group.set_tag_copied(b"tag", b"value");
        assert_eq!(group.data_size(), event_size + 8);
    }
}
