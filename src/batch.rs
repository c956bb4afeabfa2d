use bytes::Bytes;

use std::collections::HashSet;

use crate::buffer::{BufferId, SourceBuffer, View};
use crate::event::Event;
use crate::sized_map::SizedMap;

/// Opaque delivery bookkeeping token. The core never interprets it; it is
/// carried from the event group to the exporter untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryCheckpoint(Bytes);

impl DeliveryCheckpoint {
    pub fn new<B: Into<Bytes>>(token: B) -> Self {
        DeliveryCheckpoint(token.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// The immutable, export ready form of a finished event group.
///
/// A batch is built exactly once, from [`EventGroup::into_batched`], and is
/// then moved to the exporter. It is deliberately not `Clone`.
///
/// [`EventGroup::into_batched`]: crate::group::EventGroup::into_batched
#[derive(Debug)]
pub struct BatchedOutput {
    events: Vec<Event>,
    tags: SizedMap,
    source_buffers: Vec<SourceBuffer>,
    size_bytes: usize,
    checkpoint: Option<DeliveryCheckpoint>,
    pack_id_prefix: Option<View>,
}

impl BatchedOutput {
    pub(crate) fn new(
        events: Vec<Event>,
        tags: SizedMap,
        source_buffers: Vec<SourceBuffer>,
        size_bytes: usize,
        checkpoint: Option<DeliveryCheckpoint>,
        pack_id_prefix: Option<View>,
    ) -> Self {
        let batch = BatchedOutput {
            events,
            tags,
            source_buffers,
            size_bytes,
            checkpoint,
            pack_id_prefix,
        };
        debug_assert!(
            batch.retains_all_views(),
            "batch references a buffer it does not retain"
        );
        batch
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn tags(&self) -> &SizedMap {
        &self.tags
    }

    pub fn source_buffers(&self) -> &[SourceBuffer] {
        &self.source_buffers
    }

    /// Total serialized size, computed when the batch was finalized.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn checkpoint(&self) -> Option<&DeliveryCheckpoint> {
        self.checkpoint.as_ref()
    }

    pub fn pack_id_prefix(&self) -> Option<&View> {
        self.pack_id_prefix.as_ref()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every buffer referenced by any view in the events, tags or pack id
    /// prefix.
    pub fn referenced_buffers(&self) -> HashSet<BufferId> {
        let mut referenced = HashSet::new();
        let mut visit = |view: &View| {
            if !view.origin().is_static() {
                referenced.insert(view.origin());
            }
        };
        for event in self.events.iter() {
            event.for_each_view(&mut visit);
        }
        for (k, v) in self.tags.iter() {
            visit(k);
            visit(v);
        }
        if let Some(prefix) = &self.pack_id_prefix {
            visit(prefix);
        }
        referenced
    }

    /// Check that the retained buffers are a superset of every referenced
    /// buffer.
    pub fn retains_all_views(&self) -> bool {
        let retained: HashSet<BufferId> = self.source_buffers.iter().map(|b| b.id()).collect();
        self.referenced_buffers().is_subset(&retained)
    }

    pub fn into_parts(
        self,
    ) -> (
        Vec<Event>,
        SizedMap,
        Vec<SourceBuffer>,
        Option<DeliveryCheckpoint>,
        Option<View>,
    ) {
        (
            self.events,
            self.tags,
            self.source_buffers,
            self.checkpoint,
            self.pack_id_prefix,
        )
    }
}

/// Receives finalized batches. Network senders and queues live behind this
/// trait, outside of the processing core.
pub trait Exporter {
    fn export(&mut self, batch: BatchedOutput);
}

impl Exporter for Vec<BatchedOutput> {
    fn export(&mut self, batch: BatchedOutput) {
        self.push(batch);
    }
}
