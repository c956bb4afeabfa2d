use parking_lot::Mutex;

use std::sync::Arc;

use super::{Error, Labels, MetricsRecord, MetricsRecordRef, RecordSnapshot};

/// Stable address of a committed record. The generation changes when the
/// slot is reclaimed, so a handle never resolves to a later record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    index: usize,
    generation: u32,
}

impl RecordHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    record: Option<Arc<MetricsRecord>>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

/// Write side of the metrics subsystem: an arena of committed records.
///
/// The lock only guards slot bookkeeping. Counter and gauge updates never
/// touch it.
#[derive(Debug, Default)]
pub struct WriteMetrics {
    arena: Mutex<Arena>,
}

impl WriteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new record. Counters and gauges are attached to the returned
    /// reference, which is then published with [`commit`](WriteMetrics::commit).
    pub fn reserve(&self, category: &str, labels: Labels) -> MetricsRecordRef {
        MetricsRecordRef::new(category, labels)
    }

    pub fn commit(&self, record: &mut MetricsRecordRef) -> Result<RecordHandle, Error> {
        if record.handle.is_some() {
            return Err(Error::Committed);
        }
        let shared = Arc::clone(&record.record);

        let mut arena = self.arena.lock();
        let index = match arena.free.pop() {
            Some(index) => index,
            None => {
                arena.slots.push(Slot::default());
                arena.slots.len() - 1
            }
        };
        let slot = &mut arena.slots[index];
        slot.record = Some(shared);
        let handle = RecordHandle {
            index,
            generation: slot.generation,
        };
        drop(arena);

        record.handle = Some(handle);
        Ok(handle)
    }

    /// Resolve a handle, if the record it was issued for is still live.
    pub fn get(&self, handle: RecordHandle) -> Option<Arc<MetricsRecord>> {
        let arena = self.arena.lock();
        arena
            .slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.clone())
    }

    /// Number of occupied slots, including retired records not yet reclaimed.
    pub fn len(&self) -> usize {
        let arena = self.arena.lock();
        arena.slots.iter().filter(|s| s.record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reclaim the slots of retired records and return the values of every
    /// live record. Values are read after the lock is released.
    pub fn do_snapshot(&self) -> Vec<RecordSnapshot> {
        let live: Vec<Arc<MetricsRecord>> = {
            let mut arena = self.arena.lock();
            let Arena { slots, free } = &mut *arena;
            let mut live = Vec::with_capacity(slots.len());
            for (index, slot) in slots.iter_mut().enumerate() {
                let retired = match &slot.record {
                    Some(record) if record.is_deleted() => true,
                    Some(record) => {
                        live.push(Arc::clone(record));
                        false
                    }
                    None => false,
                };
                if retired {
                    slot.record = None;
                    slot.generation = slot.generation.wrapping_add(1);
                    free.push(index);
                }
            }
            live
        };
        live.iter().map(|record| record.snapshot()).collect()
    }
}
