use bytes::{Bytes, BytesMut};

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`SourceBuffer`]. Id 0 is reserved for static
/// program data, which never needs to be retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub const STATIC: BufferId = BufferId(0);

    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn is_static(&self) -> bool {
        *self == BufferId::STATIC
    }
}

/// An (offset, length) range inside a single buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Immutable, reference counted backing storage for raw input.
///
/// Cloning a SourceBuffer is cheap and shares the same bytes. Buffers are never
/// mutated once frozen, so they may be read from any number of threads.
#[derive(Clone)]
pub struct SourceBuffer {
    id: BufferId,
    data: Bytes,
}

impl fmt::Debug for SourceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBuffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

impl SourceBuffer {
    pub fn new<B: Into<Bytes>>(data: B) -> Self {
        SourceBuffer {
            id: BufferId::next(),
            data: data.into(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Borrow a span of this buffer. Returns None if the span falls outside
    /// the buffer.
    pub fn view(&self, span: Span) -> Option<View> {
        if span.end() > self.data.len() {
            return None;
        }
        Some(View {
            origin: self.id,
            data: self.data.slice(span.offset..span.end()),
        })
    }

    pub fn view_all(&self) -> View {
        View {
            origin: self.id,
            data: self.data.clone(),
        }
    }

    /// Return the span a subslice of this buffer occupies, for callers that
    /// tokenized `as_bytes()` directly.
    pub fn span_of(&self, sub: &[u8]) -> Option<Span> {
        let base = self.data.as_ptr() as usize;
        let start = sub.as_ptr() as usize;
        if start < base || start + sub.len() > base + self.data.len() {
            return None;
        }
        Some(Span {
            offset: start - base,
            len: sub.len(),
        })
    }
}

/// Accumulates raw input before it is frozen into a [`SourceBuffer`].
#[derive(Debug, Default)]
pub struct SourceBufferBuilder {
    data: BytesMut,
}

impl SourceBufferBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        SourceBufferBuilder {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Append bytes and return the span they occupy in the final buffer.
    pub fn push(&mut self, input: &[u8]) -> Span {
        let offset = self.data.len();
        self.data.extend_from_slice(input);
        Span {
            offset,
            len: input.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn freeze(self) -> SourceBuffer {
        SourceBuffer::new(self.data.freeze())
    }
}

/// A borrowed range of exactly one [`SourceBuffer`].
///
/// A View can only be produced by a live buffer (or from static data), and its
/// storage handle keeps the underlying bytes valid, so a view never dangles.
/// The event group still records which buffers its views came from, and that
/// list is what travels with a finalized batch. Equality, ordering and hashing
/// are by content.
#[derive(Clone)]
pub struct View {
    origin: BufferId,
    data: Bytes,
}

impl View {
    pub fn from_static(data: &'static [u8]) -> Self {
        View {
            origin: BufferId::STATIC,
            data: Bytes::from_static(data),
        }
    }

    pub fn origin(&self) -> BufferId {
        self.origin
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.data.as_ref()).ok()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for View {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl Borrow<[u8]> for View {
    fn borrow(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl AsRef<[u8]> for View {
    fn as_ref(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl PartialEq for View {
    fn eq(&self, other: &View) -> bool {
        self.data == other.data
    }
}

impl Eq for View {}

impl PartialEq<[u8]> for View {
    fn eq(&self, other: &[u8]) -> bool {
        self.data.as_ref() == other
    }
}

impl PartialEq<&[u8]> for View {
    fn eq(&self, other: &&[u8]) -> bool {
        self.data.as_ref() == *other
    }
}

impl PartialEq<str> for View {
    fn eq(&self, other: &str) -> bool {
        self.data.as_ref() == other.as_bytes()
    }
}

impl PartialEq<&str> for View {
    fn eq(&self, other: &&str) -> bool {
        self.data.as_ref() == other.as_bytes()
    }
}

impl Ord for View {
    fn cmp(&self, other: &Self) -> Ordering {
        self.data.as_ref().cmp(other.data.as_ref())
    }
}

impl PartialOrd for View {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for View {
    // Must agree with the [u8] hash for Borrow lookups
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.as_ref().hash(state);
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.data.as_ref()))
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.data.as_ref()))
    }
}
