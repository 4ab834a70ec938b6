//! Producer streams and region guards.
//!
//! A stream owns a double buffer. Emits append to the front buffer with no
//! synchronization at all; when a message would overflow, the front and
//! back buffers swap and the back buffer is queued for consolidation. The
//! swap blocks until the consolidator has drained the previous back buffer,
//! which is the pipeline's per-producer back-pressure.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use crate::buffer::AlignedBuf;
use crate::category::{CategoryFilter, LogEverything};
use crate::format::{FormatType, ParameterPack};
use crate::key::{ANON_REGION_START, NAMED_REGION_START, REGION_END};
use crate::log::{FlushBlock, LogShared};
use crate::registry::{FormatRegistry, MessageToken};

/// A producer channel into a [`Log`](crate::Log).
///
/// Streams are cheap to create and single-threaded by construction; move
/// one into each producer thread. Dropping a stream flushes whatever is
/// left in its front buffer through the pipeline.
pub struct Stream<'log, C: CategoryFilter = LogEverything> {
    shared: &'log LogShared,
    index: u64,
    capacity: usize,
    front: AlignedBuf,
    offset: usize,
    recycle_tx: SyncSender<AlignedBuf>,
    recycle_rx: Receiver<AlignedBuf>,
    _filter: PhantomData<C>,
}

impl<'log, C: CategoryFilter> Stream<'log, C> {
    pub(crate) fn new(shared: &'log LogShared, index: u64, capacity: usize) -> Self {
        let (recycle_tx, recycle_rx) = sync_channel(1);
        // The second buffer starts out as the flush credit: the first swap
        // takes it without waiting.
        recycle_tx
            .send(AlignedBuf::new(capacity))
            .expect("priming the stream flush credit");
        Self {
            shared,
            index,
            capacity,
            front: AlignedBuf::new(capacity),
            offset: 0,
            recycle_tx,
            recycle_rx,
            _filter: PhantomData,
        }
    }

    /// Index of this stream within the log, as it appears in block headers.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Appends one message: key, optional ordering index, then the packed
    /// parameter bytes.
    ///
    /// The message must fit in the stream buffer. Category filtering is the
    /// caller's job ([`message!`](crate::message) checks it before
    /// evaluating arguments).
    pub fn emit<P: ParameterPack>(&mut self, token: MessageToken, params: P) {
        let index_bytes = if self.shared.ordering { 8 } else { 0 };
        self.reserve(4 + index_bytes + P::SIZE);

        self.put(&token.key().0.to_le_bytes());
        if self.shared.ordering {
            let index = self.shared.message_index.fetch_add(1, Ordering::Relaxed);
            self.put(&index.to_le_bytes());
        }
        let start = self.offset;
        params.write_le(&mut self.front.as_mut_slice()[start..start + P::SIZE]);
        self.offset += P::SIZE;
    }

    /// Opens an anonymous region. The returned guard derefs to the stream
    /// and emits the region end marker when dropped.
    pub fn region(&mut self) -> Region<'_, 'log, C> {
        if C::regions() {
            self.reserve(4);
            self.put(&ANON_REGION_START.0.to_le_bytes());
        }
        Region { stream: self }
    }

    /// Opens a named region. The token must refer to a registered format;
    /// use [`named_region!`](crate::named_region) to handle registration.
    pub fn region_named(&mut self, token: MessageToken) -> Region<'_, 'log, C> {
        if C::regions() {
            self.reserve(8);
            self.put(&NAMED_REGION_START.0.to_le_bytes());
            self.put(&token.key().0.to_le_bytes());
        }
        Region { stream: self }
    }

    /// Whether messages of `F`'s category pass this log's filter. Constant
    /// after inlining.
    #[inline]
    pub fn message_enabled<F: FormatType>(&self) -> bool {
        C::message(F::CATEGORY)
    }

    /// Whether region framing passes this log's filter.
    #[inline]
    pub fn regions_enabled(&self) -> bool {
        C::regions()
    }

    /// Whether source-location messages pass this log's filter.
    #[inline]
    pub fn source_enabled(&self) -> bool {
        C::source()
    }

    #[doc(hidden)]
    pub fn registry(&self) -> &FormatRegistry {
        &self.shared.registry
    }

    /// Makes room for `needed` bytes, flushing first if the front buffer
    /// would overflow.
    fn reserve(&mut self, needed: usize) {
        assert!(
            needed <= self.capacity,
            "message of {needed} bytes exceeds the stream buffer capacity {}",
            self.capacity
        );
        if self.offset + needed > self.capacity {
            self.flush();
        }
    }

    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        self.front.as_mut_slice()[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
    }

    /// Swaps the double buffer and queues the filled half. Blocks until the
    /// consolidator has drained the previously queued buffer.
    fn flush(&mut self) {
        let fresh = self
            .recycle_rx
            .recv()
            .expect("consolidator dropped the recycle channel");

        let full = std::mem::replace(&mut self.front, fresh);
        let used = std::mem::take(&mut self.offset);

        {
            let mut pending = self.shared.pending.lock();
            pending.blocks.push(FlushBlock {
                stream_index: self.index,
                used,
                buffer: full,
                recycle: self.recycle_tx.clone(),
            });
            pending.notified = true;
        }
        self.shared.pending_cv.notify_one();
    }
}

impl<C: CategoryFilter> Drop for Stream<'_, C> {
    fn drop(&mut self) {
        if self.offset > 0 {
            self.flush();
        }
    }
}

/// Scoped region guard. Emits the end marker on drop; movable, so a region
/// can be returned or stored to transfer the close obligation.
pub struct Region<'r, 'log, C: CategoryFilter> {
    stream: &'r mut Stream<'log, C>,
}

impl<'log, C: CategoryFilter> Deref for Region<'_, 'log, C> {
    type Target = Stream<'log, C>;

    fn deref(&self) -> &Self::Target {
        self.stream
    }
}

impl<C: CategoryFilter> DerefMut for Region<'_, '_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stream
    }
}

impl<C: CategoryFilter> Region<'_, '_, C> {
    /// Closes the region now instead of at end of scope.
    pub fn end(self) {}
}

impl<C: CategoryFilter> Drop for Region<'_, '_, C> {
    fn drop(&mut self) {
        if C::regions() {
            self.stream.reserve(4);
            self.stream.put(&REGION_END.0.to_le_bytes());
        }
    }
}

/// Emits a typed message: `message!(stream, FormatType, arg0, arg1, ...)`.
///
/// The argument count is checked against the format string's `{}` count at
/// compile time. Registration happens once per call site and is cached in a
/// process-wide static, so reusing a call site against a second live log
/// skips registration there; register explicitly with
/// [`Log::register_format`](crate::Log::register_format) in that case.
/// Arguments are not evaluated when the category is filtered out.
#[macro_export]
macro_rules! message {
    ($stream:expr, $fmt:ty $(, $arg:expr)* $(,)?) => {{
        const _: () = assert!(
            $crate::count_parameters(<$fmt as $crate::FormatType>::MESSAGE)
                == $crate::message!(@count $($arg),*),
            "argument count does not match the format string"
        );
        if $stream.message_enabled::<$fmt>() {
            let params = ($($arg,)*);
            static TOKEN: std::sync::OnceLock<$crate::MessageToken> = std::sync::OnceLock::new();
            let token = *TOKEN
                .get_or_init(|| $stream.registry().register_for::<$fmt, _>(&params));
            $stream.emit(token, params);
        }
    }};
    (@count) => { 0usize };
    (@count $head:expr $(, $tail:expr)*) => { 1usize + $crate::message!(@count $($tail),*) };
}

/// Opens a named region: `let r = named_region!(stream, FormatType);`.
/// Registers the region's format once per call site. Region formats carry
/// no parameters, so their format string may not contain `{}`.
#[macro_export]
macro_rules! named_region {
    ($stream:expr, $fmt:ty) => {{
        const _: () = assert!(
            $crate::count_parameters(<$fmt as $crate::FormatType>::MESSAGE) == 0,
            "named region formats take no parameters"
        );
        if $stream.regions_enabled() {
            static TOKEN: std::sync::OnceLock<$crate::MessageToken> = std::sync::OnceLock::new();
            let token = *TOKEN.get_or_init(|| $stream.registry().register::<$fmt, ()>());
            $stream.region_named(token)
        } else {
            $stream.region()
        }
    }};
}

/// Emits a source-location message for the current call site, formatted as
/// `file(line,column)` with category 0 and no parameters.
#[macro_export]
macro_rules! source_info {
    ($stream:expr) => {{
        if $stream.source_enabled() {
            const LOCATION: &str = concat!(file!(), "(", line!(), ",", column!(), ")");
            static TOKEN: std::sync::OnceLock<$crate::MessageToken> = std::sync::OnceLock::new();
            let token = *TOKEN
                .get_or_init(|| $stream.registry().register_raw(LOCATION, 0, Vec::new()));
            $stream.emit(token, ());
        }
    }};
}
