//! The write-side pipeline.
//!
//! Producers fill per-stream front buffers; a single consolidator thread
//! packs flushed back buffers into a global double buffer as length-prefixed
//! blocks; a single writer thread drains the global back buffer to disk.
//!
//! Synchronization is expressed through ownership: a stream's back buffer
//! travels inside its queued [`FlushBlock`] and comes back through a
//! capacity-1 recycle channel whose single credit provides the per-stream
//! back-pressure, and the two global buffers ping-pong between the
//! consolidator and the writer over a pair of capacity-1 channels. The
//! writer can therefore never observe a buffer the consolidator still owns,
//! and vice versa.

use std::fs::File;
use std::io::Write;
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::buffer::AlignedBuf;
use crate::category::{CategoryFilter, LogEverything};
use crate::error::{Error, Result};
use crate::format::{FormatType, ParameterPack};
use crate::registry::{FormatRegistry, MessageToken};
use crate::stream::Stream;
use crate::wire::{self, BLOCK_HEADER_SIZE};

/// One drained stream back buffer, queued for consolidation.
pub(crate) struct FlushBlock {
    pub stream_index: u64,
    pub used: usize,
    pub buffer: AlignedBuf,
    /// Hands the buffer back to the owning stream once packed.
    pub recycle: SyncSender<AlignedBuf>,
}

#[derive(Default)]
pub(crate) struct PendingQueue {
    pub blocks: Vec<FlushBlock>,
    pub notified: bool,
    pub stop: bool,
}

/// State shared between the log handle, its streams and the consolidator.
pub(crate) struct LogShared {
    pub registry: FormatRegistry,
    pub pending: Mutex<PendingQueue>,
    pub pending_cv: Condvar,
    /// Next global ordering index, if ordering is enabled.
    pub message_index: AtomicU64,
    pub ordering: bool,
    pub global_capacity: usize,
    /// Number of streams created so far; becomes the sidecar stream count.
    pub stream_count: AtomicU64,
}

/// A binary log file under construction.
///
/// Dropping the log stops the pipeline, drains every buffered byte to disk
/// and serializes the format sidecar next to the log file. Streams borrow
/// the log, so they always drop (and flush) first.
pub struct Log<C: CategoryFilter = LogEverything> {
    shared: Arc<LogShared>,
    path: PathBuf,
    consolidator: Option<JoinHandle<(AlignedBuf, usize)>>,
    writer: Option<JoinHandle<File>>,
    _filter: PhantomData<C>,
}

impl<C: CategoryFilter> Log<C> {
    /// Opens `path` for writing and starts the consolidator and writer
    /// threads. `global_buffer_bytes` sizes each half of the global double
    /// buffer and must hold at least one block header.
    pub fn new(path: impl Into<PathBuf>, global_buffer_bytes: usize, ordering: bool) -> Result<Self> {
        assert!(
            global_buffer_bytes >= BLOCK_HEADER_SIZE,
            "global buffer must hold at least a block header"
        );

        let path = path.into();
        let file = File::create(&path).map_err(|source| Error::IoOpen {
            path: path.clone(),
            source,
        })?;

        let shared = Arc::new(LogShared {
            registry: FormatRegistry::new(),
            pending: Mutex::new(PendingQueue::default()),
            pending_cv: Condvar::new(),
            message_index: AtomicU64::new(0),
            ordering,
            global_capacity: global_buffer_bytes,
            stream_count: AtomicU64::new(0),
        });

        let front = AlignedBuf::new(global_buffer_bytes);
        let back = AlignedBuf::new(global_buffer_bytes);

        // signal: consolidator -> writer, full buffers. done: writer ->
        // consolidator, drained buffers; primed with the second buffer so
        // the first swap does not block.
        let (signal_tx, signal_rx) = sync_channel::<(AlignedBuf, usize)>(1);
        let (done_tx, done_rx) = sync_channel::<AlignedBuf>(1);
        done_tx.send(back).expect("priming the writer handshake");

        let writer = thread::spawn(move || write_loop(file, signal_rx, done_tx));

        let consolidator_shared = Arc::clone(&shared);
        let consolidator =
            thread::spawn(move || consolidate_loop(consolidator_shared, front, signal_tx, done_rx));

        Ok(Self {
            shared,
            path,
            consolidator: Some(consolidator),
            writer: Some(writer),
            _filter: PhantomData,
        })
    }

    /// Creates a new producer stream with its own double buffer. The stream
    /// buffer may not be larger than the global buffer.
    pub fn create_stream(&self, buffer_bytes: usize) -> Stream<'_, C> {
        assert!(
            buffer_bytes > 0 && buffer_bytes <= self.shared.global_capacity,
            "stream buffer must be non-empty and no larger than the global buffer"
        );
        let index = self.shared.stream_count.fetch_add(1, Ordering::Relaxed);
        Stream::new(&self.shared, index, buffer_bytes)
    }

    /// Registers a format with this log and returns the token the emit path
    /// uses. Idempotent per resulting key.
    pub fn register_format<F: FormatType, P: ParameterPack>(&self) -> MessageToken {
        self.shared.registry.register::<F, P>()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ordering(&self) -> bool {
        self.shared.ordering
    }
}

impl<C: CategoryFilter> Drop for Log<C> {
    fn drop(&mut self) {
        // Stop the consolidator; it drains the pending queue once more
        // before exiting and returns the unswapped global front buffer.
        {
            let mut pending = self.shared.pending.lock();
            pending.stop = true;
        }
        self.shared.pending_cv.notify_one();
        let consolidated = self.consolidator.take().and_then(|h| h.join().ok());

        // The writer exits once the consolidator's channel disconnects,
        // after writing anything still in flight.
        let file = self.writer.take().and_then(|h| h.join().ok());
        let Some(mut file) = file else {
            tracing::error!("log writer thread lost; dropping buffered data");
            return;
        };

        // Remaining data reaches disk in production order: the partially
        // packed global front first, then stream blocks that were queued
        // but never consolidated.
        if let Some((front, offset)) = consolidated {
            if offset > 0 {
                if let Err(error) = file.write_all(&front.as_slice()[..offset]) {
                    tracing::error!(%error, "failed to drain global buffer at shutdown");
                }
            }
        }

        let blocks = mem::take(&mut self.shared.pending.lock().blocks);
        for block in blocks {
            if block.used == 0 {
                continue;
            }
            let result = file
                .write_all(&block.stream_index.to_le_bytes())
                .and_then(|_| file.write_all(&(block.used as u64).to_le_bytes()))
                .and_then(|_| file.write_all(&block.buffer.as_slice()[..block.used]));
            if let Err(error) = result {
                tracing::error!(%error, "failed to drain stream block at shutdown");
            }
        }
        drop(file);

        let snapshot = self.shared.registry.snapshot();
        if let Err(error) = wire::write_format_file(
            &self.path,
            self.shared.stream_count.load(Ordering::Relaxed),
            self.shared.ordering,
            &snapshot,
        ) {
            tracing::error!(%error, "failed to write format sidecar");
        }
    }
}

/// Consolidator body: drain the pending queue, pack blocks into the global
/// front buffer, swap with the writer whenever it fills. Returns the front
/// buffer and its fill level for the shutdown drain.
fn consolidate_loop(
    shared: Arc<LogShared>,
    mut front: AlignedBuf,
    signal: SyncSender<(AlignedBuf, usize)>,
    done: Receiver<AlignedBuf>,
) -> (AlignedBuf, usize) {
    let capacity = front.len();
    let mut offset = 0usize;

    loop {
        let (blocks, stop) = {
            let mut pending = shared.pending.lock();
            while !pending.notified && !pending.stop {
                shared.pending_cv.wait(&mut pending);
            }
            pending.notified = false;
            (mem::take(&mut pending.blocks), pending.stop)
        };

        for block in blocks {
            // Block header. It never straddles a swap.
            if offset + BLOCK_HEADER_SIZE > capacity {
                swap_global(&mut front, &mut offset, &signal, &done);
            }
            let dst = front.as_mut_slice();
            dst[offset..offset + 8].copy_from_slice(&block.stream_index.to_le_bytes());
            dst[offset + 8..offset + 16].copy_from_slice(&(block.used as u64).to_le_bytes());
            offset += BLOCK_HEADER_SIZE;
            if offset == capacity {
                swap_global(&mut front, &mut offset, &signal, &done);
            }

            // Payload, chunked across as many swaps as needed.
            let mut copied = 0;
            while copied < block.used {
                let n = (block.used - copied).min(capacity - offset);
                front.as_mut_slice()[offset..offset + n]
                    .copy_from_slice(&block.buffer.as_slice()[copied..copied + n]);
                offset += n;
                copied += n;
                if offset == capacity {
                    swap_global(&mut front, &mut offset, &signal, &done);
                }
            }

            // Return the buffer so the stream can flush again.
            let _ = block.recycle.send(block.buffer);
        }

        if stop {
            break;
        }
    }

    (front, offset)
}

/// Swaps the global buffers: wait for the writer to hand back a drained
/// buffer, ship the full one.
fn swap_global(
    front: &mut AlignedBuf,
    offset: &mut usize,
    signal: &SyncSender<(AlignedBuf, usize)>,
    done: &Receiver<AlignedBuf>,
) {
    let fresh = done.recv().expect("writer thread exited early");
    let full = mem::replace(front, fresh);
    let used = mem::take(offset);
    let _ = signal.send((full, used));
}

/// Writer body: drain full global buffers to the file. A failed write puts
/// the writer into a degraded state that keeps consuming (so producers are
/// never blocked) but drops the data.
fn write_loop(
    mut file: File,
    signal: Receiver<(AlignedBuf, usize)>,
    done: SyncSender<AlignedBuf>,
) -> File {
    let mut degraded = false;
    while let Ok((buffer, used)) = signal.recv() {
        if !degraded {
            if let Err(error) = file.write_all(&buffer.as_slice()[..used]) {
                tracing::error!(%error, "log write failed; dropping subsequent blocks");
                degraded = true;
            }
        }
        let _ = done.send(buffer);
    }
    file
}
