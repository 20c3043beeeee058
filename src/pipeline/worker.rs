//! Delivery entry point and the frame processing loop.
//!
//! Two execution contexts touch the running pipeline: the producer's
//! delivery context, which only ever calls [`FrameSink::deliver`]
//! (non-blocking, O(1)), and the dedicated worker thread, which blocks only
//! while waiting for the next frame. The consumer call-out is the single
//! admitted long-latency point and runs with no slot lock held, so the
//! producer can keep publishing, and overwriting, while analysis is busy.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, error, trace, warn};

use crate::capture::{FrameMetadata, FrameProducer};
use crate::display::OverlaySurface;
use crate::pipeline::{BufferPool, FrameSlot, PipelineError, PipelineStats};
use crate::processor::FrameProcessor;

/// The installed consumer capability, shared between the worker's call-out
/// and processor swaps. Mutual exclusion between those two is the one
/// cross-cutting invariant of the pipeline.
pub(crate) type SharedProcessor = Arc<Mutex<Option<Box<dyn FrameProcessor>>>>;

/// State shared by the delivery path and the worker for one start/stop cycle.
pub(crate) struct PipelineShared {
    pub(crate) slot: FrameSlot,
    pub(crate) pool: BufferPool,
    pub(crate) producer: Arc<dyn FrameProducer>,
    pub(crate) stats: Arc<PipelineStats>,
}

impl PipelineShared {
    fn deliver(&self, storage: Box<[u8]>) {
        let frame = match self.pool.resolve(storage) {
            Ok(frame) => frame,
            Err(PipelineError::UnknownBuffer) => {
                warn!("skipping frame: delivered buffer is not tracked by the pool");
                return;
            }
            Err(err) => {
                warn!("skipping frame: {err}");
                return;
            }
        };
        self.stats.record_published();
        // Lock ordering: the slot lock is taken and released inside publish,
        // before recycle calls back into the producer.
        if let Some(displaced) = self.slot.publish(frame) {
            self.stats.record_dropped();
            self.producer.recycle(displaced.into_storage());
        }
    }
}

/// Clonable handle the producer delivers frames through.
///
/// Holds the pipeline weakly: deliveries racing past a `stop()` resolve to a
/// dead handle and the storage is dropped instead of touching torn-down
/// state.
#[derive(Clone)]
pub struct FrameSink {
    shared: Weak<PipelineShared>,
}

impl FrameSink {
    pub(crate) fn new(shared: Weak<PipelineShared>) -> Self {
        Self { shared }
    }

    /// Hand a filled buffer to the pipeline. Never blocks; safe to call from
    /// a latency-sensitive delivery context.
    pub fn deliver(&self, storage: Box<[u8]>) {
        match self.shared.upgrade() {
            Some(shared) => shared.deliver(storage),
            None => trace!("frame delivered after pipeline teardown, dropping"),
        }
    }
}

/// Body of the `frame-worker` thread.
///
/// Waits on the slot, extracts the frame under the slot's own lock only,
/// then invokes the consumer under the processor lock. A consumer error is a
/// dropped frame, never a dead worker. The buffer goes back to the producer
/// whatever happened.
pub(crate) fn run(
    shared: Arc<PipelineShared>,
    processor: SharedProcessor,
    metadata: FrameMetadata,
    surface: Arc<dyn OverlaySurface>,
) {
    debug!("frame worker started");
    loop {
        let Some(frame) = shared.slot.take_or_wait() else {
            debug!("frame slot closed, worker exiting");
            return;
        };

        {
            let mut guard = processor.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(processor) => {
                    match processor.process(frame.data(), &metadata, surface.as_ref()) {
                        Ok(()) => shared.stats.record_processed(),
                        Err(err) => {
                            shared.stats.record_consumer_error();
                            error!("frame processor failed: {err:#}");
                        }
                    }
                }
                None => trace!("no frame processor installed, dropping frame"),
            }
        }

        shared.producer.recycle(frame.into_storage());
    }
}
