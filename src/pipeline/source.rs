//! Source controller: owns the worker thread's lifecycle and serializes
//! processor swaps against in-flight processing.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::capture::{FrameMetadata, FrameProducer};
use crate::display::OverlaySurface;
use crate::pipeline::worker::{self, PipelineShared, SharedProcessor};
use crate::pipeline::{BufferPool, FrameSink, FrameSlot, PipelineError, PipelineStats, StatsSnapshot};
use crate::processor::FrameProcessor;

/// Buffers in circulation per start. One frame under analysis, one pending
/// in the slot, and two free for the producer to fill; fewer than two free
/// buffers starves a producer that captures ahead of its delivery callback.
pub const DEFAULT_BUFFER_COUNT: usize = 4;

/// Streams frames from a producer to the installed [`FrameProcessor`],
/// always presenting the most recent frame and never queueing a backlog.
///
/// The processor handle outlives individual start/stop cycles and is only
/// discarded by [`release`](FrameSource::release).
pub struct FrameSource {
    producer: Arc<dyn FrameProducer>,
    surface: Arc<dyn OverlaySurface>,
    processor: SharedProcessor,
    stats: Arc<PipelineStats>,
    buffer_count: usize,
    running: Option<Running>,
}

struct Running {
    shared: Arc<PipelineShared>,
    worker: JoinHandle<()>,
}

impl FrameSource {
    pub fn new(producer: Arc<dyn FrameProducer>, surface: Arc<dyn OverlaySurface>) -> Self {
        surface.clear();
        Self {
            producer,
            surface,
            processor: Arc::new(Mutex::new(None)),
            stats: Arc::new(PipelineStats::default()),
            buffer_count: DEFAULT_BUFFER_COUNT,
            running: None,
        }
    }

    /// Override the pool size used at the next `start()`.
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    /// Allocate the pool, spawn the worker and arm the producer.
    ///
    /// Policy: starting a running source is rejected with
    /// [`PipelineError::AlreadyRunning`] rather than treated as a no-op.
    /// On any failure nothing is left running.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.running.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }

        let format = self.producer.capture_format();
        let (pool, storages) = BufferPool::allocate(self.buffer_count, &format)?;
        let metadata = FrameMetadata {
            width: format.width,
            height: format.height,
            rotation: format.rotation,
        };

        let shared = Arc::new(PipelineShared {
            slot: FrameSlot::new(),
            pool,
            producer: Arc::clone(&self.producer),
            stats: Arc::clone(&self.stats),
        });

        let worker = thread::Builder::new().name("frame-worker".into()).spawn({
            let shared = Arc::clone(&shared);
            let processor = Arc::clone(&self.processor);
            let surface = Arc::clone(&self.surface);
            move || worker::run(shared, processor, metadata, surface)
        })?;

        let sink = FrameSink::new(Arc::downgrade(&shared));
        if let Err(err) = self.producer.arm(sink, storages) {
            shared.slot.close();
            if worker.join().is_err() {
                error!("frame worker panicked during aborted start");
            }
            return Err(PipelineError::Producer(err));
        }

        self.running = Some(Running { shared, worker });
        info!(
            width = format.width,
            height = format.height,
            format = ?format.format,
            buffers = self.buffer_count,
            "capture pipeline started"
        );
        Ok(())
    }

    /// Stop delivering and processing frames. Idempotent and restart-safe.
    ///
    /// Closes the slot and blocks until the worker has exited, so two
    /// workers can never overlap across a quick stop/start. An in-flight
    /// consumer call is not interrupted; the worker finishes it, observes
    /// the closed slot and exits.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.producer.disarm();
        running.shared.slot.close();
        if running.worker.join().is_err() {
            error!("frame worker panicked, pipeline stopped anyway");
        }
        running.shared.pool.release_all();
        debug!(stats = ?self.stats.snapshot(), "capture pipeline stopped");
    }

    /// Stop the pipeline and permanently discard the installed processor,
    /// invoking its shutdown hook. The source needs a new processor before
    /// frames are analyzed again. Idempotent.
    pub fn release(&mut self) {
        self.stop();
        let mut guard = self
            .processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.surface.clear();
        if let Some(mut processor) = guard.take() {
            processor.shutdown();
            info!("frame processor released");
        }
    }

    /// Install the consumer capability, shutting down any previous handle
    /// first.
    ///
    /// Runs under the same lock as the worker's call-out: a swap issued
    /// while a frame is being processed waits for that call to return, and
    /// no frame reaches the old handle afterwards.
    pub fn set_processor(&self, processor: Box<dyn FrameProcessor>) {
        let mut guard = self
            .processor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.surface.clear();
        if let Some(mut old) = guard.take() {
            old.shutdown();
            debug!("previous frame processor shut down");
        }
        *guard = Some(processor);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Counter snapshot. Counters accumulate across start/stop cycles.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
