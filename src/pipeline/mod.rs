//! The frame hand-off core: buffer pool, single-slot mailbox, processing
//! worker and the source controller that owns their lifecycles.

pub mod pool;
pub mod slot;
pub mod source;
pub mod worker;

pub use pool::BufferPool;
pub use slot::FrameSlot;
pub use source::FrameSource;
pub use worker::FrameSink;

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Buffer sizing or count is invalid. Fatal to `start()`.
    #[error("invalid buffer allocation: {0}")]
    Allocation(String),

    /// The source is already running.
    #[error("capture pipeline is already running")]
    AlreadyRunning,

    /// A delivered buffer could not be mapped back to a tracked pool buffer.
    #[error("delivered buffer is not tracked by the pool")]
    UnknownBuffer,

    /// The producer collaborator failed to arm.
    #[error("failed to arm producer: {0}")]
    Producer(color_eyre::Report),

    #[error("failed to spawn frame worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Hot-path counters, kept on their own cache line.
#[derive(Default)]
pub struct PipelineStats {
    counters: CachePadded<Counters>,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    consumer_errors: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn record_published(&self) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("artemis_frames_published").increment(1);
    }

    pub(crate) fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("artemis_frames_dropped").increment(1);
    }

    pub(crate) fn record_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("artemis_frames_processed").increment(1);
    }

    pub(crate) fn record_consumer_error(&self) {
        self.counters.consumer_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("artemis_consumer_errors").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            consumer_errors: self.counters.consumer_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames accepted into the slot.
    pub published: u64,
    /// Frames displaced from the slot unread (or refused after close).
    pub dropped: u64,
    /// Frames the consumer capability completed successfully.
    pub processed: u64,
    /// Frames on which the consumer capability returned an error.
    pub consumer_errors: u64,
}
