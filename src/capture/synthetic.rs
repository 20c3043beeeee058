//! Synthetic fixed-rate frame producer for the demo binary and tests.
//!
//! Stands in for a real capture device: a delivery thread ticks at the
//! configured rate, pulls a buffer from its free queue, writes a moving test
//! pattern into it and hands it to the pipeline. When no free buffer is
//! available the capture cycle is simply lost, the same way hardware drops a
//! frame when its callback buffers are exhausted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use color_eyre::eyre::eyre;
use flume::{Receiver, Sender};
use tracing::{debug, error, trace};

use crate::capture::{CaptureFormat, FrameProducer};
use crate::pipeline::FrameSink;
use crate::CaptureConfig;

pub struct SyntheticProducer {
    format: CaptureFormat,
    free_tx: Sender<Box<[u8]>>,
    free_rx: Receiver<Box<[u8]>>,
    delivery: Mutex<Option<DeliveryWorker>>,
}

struct DeliveryWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SyntheticProducer {
    pub fn new(config: &CaptureConfig) -> Self {
        let (free_tx, free_rx) = flume::unbounded();
        Self {
            format: CaptureFormat {
                width: config.width,
                height: config.height,
                format: config.format,
                rotation: config.rotation,
                fps: config.fps,
            },
            free_tx,
            free_rx,
            delivery: Mutex::new(None),
        }
    }

    /// Free buffers currently queued for capture.
    pub fn free_buffers(&self) -> usize {
        self.free_rx.len()
    }
}

impl FrameProducer for SyntheticProducer {
    fn capture_format(&self) -> CaptureFormat {
        self.format
    }

    fn arm(&self, sink: FrameSink, buffers: Vec<Box<[u8]>>) -> color_eyre::Result<()> {
        let mut delivery = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if delivery.is_some() {
            return Err(eyre!("producer is already armed"));
        }

        // Buffers left over from a previous run belong to a pool that no
        // longer exists; they must not leak into the new one.
        while self.free_rx.try_recv().is_ok() {}
        let count = buffers.len();
        for storage in buffers {
            self.free_tx
                .send(storage)
                .map_err(|_| eyre!("free-buffer queue closed"))?;
        }
        debug!(count, fps = self.format.fps, "synthetic producer armed");

        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.format.fps.max(1)));
        let handle = thread::Builder::new().name("synthetic-capture".into()).spawn({
            let stop = Arc::clone(&stop);
            let free_rx = self.free_rx.clone();
            let mut sequence: u64 = 0;
            move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    // No free buffer means this capture cycle is lost.
                    let Ok(mut storage) = free_rx.try_recv() else {
                        trace!("no free buffer, capture cycle skipped");
                        continue;
                    };
                    fill_pattern(&mut storage, sequence);
                    sequence = sequence.wrapping_add(1);
                    sink.deliver(storage);
                }
            }
        })?;

        *delivery = Some(DeliveryWorker { stop, handle });
        Ok(())
    }

    fn recycle(&self, storage: Box<[u8]>) {
        // The queue outlives every lease, so this send cannot fail while the
        // producer itself is alive.
        let _ = self.free_tx.send(storage);
    }

    fn disarm(&self) {
        let worker = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };
        worker.stop.store(true, Ordering::Relaxed);
        if worker.handle.join().is_err() {
            error!("synthetic capture thread panicked");
        }
        debug!("synthetic producer disarmed");
    }
}

/// Moving gradient, enough to tell consecutive frames apart downstream.
fn fill_pattern(storage: &mut [u8], sequence: u64) {
    let shift = (sequence & 0xff) as u8;
    for (i, byte) in storage.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_add(shift);
    }
}
