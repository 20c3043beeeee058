//! End-to-end pipeline behavior: hand-off, dropping, recycling, restart and
//! processor swaps, driven by a producer the tests control frame by frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::eyre::eyre;
use color_eyre::Result;
use flume::{Receiver, Sender};

use artemis::capture::{CaptureFormat, FrameProducer, PixelFormat, Rotation};
use artemis::display::{NullSurface, OverlaySurface};
use artemis::pipeline::{FrameSink, FrameSource, PipelineError};
use artemis::processor::FrameProcessor;
use artemis::FrameMetadata;

const TIMEOUT: Duration = Duration::from_secs(2);

/// Producer whose deliveries are issued explicitly by the test thread.
/// Frames are stamped with a sequence tag in their first byte so processors
/// can report which frame they saw.
struct ManualProducer {
    format: CaptureFormat,
    free: Mutex<VecDeque<Box<[u8]>>>,
    sink: Mutex<Option<FrameSink>>,
    recycled: AtomicUsize,
    sequence: AtomicUsize,
}

impl ManualProducer {
    fn new() -> Self {
        Self {
            format: CaptureFormat {
                width: 4,
                height: 4,
                format: PixelFormat::Gray8,
                rotation: Rotation::Deg90,
                fps: 30,
            },
            free: Mutex::new(VecDeque::new()),
            sink: Mutex::new(None),
            recycled: AtomicUsize::new(0),
            sequence: AtomicUsize::new(0),
        }
    }

    /// Fill the next free buffer and deliver it. Returns the frame's tag.
    fn deliver_next(&self) -> u8 {
        let mut storage = self
            .free
            .lock()
            .unwrap()
            .pop_front()
            .expect("no free buffer to deliver");
        let tag = (self.sequence.fetch_add(1, Ordering::SeqCst) + 1) as u8;
        storage[0] = tag;
        let sink = self.sink.lock().unwrap();
        sink.as_ref().expect("producer not armed").deliver(storage);
        tag
    }

    /// Deliver storage the pool has never seen.
    fn deliver_foreign(&self, storage: Box<[u8]>) {
        let sink = self.sink.lock().unwrap();
        sink.as_ref().expect("producer not armed").deliver(storage);
    }

    fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    fn free_len(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

impl FrameProducer for ManualProducer {
    fn capture_format(&self) -> CaptureFormat {
        self.format
    }

    fn arm(&self, sink: FrameSink, buffers: Vec<Box<[u8]>>) -> Result<()> {
        let mut free = self.free.lock().unwrap();
        free.clear(); // stale storage from a previous run is dead
        free.extend(buffers);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn recycle(&self, storage: Box<[u8]>) {
        self.free.lock().unwrap().push_back(storage);
        self.recycled.fetch_add(1, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.sink.lock().unwrap().take();
    }
}

/// Blocks inside `process` until the test releases it, reporting the tag of
/// each frame it starts on.
struct GateProcessor {
    started_tx: Sender<u8>,
    gate_rx: Receiver<()>,
    shutdowns: Arc<AtomicUsize>,
}

impl FrameProcessor for GateProcessor {
    fn process(
        &mut self,
        data: &[u8],
        _meta: &FrameMetadata,
        _surface: &dyn OverlaySurface,
    ) -> Result<()> {
        self.started_tx.send(data[0]).unwrap();
        self.gate_rx.recv().ok();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Completes immediately, reporting the tag of each processed frame.
struct RecordingProcessor {
    processed_tx: Sender<u8>,
    shutdowns: Arc<AtomicUsize>,
}

impl FrameProcessor for RecordingProcessor {
    fn process(
        &mut self,
        data: &[u8],
        _meta: &FrameMetadata,
        _surface: &dyn OverlaySurface,
    ) -> Result<()> {
        self.processed_tx.send(data[0]).unwrap();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails on the first frame, succeeds afterwards.
struct FailOnceProcessor {
    seen_tx: Sender<(u8, bool)>,
    failed: bool,
}

impl FrameProcessor for FailOnceProcessor {
    fn process(
        &mut self,
        data: &[u8],
        _meta: &FrameMetadata,
        _surface: &dyn OverlaySurface,
    ) -> Result<()> {
        if !self.failed {
            self.failed = true;
            self.seen_tx.send((data[0], false)).unwrap();
            return Err(eyre!("detector exploded"));
        }
        self.seen_tx.send((data[0], true)).unwrap();
        Ok(())
    }
}

fn wait_until(mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn latest_frame_wins_while_processor_is_busy() {
    let producer = Arc::new(ManualProducer::new());
    let (started_tx, started_rx) = flume::unbounded();
    let (gate_tx, gate_rx) = flume::unbounded();
    let shutdowns = Arc::new(AtomicUsize::new(0));

    let mut source = FrameSource::new(producer.clone(), Arc::new(NullSurface));
    source.set_processor(Box::new(GateProcessor {
        started_tx,
        gate_rx,
        shutdowns,
    }));
    source.start().unwrap();

    let first = producer.deliver_next();
    assert_eq!(started_rx.recv_timeout(TIMEOUT).unwrap(), first);

    // The worker is blocked inside the processor. Three more frames arrive;
    // each publish displaces and recycles the previous unread one before it
    // returns, so exactly two recycles have happened by now.
    let _second = producer.deliver_next();
    let _third = producer.deliver_next();
    let fourth = producer.deliver_next();
    assert_eq!(producer.recycled(), 2);

    // Unblock the first frame: the next frame presented is the newest one,
    // the interior frames were never seen.
    gate_tx.send(()).unwrap();
    assert_eq!(started_rx.recv_timeout(TIMEOUT).unwrap(), fourth);
    gate_tx.send(()).unwrap();

    assert!(wait_until(|| producer.free_len() == 4));
    source.stop();

    let stats = source.stats();
    assert_eq!(stats.published, 4);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.processed, 2);
}

#[test]
fn consumer_error_drops_the_frame_and_keeps_the_worker_alive() {
    let producer = Arc::new(ManualProducer::new());
    let (seen_tx, seen_rx) = flume::unbounded();

    let mut source = FrameSource::new(producer.clone(), Arc::new(NullSurface));
    source.set_processor(Box::new(FailOnceProcessor {
        seen_tx,
        failed: false,
    }));
    source.start().unwrap();

    let first = producer.deliver_next();
    assert_eq!(seen_rx.recv_timeout(TIMEOUT).unwrap(), (first, false));

    // The failed frame still goes back to the producer.
    assert!(wait_until(|| producer.free_len() == 4));

    let second = producer.deliver_next();
    assert_eq!(seen_rx.recv_timeout(TIMEOUT).unwrap(), (second, true));

    source.stop();
    let stats = source.stats();
    assert_eq!(stats.consumer_errors, 1);
    assert_eq!(stats.processed, 1);
}

#[test]
fn restart_rebuilds_the_pool_and_keeps_processing() {
    let producer = Arc::new(ManualProducer::new());
    let (processed_tx, processed_rx) = flume::unbounded();
    let shutdowns = Arc::new(AtomicUsize::new(0));

    let mut source = FrameSource::new(producer.clone(), Arc::new(NullSurface));
    source.set_processor(Box::new(RecordingProcessor {
        processed_tx,
        shutdowns: shutdowns.clone(),
    }));

    source.start().unwrap();
    producer.deliver_next();
    processed_rx.recv_timeout(TIMEOUT).unwrap();
    source.stop();
    assert!(!source.is_running());

    source.start().unwrap();
    assert!(source.is_running());
    assert_eq!(producer.free_len(), 4); // fresh buffers, stale ones discarded
    producer.deliver_next();
    processed_rx.recv_timeout(TIMEOUT).unwrap();
    source.stop();

    assert_eq!(source.stats().processed, 2);
    // stop() never touches the processor handle.
    assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
}

#[test]
fn start_while_running_is_rejected() {
    let producer = Arc::new(ManualProducer::new());
    let mut source = FrameSource::new(producer, Arc::new(NullSurface));
    source.start().unwrap();
    assert!(matches!(source.start(), Err(PipelineError::AlreadyRunning)));
    source.stop();
    source.start().unwrap();
    source.stop();
}

#[test]
fn processor_swap_waits_for_the_inflight_call() {
    let producer = Arc::new(ManualProducer::new());
    let (started_tx, started_rx) = flume::unbounded();
    let (gate_tx, gate_rx) = flume::unbounded();
    let old_shutdowns = Arc::new(AtomicUsize::new(0));
    let new_shutdowns = Arc::new(AtomicUsize::new(0));
    let (processed_tx, processed_rx) = flume::unbounded();

    let mut source = FrameSource::new(producer.clone(), Arc::new(NullSurface));
    source.set_processor(Box::new(GateProcessor {
        started_tx,
        gate_rx,
        shutdowns: old_shutdowns.clone(),
    }));
    source.start().unwrap();

    let first = producer.deliver_next();
    assert_eq!(started_rx.recv_timeout(TIMEOUT).unwrap(), first);

    thread::scope(|s| {
        let swap = s.spawn(|| {
            source.set_processor(Box::new(RecordingProcessor {
                processed_tx: processed_tx.clone(),
                shutdowns: new_shutdowns.clone(),
            }));
        });

        // The swap must not shut the old handle down while its call is
        // still in flight.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(old_shutdowns.load(Ordering::SeqCst), 0);

        gate_tx.send(()).unwrap();
        swap.join().unwrap();
    });
    assert_eq!(old_shutdowns.load(Ordering::SeqCst), 1);

    // Frames now reach the new handle only.
    let second = producer.deliver_next();
    assert_eq!(processed_rx.recv_timeout(TIMEOUT).unwrap(), second);
    assert!(started_rx.try_recv().is_err());

    source.release();
    assert_eq!(new_shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(old_shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn release_is_idempotent_and_shuts_the_processor_down_once() {
    let producer = Arc::new(ManualProducer::new());
    let (processed_tx, _processed_rx) = flume::unbounded();
    let shutdowns = Arc::new(AtomicUsize::new(0));

    let mut source = FrameSource::new(producer, Arc::new(NullSurface));
    source.set_processor(Box::new(RecordingProcessor {
        processed_tx,
        shutdowns: shutdowns.clone(),
    }));
    source.start().unwrap();

    source.stop();
    source.stop();
    source.release();
    source.release();
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn frames_without_a_processor_are_recycled_unprocessed() {
    let producer = Arc::new(ManualProducer::new());
    let mut source = FrameSource::new(producer.clone(), Arc::new(NullSurface));
    source.start().unwrap();

    producer.deliver_next();
    assert!(wait_until(|| producer.free_len() == 4));

    source.stop();
    let stats = source.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.processed, 0);
}

#[test]
fn unknown_storage_is_skipped_without_recycling() {
    let producer = Arc::new(ManualProducer::new());
    let (processed_tx, processed_rx) = flume::unbounded();
    let shutdowns = Arc::new(AtomicUsize::new(0));

    let mut source = FrameSource::new(producer.clone(), Arc::new(NullSurface));
    source.set_processor(Box::new(RecordingProcessor {
        processed_tx,
        shutdowns,
    }));
    source.start().unwrap();

    producer.deliver_foreign(vec![0u8; 17].into_boxed_slice());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(source.stats().published, 0);
    assert_eq!(producer.recycled(), 0);

    // The pipeline still works afterwards.
    let tag = producer.deliver_next();
    assert_eq!(processed_rx.recv_timeout(TIMEOUT).unwrap(), tag);
    source.stop();
}
