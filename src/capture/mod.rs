//! Producer side of the pipeline: frame types and the contract a capture
//! device (or stand-in) must fulfil to feed the frame source.

pub mod frame;
pub mod synthetic;

pub use frame::{BufferId, FrameBuffer, FrameMetadata, InvalidRotation, PixelFormat, Rotation};
pub use synthetic::SyntheticProducer;

use crate::pipeline::FrameSink;

/// Negotiated capture geometry and format, read once per `start()`.
#[derive(Debug, Clone, Copy)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
    /// Target delivery rate. Affects only how often the producer delivers,
    /// never the pipeline logic.
    pub fps: u32,
}

/// Contract for the frame producer collaborator.
///
/// The producer owns its own free-buffer queue: `arm` seeds it with the
/// pool's raw storage, `recycle` re-enqueues storage once the pipeline is
/// done with it, and each capture cycle fills a free buffer and hands it to
/// the [`FrameSink`]. Delivery may happen from any thread; the sink is
/// non-blocking and O(1).
pub trait FrameProducer: Send + Sync {
    /// Current dimensions, format and rotation. Read once per start.
    fn capture_format(&self) -> CaptureFormat;

    /// Take ownership of the initial free buffers and begin delivering
    /// frames into `sink`.
    fn arm(&self, sink: FrameSink, buffers: Vec<Box<[u8]>>) -> color_eyre::Result<()>;

    /// Re-enqueue previously delivered storage so a future capture can be
    /// written into it.
    fn recycle(&self, storage: Box<[u8]>);

    /// Stop delivering frames. Must be safe to call when not armed.
    fn disarm(&self);
}
