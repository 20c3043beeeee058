//! Consumer capability contract.

use color_eyre::Result;

use crate::capture::FrameMetadata;
use crate::display::OverlaySurface;

/// Per-frame analysis routine installed into a
/// [`FrameSource`](crate::pipeline::FrameSource).
///
/// `process` receives a read-only view of the frame bytes; the slice must
/// not be retained beyond the call, since the backing buffer is recycled to
/// the producer as soon as the call returns. An `Err` counts as a dropped
/// frame and never stops the pipeline.
pub trait FrameProcessor: Send {
    fn process(
        &mut self,
        data: &[u8],
        meta: &FrameMetadata,
        surface: &dyn OverlaySurface,
    ) -> Result<()>;

    /// Invoked exactly once, when this handle is replaced or the source is
    /// released.
    fn shutdown(&mut self) {}
}
