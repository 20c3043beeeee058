//! Display-surface seam. Overlay rendering itself lives with the consumer;
//! the pipeline only threads an opaque shared handle through to it and
//! clears it on processor swaps.

/// Shared display surface the processor draws its results onto.
pub trait OverlaySurface: Send + Sync {
    /// Remove anything drawn for the previous processor.
    fn clear(&self);
}

/// Surface for headless operation.
pub struct NullSurface;

impl OverlaySurface for NullSurface {
    fn clear(&self) {}
}
