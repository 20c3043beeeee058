//! Fixed pool of reusable frame buffers plus the identity registry that maps
//! producer-delivered raw storage back to its pool buffer.
//!
//! The pool does no recycling itself; returned buffers go straight back to
//! the producer's free queue. What the pool owns is allocation (sized from
//! the capture format) and identity: raw storage is only comparable by
//! address, so the registry is keyed on the allocation address, recorded at
//! allocation time and consulted at delivery time.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::capture::{BufferId, CaptureFormat, FrameBuffer};
use crate::pipeline::PipelineError;

pub struct BufferPool {
    registry: Mutex<HashMap<usize, BufferId>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Bytes needed for one frame: `ceil(width * height * bits_per_pixel / 8)`
    /// plus the trailing pad byte the packed capture layout requires.
    pub fn buffer_size_for(format: &CaptureFormat) -> Result<usize, PipelineError> {
        let bits = u64::from(format.width)
            .checked_mul(u64::from(format.height))
            .and_then(|px| px.checked_mul(u64::from(format.format.bits_per_pixel())))
            .ok_or_else(|| PipelineError::Allocation("frame size overflows".into()))?;
        let bytes = bits
            .div_ceil(8)
            .checked_add(1)
            .ok_or_else(|| PipelineError::Allocation("frame size overflows".into()))?;
        usize::try_from(bytes)
            .map_err(|_| PipelineError::Allocation("frame does not fit in memory".into()))
    }

    /// Allocate exactly `count` fixed-size buffers for `format`, returning
    /// the pool (registry) and the raw storage destined for the producer's
    /// free queue.
    pub fn allocate(
        count: usize,
        format: &CaptureFormat,
    ) -> Result<(Self, Vec<Box<[u8]>>), PipelineError> {
        if count == 0 {
            return Err(PipelineError::Allocation(
                "buffer count must be positive".into(),
            ));
        }
        let buffer_size = Self::buffer_size_for(format)?;

        let mut registry = HashMap::with_capacity(count);
        let mut storages = Vec::with_capacity(count);
        for id in 0..count {
            let storage: Box<[u8]> = vec![0u8; buffer_size].into_boxed_slice();
            registry.insert(storage.as_ptr() as usize, BufferId(id));
            storages.push(storage);
        }
        debug!(count, buffer_size, "allocated frame buffers");

        Ok((
            Self {
                registry: Mutex::new(registry),
                buffer_size,
            },
            storages,
        ))
    }

    /// Map delivered storage back to the pool buffer it was allocated as.
    ///
    /// Unknown storage is an [`PipelineError::UnknownBuffer`]; the storage is
    /// consumed and dropped, since without an identity there is nothing to
    /// recycle it to.
    pub fn resolve(&self, storage: Box<[u8]>) -> Result<FrameBuffer, PipelineError> {
        let id = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(storage.as_ptr() as usize))
            .copied();
        match id {
            Some(id) => Ok(FrameBuffer::new(id, storage)),
            None => Err(PipelineError::UnknownBuffer),
        }
    }

    /// Forget every tracked identity. Buffer contents are untouched; whatever
    /// storage the producer still holds is simply no longer ours.
    pub fn release_all(&self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
