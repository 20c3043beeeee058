use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv21,
    Yv12,
    Gray8,
}

impl PixelFormat {
    /// Bits of storage one pixel occupies in the packed capture layout.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Nv21 | PixelFormat::Yv12 => 12,
            PixelFormat::Gray8 => 8,
        }
    }
}

/// Capture rotation, clockwise. Only the four right angles are valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

#[derive(Debug, Error)]
#[error("rotation must be one of 0/90/180/270, got {0}")]
pub struct InvalidRotation(pub u32);

impl TryFrom<u32> for Rotation {
    type Error = InvalidRotation;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(InvalidRotation(other)),
        }
    }
}

/// Frame metadata, built once per presented frame and valid only for the
/// duration of that frame's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

/// Identity of a pool buffer. Buffers are told apart by id, never by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A leased pool buffer in flight through the pipeline.
///
/// Deliberately not `Clone`: at any time a buffer lives in exactly one place
/// (producer free queue, slot, worker, or return transit) and moves between
/// them by ownership transfer.
pub struct FrameBuffer {
    id: BufferId,
    data: Box<[u8]>,
}

impl FrameBuffer {
    pub(crate) fn new(id: BufferId, data: Box<[u8]>) -> Self {
        Self { id, data }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Unwrap back into the raw storage the producer deals in.
    pub(crate) fn into_storage(self) -> Box<[u8]> {
        self.data
    }
}
