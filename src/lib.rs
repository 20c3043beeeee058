pub mod capture;
pub mod display;
pub mod pipeline;
pub mod processor;

use arc_swap::ArcSwap;
use capture::frame::{PixelFormat, Rotation};
use serde::{Deserialize, Serialize};

pub use capture::{CaptureFormat, FrameBuffer, FrameMetadata, FrameProducer};
pub use display::{NullSurface, OverlaySurface};
pub use pipeline::{FrameSink, FrameSource, PipelineError, StatsSnapshot};
pub use processor::FrameProcessor;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
    pub buffer_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                width: 1280,
                height: 720,
                fps: 30,
                format: PixelFormat::Nv21,
                rotation: Rotation::Deg0,
                buffer_count: pipeline::source::DEFAULT_BUFFER_COUNT,
            },
        }
    }
}
