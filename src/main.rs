//! Artemis frame pipeline demo: synthetic capture source feeding a slow
//! analysis processor, with a restart cycle to exercise teardown.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use artemis::capture::SyntheticProducer;
use artemis::display::NullSurface;
use artemis::pipeline::FrameSource;
use artemis::processor::FrameProcessor;
use artemis::{FrameMetadata, FrameProducer, OverlaySurface};
use color_eyre::Result;
use tracing::info;

/// Demo processor: averages the luma plane and deliberately runs slower than
/// the capture rate, so latest-frame-wins dropping is visible in the totals.
struct LumaLogger {
    frames: u64,
}

impl FrameProcessor for LumaLogger {
    fn process(
        &mut self,
        data: &[u8],
        meta: &FrameMetadata,
        _surface: &dyn OverlaySurface,
    ) -> Result<()> {
        self.frames += 1;
        let luma_len = (meta.width as usize * meta.height as usize).min(data.len());
        let luma = &data[..luma_len];
        let avg = luma.iter().map(|&b| u64::from(b)).sum::<u64>() / luma_len.max(1) as u64;
        info!(
            frame = self.frames,
            avg_luma = avg,
            rotation = meta.rotation.degrees(),
            "processed frame"
        );
        thread::sleep(Duration::from_millis(40));
        Ok(())
    }

    fn shutdown(&mut self) {
        info!(total = self.frames, "processor shut down");
    }
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("artemis=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Artemis launching...");

    let config = load_config()?;
    artemis::CONFIG.store(Arc::new(config.clone()));

    let producer = Arc::new(SyntheticProducer::new(&config.capture));
    let format = producer.capture_format();
    info!(
        width = format.width,
        height = format.height,
        fps = format.fps,
        "using synthetic capture source"
    );

    let mut source = FrameSource::new(producer, Arc::new(NullSurface))
        .with_buffer_count(config.capture.buffer_count);
    source.set_processor(Box::new(LumaLogger { frames: 0 }));

    source.start()?;
    thread::sleep(Duration::from_secs(2));

    // Stop and restart once; the pool and slot are rebuilt from scratch.
    source.stop();
    source.start()?;
    thread::sleep(Duration::from_secs(1));

    let stats = source.stats();
    info!(
        published = stats.published,
        dropped = stats.dropped,
        processed = stats.processed,
        consumer_errors = stats.consumer_errors,
        "pipeline totals"
    );

    source.release();
    info!("Artemis shutting down");
    Ok(())
}

/// Load `artemis.toml` from the working directory if present, otherwise fall
/// back to defaults.
fn load_config() -> Result<artemis::Config> {
    let raw = config::Config::builder()
        .add_source(config::File::with_name("artemis").required(false))
        .build()?;
    Ok(raw.try_deserialize().unwrap_or_default())
}
