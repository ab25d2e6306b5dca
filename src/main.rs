//! Packet queue pipeline CLI

// Use jemalloc for better memory management (optional feature)
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use zm_packetqueue::config::Config;
use zm_packetqueue::{
    ImagePool, LogRecorder, MotionAnalyzer, PacketQueue, Pipeline, SyntheticCamera, UnitReclaimer,
};

#[derive(Parser, Debug)]
#[command(name = "zm-packetqueue")]
#[command(about = "Keyframe-aligned packet queue for surveillance capture")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("Packet queue pipeline starting");

    // Load configuration
    let config = if Path::new(&cli.config).exists() {
        info!(config_path = %cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        warn!(config_path = %cli.config, "Configuration file not found, using defaults");
        Config::default()
    };
    let cfg = &config.packet_queue;

    info!(
        video_image_count = cfg.video_image_count,
        stream = cfg.video_stream_id,
        fps = cfg.capture.fps,
        image_pool_size = cfg.capture.image_pool_size,
        "Configuration loaded"
    );

    let mut queue = PacketQueue::new(cfg.video_image_count, cfg.video_stream());
    let mut camera = SyntheticCamera::new(cfg.capture_config());
    let mut pool = None;

    if cfg.capture.image_pool_size > 0 {
        let image_pool = Arc::new(ImagePool::new(cfg.capture.image_pool_size));
        queue = queue.with_reclaimer(Arc::clone(&image_pool) as Arc<dyn UnitReclaimer>);
        camera = camera.with_pool(Arc::clone(&image_pool));
        pool = Some(image_pool);
    }

    let mut pipeline = Pipeline::new(Arc::new(queue), cfg.pipeline_config());
    if let Some(pool) = &pool {
        pipeline = pipeline.with_reclaimer(Arc::clone(pool) as Arc<dyn UnitReclaimer>);
    }

    let analyzer = MotionAnalyzer::new(cfg.video_stream(), cfg.analysis.motion_threshold);

    info!("Capturing, press Ctrl+C to stop");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let report = pipeline
        .run(camera, analyzer, LogRecorder::new(), shutdown)
        .await?;

    info!(
        captured = report.captured,
        retries = report.capture_retries,
        analyzed = report.analyzed,
        motion_frames = report.motion_frames,
        events = report.events,
        recorded = report.recorded_units,
        recorded_bytes = report.recorded_bytes,
        evicted = report.queue.evicted,
        drained = report.drained,
        "Final stats"
    );

    if let Some(pool) = pool {
        info!(in_use = pool.in_use(), capacity = pool.capacity(), "Image pool");
    }

    Ok(())
}
