//! Configuration management for the packet queue pipeline

use crate::capture::CaptureConfig;
use crate::packet::StreamId;
use crate::pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "packet-queue")]
    pub packet_queue: PacketQueueConfig,
}

/// Packet queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketQueueConfig {
    /// Video frames to keep buffered before trimming engages
    #[serde(default = "default_video_image_count")]
    pub video_image_count: usize,

    /// Stream whose keyframes bound the retained window
    #[serde(default)]
    pub video_stream_id: u32,

    #[serde(default)]
    pub capture: CaptureSection,

    #[serde(default)]
    pub analysis: AnalysisSection,

    #[serde(default)]
    pub writer: WriterSection,

    /// Statistics reporting interval (seconds)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
}

impl Default for PacketQueueConfig {
    fn default() -> Self {
        Self {
            video_image_count: default_video_image_count(),
            video_stream_id: 0,
            capture: CaptureSection::default(),
            analysis: AnalysisSection::default(),
            writer: WriterSection::default(),
            stats_interval_seconds: default_stats_interval(),
        }
    }
}

/// Synthetic capture source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSection {
    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Video frames per GOP
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,

    /// Interleave an audio unit after every video unit
    #[serde(default)]
    pub audio: bool,

    /// Image pool slots (0 = units own their payloads)
    #[serde(default)]
    pub image_pool_size: usize,

    /// Payload size in bytes
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    /// Frames per simulated motion cycle (0 = static scene)
    #[serde(default = "default_motion_cycle")]
    pub motion_cycle: u64,

    /// Stop after this many video frames
    #[serde(default)]
    pub max_frames: Option<u64>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            keyframe_interval: default_keyframe_interval(),
            audio: false,
            image_pool_size: 0,
            frame_size: default_frame_size(),
            motion_cycle: default_motion_cycle(),
            max_frames: None,
        }
    }
}

/// Motion analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSection {
    /// Mean byte difference (0.0-1.0) between frames that counts as motion
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f64,

    /// Idle wait between cursor polls (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            motion_threshold: default_motion_threshold(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Event writer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterSection {
    /// Video frames written after motion stops
    #[serde(default = "default_post_event_frames")]
    pub post_event_frames: u32,
}

impl Default for WriterSection {
    fn default() -> Self {
        Self {
            post_event_frames: default_post_event_frames(),
        }
    }
}

// Default value functions
fn default_video_image_count() -> usize {
    30
}
fn default_stats_interval() -> u64 {
    10
}
fn default_fps() -> u32 {
    10
}
fn default_keyframe_interval() -> u32 {
    10
}
fn default_frame_size() -> usize {
    4096
}
fn default_motion_cycle() -> u64 {
    150
}
fn default_motion_threshold() -> f64 {
    0.05
}
fn default_poll_interval() -> u64 {
    5
}
fn default_post_event_frames() -> u32 {
    20
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cfg = &self.packet_queue;

        // Trim counts one unit past the window, so a budget below 2 would
        // evict on every video frame
        if cfg.video_image_count < 2 {
            return Err(ConfigError::Invalid(format!(
                "video_image_count must be at least 2, got {}",
                cfg.video_image_count
            )));
        }

        if cfg.capture.fps == 0 || cfg.capture.fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "capture: FPS must be between 1 and 120, got {}",
                cfg.capture.fps
            )));
        }

        if cfg.capture.keyframe_interval == 0 {
            return Err(ConfigError::Invalid(
                "capture: keyframe_interval must be > 0".to_string(),
            ));
        }

        // Pooled units stay queued until a trim reaches the next keyframe, so
        // the pool must cover the window plus one GOP or capture stalls
        let pool_floor = cfg.video_image_count + cfg.capture.keyframe_interval as usize;
        if cfg.capture.image_pool_size > 0 && cfg.capture.image_pool_size < pool_floor {
            return Err(ConfigError::Invalid(format!(
                "capture: image_pool_size must be 0 or at least {} (video_image_count + keyframe_interval), got {}",
                pool_floor, cfg.capture.image_pool_size
            )));
        }

        if cfg.capture.frame_size == 0 {
            return Err(ConfigError::Invalid(
                "capture: frame_size must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&cfg.analysis.motion_threshold) {
            return Err(ConfigError::Invalid(format!(
                "analysis: motion_threshold must be between 0.0 and 1.0, got {}",
                cfg.analysis.motion_threshold
            )));
        }

        if cfg.analysis.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "analysis: poll_interval_ms must be > 0".to_string(),
            ));
        }

        if cfg.stats_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "stats_interval_seconds must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl PacketQueueConfig {
    pub fn video_stream(&self) -> StreamId {
        StreamId(self.video_stream_id)
    }

    /// Capture settings for the synthetic camera. Audio goes on the stream
    /// after the video stream.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            video_stream_id: self.video_stream(),
            audio_stream_id: StreamId(self.video_stream_id.wrapping_add(1)),
            fps: self.capture.fps,
            keyframe_interval: self.capture.keyframe_interval,
            audio: self.capture.audio,
            frame_size: self.capture.frame_size,
            motion_cycle: self.capture.motion_cycle,
            max_frames: self.capture.max_frames,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            frame_interval: Duration::from_secs(1) / self.capture.fps.max(1),
            poll_interval: Duration::from_millis(self.analysis.poll_interval_ms),
            post_event_frames: self.writer.post_event_frames,
            stats_interval: Duration::from_secs(self.stats_interval_seconds),
        }
    }
}
