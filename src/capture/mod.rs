//! Capture sources feeding the packet queue

mod pool;

pub use pool::ImagePool;

use crate::packet::{MediaUnit, Ownership, StreamId};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// RTP-style 90kHz video clock
pub const VIDEO_CLOCK_RATE: i64 = 90_000;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture source not primed")]
    NotPrimed,

    #[error("capture source exhausted after {0} frames")]
    Exhausted(u64),

    #[error("invalid capture configuration: {0}")]
    InvalidConfig(String),
}

/// Result of one capture attempt
#[derive(Debug)]
pub enum CaptureOutcome {
    Captured(MediaUnit),

    /// Transient failure; the caller should try again
    Retry,
}

/// Produces media units at its own pace
pub trait CaptureSource: Send {
    /// Prepares the source before the first capture
    fn prime(&mut self) -> Result<(), CaptureError>;

    /// Captures the next unit
    fn capture(&mut self) -> Result<CaptureOutcome, CaptureError>;
}

/// Synthetic camera configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub video_stream_id: StreamId,
    pub audio_stream_id: StreamId,
    pub fps: u32,
    /// Video units per GOP; the first of each is a keyframe
    pub keyframe_interval: u32,
    /// Interleave one audio unit after each video unit
    pub audio: bool,
    pub frame_size: usize,
    /// Frames per motion cycle; the last third of each cycle changes
    /// between frames. 0 keeps the scene static.
    pub motion_cycle: u64,
    pub max_frames: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video_stream_id: StreamId(0),
            audio_stream_id: StreamId(1),
            fps: 10,
            keyframe_interval: 10,
            audio: false,
            frame_size: 4096,
            motion_cycle: 150,
            max_frames: None,
        }
    }
}

/// Deterministic camera producing GOP-patterned video and optional audio
pub struct SyntheticCamera {
    config: CaptureConfig,
    pool: Option<Arc<ImagePool>>,
    primed: bool,

    video_frames: u64,
    sequence: u64,
    audio_pending: bool,
}

impl SyntheticCamera {
    /// Creates a camera whose units own their payloads
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            pool: None,
            primed: false,
            video_frames: 0,
            sequence: 0,
            audio_pending: false,
        }
    }

    /// Takes video payloads from `pool`; those units are externally managed
    pub fn with_pool(mut self, pool: Arc<ImagePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Video frames captured so far
    pub fn frames_captured(&self) -> u64 {
        self.video_frames
    }

    fn frame_pts(&self, frame: u64) -> i64 {
        frame as i64 * VIDEO_CLOCK_RATE / i64::from(self.config.fps)
    }

    fn in_motion(&self, frame: u64) -> bool {
        let cycle = self.config.motion_cycle;
        cycle > 0 && frame % cycle >= cycle - cycle / 3
    }

    /// Renders the frame image. Static frames repeat one pattern; moving
    /// frames shift it every frame.
    fn render(&self, frame: u64) -> Bytes {
        let shift = if self.in_motion(frame) { frame * 37 } else { 0 };
        (0..self.config.frame_size)
            .map(|i| ((i as u64 + shift) % 251) as u8)
            .collect::<Vec<u8>>()
            .into()
    }

    fn next_video(&mut self) -> CaptureOutcome {
        let frame = self.video_frames;
        let image = self.render(frame);

        let ownership = match &self.pool {
            Some(pool) => match pool.acquire(image.clone()) {
                Some(image_index) => Ownership::ExternallyManaged { image_index },
                None => {
                    debug!(frame, "Image pool exhausted");
                    return CaptureOutcome::Retry;
                }
            },
            None => Ownership::Owned,
        };

        let keyframe = frame % u64::from(self.config.keyframe_interval) == 0;
        let unit = MediaUnit::video(self.sequence, self.config.video_stream_id, keyframe, image)
            .with_pts(self.frame_pts(frame))
            .with_ownership(ownership);

        self.video_frames += 1;
        self.sequence += 1;
        self.audio_pending = self.config.audio;

        CaptureOutcome::Captured(unit)
    }

    fn next_audio(&mut self) -> CaptureOutcome {
        // 20ms of silent 16-bit mono at 8kHz
        let unit = MediaUnit::audio(
            self.sequence,
            self.config.audio_stream_id,
            Bytes::from(vec![0u8; 320]),
        )
        .with_pts(self.frame_pts(self.video_frames.saturating_sub(1)));

        self.sequence += 1;
        self.audio_pending = false;

        CaptureOutcome::Captured(unit)
    }
}

impl CaptureSource for SyntheticCamera {
    fn prime(&mut self) -> Result<(), CaptureError> {
        if self.config.fps == 0 {
            return Err(CaptureError::InvalidConfig("fps must be > 0".to_string()));
        }
        if self.config.keyframe_interval == 0 {
            return Err(CaptureError::InvalidConfig(
                "keyframe_interval must be > 0".to_string(),
            ));
        }
        if self.config.frame_size == 0 {
            return Err(CaptureError::InvalidConfig(
                "frame_size must be > 0".to_string(),
            ));
        }

        info!(
            stream = %self.config.video_stream_id,
            fps = self.config.fps,
            keyframe_interval = self.config.keyframe_interval,
            frame_size = self.config.frame_size,
            audio = self.config.audio,
            pooled = self.pool.is_some(),
            "Synthetic camera primed"
        );

        self.primed = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<CaptureOutcome, CaptureError> {
        if !self.primed {
            return Err(CaptureError::NotPrimed);
        }

        if self.audio_pending {
            return Ok(self.next_audio());
        }

        if let Some(max) = self.config.max_frames {
            if self.video_frames >= max {
                return Err(CaptureError::Exhausted(self.video_frames));
            }
        }

        Ok(self.next_video())
    }
}
