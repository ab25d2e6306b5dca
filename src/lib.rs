//! Keyframe-aligned packet queue for surveillance capture pipelines
//!
//! This library buffers captured media units between a camera and the
//! consumers that need them:
//! - A bounded trailing window of video history, always starting on a keyframe
//! - A non-destructive analysis cursor for motion detection
//! - FIFO dequeue for event recording
//! - Explicit payload ownership so pooled images are never freed by the queue
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use zm_packetqueue::{MediaUnit, PacketQueue, StreamId};
//!
//! let queue = PacketQueue::new(30, StreamId(0));
//! queue.enqueue(MediaUnit::video(0, StreamId(0), true, Bytes::from_static(b"jpeg")));
//!
//! assert_eq!(queue.peek_for_analysis().map(|unit| unit.sequence), Some(0));
//! assert!(!queue.advance_cursor());
//! assert_eq!(queue.dequeue().map(|unit| unit.sequence), Some(0));
//! ```

pub mod capture;
pub mod config;
pub mod packet;
pub mod pipeline;
pub mod queue;

// Re-exports for convenience
pub use capture::{
    CaptureConfig, CaptureError, CaptureOutcome, CaptureSource, ImagePool, SyntheticCamera,
};
pub use packet::{MediaKind, MediaUnit, Ownership, StreamId};
pub use pipeline::{
    Analyzer, LogRecorder, MotionAnalyzer, Pipeline, PipelineConfig, PipelineReport, Recorder,
};
pub use queue::{AnalysisUnit, PacketQueue, QueueStats, UnitReclaimer};
