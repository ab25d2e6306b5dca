//! Motion analysis over the queue's analysis cursor

use crate::packet::{MediaUnit, StreamId};
use bytes::Bytes;
use tracing::trace;

/// Inspects units without removing them from the queue
pub trait Analyzer: Send {
    /// Returns `Some(motion)` for units it inspects and `None` for units it
    /// ignores
    fn analyze(&mut self, unit: &MediaUnit) -> Option<bool>;
}

/// Frame-difference motion detector.
///
/// Scores each video frame on the primary stream by the mean absolute byte
/// difference to the previous frame, normalized to 0.0-1.0.
pub struct MotionAnalyzer {
    stream_id: StreamId,
    threshold: f64,
    previous: Option<Bytes>,
}

impl MotionAnalyzer {
    pub fn new(stream_id: StreamId, threshold: f64) -> Self {
        Self {
            stream_id,
            threshold,
            previous: None,
        }
    }

    /// Normalized difference between two frames. Frames of different size
    /// score as full motion.
    pub fn score(previous: &[u8], current: &[u8]) -> f64 {
        if previous.len() != current.len() {
            return 1.0;
        }
        if current.is_empty() {
            return 0.0;
        }

        let total: u64 = previous
            .iter()
            .zip(current)
            .map(|(a, b)| u64::from(a.abs_diff(*b)))
            .sum();

        total as f64 / (current.len() as f64 * 255.0)
    }
}

impl Analyzer for MotionAnalyzer {
    fn analyze(&mut self, unit: &MediaUnit) -> Option<bool> {
        if !unit.is_stream_video(self.stream_id) {
            return None;
        }

        let motion = match self.previous.replace(unit.payload.clone()) {
            Some(previous) => {
                let score = Self::score(&previous, &unit.payload);
                trace!(sequence = unit.sequence, score, "Motion score");
                score > self.threshold
            }
            None => false,
        };

        Some(motion)
    }
}
