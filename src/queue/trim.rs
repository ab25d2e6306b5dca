//! Retention boundary search
//!
//! Planning is a pure scan over a consistent view of the queue. The caller
//! applies the plan while still holding the queue lock.

use crate::packet::{MediaUnit, StreamId};
use std::collections::VecDeque;
use tracing::trace;

/// Result of scanning the queue for a keyframe-aligned retention boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPlan {
    /// The queue holds fewer stream video units than the window needs
    NotEnoughVideo { missing: usize },

    /// The countdown boundary was found at `boundary`, but no stream keyframe
    /// sits at or before it. Nothing is removed.
    NoKeyframe { boundary: usize },

    /// Every unit before `keyframe` is removed; `units[keyframe]` starts the
    /// retained window.
    Cut { keyframe: usize },
}

impl TrimPlan {
    /// Number of units to pop from the head
    pub fn removal_count(&self) -> usize {
        match self {
            TrimPlan::Cut { keyframe } => *keyframe,
            _ => 0,
        }
    }
}

/// Finds where the retained window for `stream_id` starts.
///
/// `frames_to_keep + 1` stream video units are counted from the tail so the
/// keyframe search never starts past the window. From the unit that ends the
/// countdown the scan walks toward the head until it meets a stream keyframe.
pub fn plan_trim(units: &VecDeque<MediaUnit>, frames_to_keep: usize, stream_id: StreamId) -> TrimPlan {
    let mut remaining = frames_to_keep.saturating_add(1);
    let mut boundary = None;

    for (index, unit) in units.iter().enumerate().rev() {
        trace!(
            index,
            stream = %unit.stream_id,
            keyframe = unit.keyframe,
            remaining,
            "Scanning unit"
        );

        if unit.is_stream_video(stream_id) {
            remaining -= 1;
            if remaining == 0 {
                boundary = Some(index);
                break;
            }
        }
    }

    let Some(boundary) = boundary else {
        return TrimPlan::NotEnoughVideo { missing: remaining };
    };

    match units
        .range(..=boundary)
        .rposition(|unit| unit.is_stream_keyframe(stream_id))
    {
        Some(keyframe) => TrimPlan::Cut { keyframe },
        None => TrimPlan::NoKeyframe { boundary },
    }
}
