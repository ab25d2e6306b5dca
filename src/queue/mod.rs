//! Keyframe-aligned packet queue
//!
//! The queue holds captured media units in arrival order and serves three
//! activities at once:
//! - the capture path appends at the tail with [`PacketQueue::enqueue`]
//! - the analysis path walks a cursor with [`PacketQueue::peek_for_analysis`]
//!   and [`PacketQueue::advance_cursor`] without removing anything
//! - the writer pops from the head with [`PacketQueue::dequeue`]
//!
//! When the number of resident video units reaches the configured window,
//! enqueue trims the oldest material so the queue starts on a keyframe of the
//! primary video stream.

mod stats;
mod trim;

pub use stats::QueueStats;
pub use trim::{plan_trim, TrimPlan};

use crate::packet::{MediaUnit, Ownership, StreamId};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use stats::QueueCounters;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, trace};

/// Receives externally managed units after the queue unlinks them.
///
/// The queue never releases such a unit's payload; it hands the unit back to
/// whoever owns the backing image instead.
pub trait UnitReclaimer: Send + Sync {
    fn reclaim(&self, unit: MediaUnit);
}

/// Borrowed view of the unit under the analysis cursor.
///
/// Holds the queue lock until dropped, so keep it short-lived and never call
/// back into the queue while holding it.
pub struct AnalysisUnit<'a>(MappedMutexGuard<'a, MediaUnit>);

impl Deref for AnalysisUnit<'_> {
    type Target = MediaUnit;

    fn deref(&self) -> &MediaUnit {
        &self.0
    }
}

/// Queue contents guarded by the queue lock
#[derive(Debug, Default)]
struct QueueState {
    units: VecDeque<MediaUnit>,

    // Logical position of units[0]. Positions never shift when the head is
    // popped, so the cursor stays valid across removals.
    head: u64,

    // Logical position of the next unit to analyze; None is the end position
    cursor: Option<u64>,

    video_count: usize,
}

impl QueueState {
    fn tail(&self) -> u64 {
        self.head + self.units.len() as u64
    }

    fn cursor_index(&self) -> Option<usize> {
        self.cursor.map(|position| (position - self.head) as usize)
    }

    /// Unlinks the head unit, stepping the cursor off it first
    fn pop_front(&mut self) -> Option<MediaUnit> {
        let unit = self.units.pop_front()?;

        if self.cursor == Some(self.head) {
            self.cursor = if self.units.is_empty() {
                None
            } else {
                Some(self.head + 1)
            };
        }
        self.head += 1;

        if unit.is_video() {
            self.video_count -= 1;
        }

        Some(unit)
    }
}

/// Bounded, time-ordered queue of media units with an analysis cursor
pub struct PacketQueue {
    state: Mutex<QueueState>,

    // Eviction high-water mark: one less than the frame budget, since trim
    // always counts one extra unit to land on a keyframe
    max_video_window: usize,
    video_stream_id: StreamId,

    reclaimer: Option<Arc<dyn UnitReclaimer>>,
    counters: QueueCounters,
}

impl PacketQueue {
    /// Creates a queue retaining roughly `video_image_count` video units of
    /// `video_stream_id`
    pub fn new(video_image_count: usize, video_stream_id: StreamId) -> Self {
        let max_video_window = video_image_count.saturating_sub(1);

        debug!(
            video_image_count,
            max_video_window,
            stream = %video_stream_id,
            "Packet queue created"
        );

        Self {
            state: Mutex::new(QueueState::default()),
            max_video_window,
            video_stream_id,
            reclaimer: None,
            counters: QueueCounters::default(),
        }
    }

    /// Hands evicted externally managed units to `reclaimer`
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn UnitReclaimer>) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }

    /// Appends a unit at the tail.
    ///
    /// A video unit that brings the video count up to the window triggers a
    /// trim before this returns. If the cursor was at the end position it is
    /// pointed at the first unit.
    pub fn enqueue(&self, unit: MediaUnit) {
        let is_video = unit.is_video();
        let evicted = {
            let mut state = self.state.lock();
            state.units.push_back(unit);

            let mut evicted = Vec::new();
            if is_video {
                state.video_count += 1;
                if state.video_count >= self.max_video_window {
                    evicted =
                        self.trim_locked(&mut state, self.max_video_window, self.video_stream_id);
                }
            }

            if state.cursor.is_none() {
                trace!("Pointing analysis cursor at the first unit");
                state.cursor = Some(state.head);
            }

            evicted
        };

        QueueCounters::bump(&self.counters.enqueued);
        self.dispose(evicted);
    }

    /// Pops the head unit. Ownership passes to the caller.
    pub fn dequeue(&self) -> Option<MediaUnit> {
        let unit = self.state.lock().pop_front()?;
        QueueCounters::bump(&self.counters.dequeued);
        Some(unit)
    }

    /// Pops the head unit only once the analysis cursor has moved past it
    pub fn dequeue_analyzed(&self) -> Option<MediaUnit> {
        let unit = {
            let mut state = self.state.lock();
            let head = state.head;
            match state.cursor {
                Some(position) if position > head => state.pop_front()?,
                _ => return None,
            }
        };

        QueueCounters::bump(&self.counters.dequeued);
        Some(unit)
    }

    /// Removes everything older than the keyframe that starts a window of at
    /// least `frames_to_keep` video units on `stream_id`.
    ///
    /// Returns the number of units removed. Zero is a normal outcome when the
    /// queue is short or holds no suitable keyframe.
    pub fn trim(&self, frames_to_keep: usize, stream_id: StreamId) -> usize {
        let evicted = {
            let mut state = self.state.lock();
            self.trim_locked(&mut state, frames_to_keep, stream_id)
        };

        let removed = evicted.len();
        self.dispose(evicted);
        removed
    }

    /// Removes every unit and resets the cursor to the end position.
    ///
    /// Returns the number of units removed.
    pub fn drain(&self) -> usize {
        let evicted: Vec<MediaUnit> = {
            let mut state = self.state.lock();
            let units = std::mem::take(&mut state.units);
            state.head += units.len() as u64;
            state.video_count = 0;
            state.cursor = None;
            units.into()
        };

        let removed = evicted.len();
        if removed > 0 {
            debug!(removed, "Drained packet queue");
        }
        self.dispose(evicted);
        removed
    }

    /// Unit under the analysis cursor, without consuming it
    pub fn peek_for_analysis(&self) -> Option<AnalysisUnit<'_>> {
        MutexGuard::try_map(self.state.lock(), |state| {
            let index = state.cursor_index()?;
            state.units.get_mut(index)
        })
        .ok()
        .map(AnalysisUnit)
    }

    /// Moves the cursor one unit toward the tail.
    ///
    /// Returns false, leaving the cursor where it is, when it already sits on
    /// the last unit or at the end position.
    pub fn advance_cursor(&self) -> bool {
        let mut state = self.state.lock();

        // Look one step ahead instead of measuring distance to the tail
        let Some(position) = state.cursor else {
            return false;
        };
        let next = position + 1;
        if next >= state.tail() {
            return false;
        }

        state.cursor = Some(next);
        true
    }

    /// Total resident units
    pub fn size(&self) -> usize {
        self.state.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().units.is_empty()
    }

    /// Resident video units
    pub fn video_unit_count(&self) -> usize {
        self.state.lock().video_count
    }

    pub fn max_video_window(&self) -> usize {
        self.max_video_window
    }

    pub fn video_stream_id(&self) -> StreamId {
        self.video_stream_id
    }

    /// Gets queue statistics
    pub fn stats(&self) -> QueueStats {
        let (size, video_units) = {
            let state = self.state.lock();
            (state.units.len(), state.video_count)
        };
        self.counters.snapshot(size, video_units)
    }

    /// Plans and applies a trim under the caller's lock
    fn trim_locked(
        &self,
        state: &mut QueueState,
        frames_to_keep: usize,
        stream_id: StreamId,
    ) -> Vec<MediaUnit> {
        debug!(
            frames_to_keep,
            queued = state.units.len(),
            stream = %stream_id,
            "Trimming packet queue"
        );

        let plan = plan_trim(&state.units, frames_to_keep, stream_id);
        match plan {
            TrimPlan::NotEnoughVideo { missing } => {
                trace!(missing, "Hit head of queue before filling the window");
            }
            TrimPlan::NoKeyframe { boundary } => {
                debug!(boundary, "No keyframe at or before the window boundary");
            }
            TrimPlan::Cut { keyframe } => {
                trace!(keyframe, "Window starts at keyframe");
            }
        }

        let evicted: Vec<MediaUnit> = (0..plan.removal_count())
            .filter_map(|_| state.pop_front())
            .collect();

        if !evicted.is_empty() {
            QueueCounters::bump(&self.counters.trims);
            debug!(
                removed = evicted.len(),
                remaining = state.units.len(),
                video_units = state.video_count,
                "Trimmed packet queue"
            );
        }

        evicted
    }

    /// Releases owned units and hands the rest back to their owner.
    /// Runs after the queue lock is dropped.
    fn dispose(&self, evicted: Vec<MediaUnit>) {
        for unit in evicted {
            QueueCounters::bump(&self.counters.evicted);

            match unit.ownership {
                Ownership::Owned => self.release(unit),
                Ownership::ExternallyManaged { image_index } => {
                    trace!(sequence = unit.sequence, image_index, "Unlinking pooled unit");
                    QueueCounters::bump(&self.counters.reclaimed);
                    if let Some(reclaimer) = &self.reclaimer {
                        reclaimer.reclaim(unit);
                    }
                }
            }
        }
    }

    fn release(&self, unit: MediaUnit) {
        debug_assert!(
            unit.ownership.is_owned(),
            "released externally managed unit {}",
            unit.sequence
        );
        QueueCounters::bump(&self.counters.released);
        drop(unit);
    }
}

impl fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PacketQueue")
            .field("size", &state.units.len())
            .field("video_count", &state.video_count)
            .field("cursor", &state.cursor_index())
            .field("max_video_window", &self.max_video_window)
            .field("video_stream_id", &self.video_stream_id)
            .finish()
    }
}

impl Drop for PacketQueue {
    fn drop(&mut self) {
        self.drain();
    }
}
