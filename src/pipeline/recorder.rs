//! Event recorders fed by the writer

use crate::packet::MediaUnit;
use tracing::{debug, info};

/// Persists units dequeued during an event
pub trait Recorder: Send {
    /// Called before the first unit of an event
    fn start_event(&mut self) {}

    fn record(&mut self, unit: &MediaUnit);

    /// Called after the last unit of an event
    fn end_event(&mut self) {}
}

/// Recorder that only logs what it would write
#[derive(Debug, Default)]
pub struct LogRecorder {
    events: u64,
    units: u64,
    bytes: u64,
}

impl LogRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> u64 {
        self.events
    }
}

impl Recorder for LogRecorder {
    fn start_event(&mut self) {
        self.events += 1;
        self.units = 0;
        self.bytes = 0;
        info!(event = self.events, "Event recording started");
    }

    fn record(&mut self, unit: &MediaUnit) {
        self.units += 1;
        self.bytes += unit.len() as u64;
        debug!(
            event = self.events,
            sequence = unit.sequence,
            keyframe = unit.keyframe,
            pts = unit.pts,
            "Recorded unit"
        );
    }

    fn end_event(&mut self) {
        info!(
            event = self.events,
            units = self.units,
            bytes = self.bytes,
            "Event recording finished"
        );
    }
}
