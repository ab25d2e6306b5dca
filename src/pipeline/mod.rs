//! Capture, analysis and writer activities around a shared packet queue
//!
//! The queue itself never blocks. The pipeline wakes its consumers through a
//! [`Notify`] signalled after every enqueue, with a poll interval as fallback.

mod analysis;
mod recorder;

pub use analysis::{Analyzer, MotionAnalyzer};
pub use recorder::{LogRecorder, Recorder};

use crate::capture::{CaptureError, CaptureOutcome, CaptureSource};
use crate::packet::{MediaUnit, Ownership};
use crate::queue::{PacketQueue, QueueStats, UnitReclaimer};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("pipeline task failed: {0}")]
    Join(#[from] JoinError),
}

/// Timing for the pipeline activities
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Delay between capture attempts
    pub frame_interval: Duration,

    /// Longest idle wait for the analysis and writer activities
    pub poll_interval: Duration,

    /// Video units written after motion stops
    pub post_event_frames: u32,

    pub stats_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
            post_event_frames: 20,
            stats_interval: Duration::from_secs(10),
        }
    }
}

/// Summary of a pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub captured: u64,
    pub capture_retries: u64,
    pub analyzed: u64,
    pub motion_frames: u64,
    pub events: u64,
    pub recorded_units: u64,
    pub recorded_bytes: u64,
    /// Units still queued at shutdown
    pub drained: usize,
    pub queue: QueueStats,
}

#[derive(Debug, Default)]
struct CaptureTally {
    captured: u64,
    retries: u64,
}

#[derive(Debug, Default)]
struct AnalysisTally {
    analyzed: u64,
    motion_frames: u64,
    last_sequence: Option<u64>,
}

#[derive(Debug, Default)]
struct WriterTally {
    events: u64,
    units: u64,
    bytes: u64,
}

/// Shared state handed to every activity
#[derive(Clone)]
struct Shared {
    queue: Arc<PacketQueue>,
    reclaimer: Option<Arc<dyn UnitReclaimer>>,
    notify: Arc<Notify>,
    alarm: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    config: PipelineConfig,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Waits for the next enqueue or the poll interval
    async fn idle(&self) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = time::sleep(self.config.poll_interval) => {}
        }
    }
}

/// Runs capture, analysis and writer activities over one packet queue
pub struct Pipeline {
    shared: Shared,
}

impl Pipeline {
    pub fn new(queue: Arc<PacketQueue>, config: PipelineConfig) -> Self {
        Self {
            shared: Shared {
                queue,
                reclaimer: None,
                notify: Arc::new(Notify::new()),
                alarm: Arc::new(AtomicBool::new(false)),
                running: Arc::new(AtomicBool::new(false)),
                config,
            },
        }
    }

    /// Returns dequeued externally managed units to `reclaimer` once written
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn UnitReclaimer>) -> Self {
        self.shared.reclaimer = Some(reclaimer);
        self
    }

    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.shared.queue
    }

    /// Runs until `shutdown` resolves or the capture source is exhausted,
    /// then drains the queue.
    pub async fn run<C, A, R, F>(
        self,
        mut capture: C,
        analyzer: A,
        recorder: R,
        shutdown: F,
    ) -> Result<PipelineReport, PipelineError>
    where
        C: CaptureSource + 'static,
        A: Analyzer + 'static,
        R: Recorder + 'static,
        F: Future<Output = ()>,
    {
        let shared = self.shared;

        capture.prime()?;
        shared.running.store(true, Ordering::Relaxed);

        info!(
            window = shared.queue.max_video_window(),
            stream = %shared.queue.video_stream_id(),
            "Pipeline started"
        );

        let analysis_task = tokio::spawn(run_analysis(shared.clone(), analyzer));
        let writer_task = tokio::spawn(run_writer(shared.clone(), recorder));
        let stats_task = tokio::spawn(run_stats(shared.clone()));
        let mut capture_task = tokio::spawn(run_capture(shared.clone(), capture));

        tokio::pin!(shutdown);
        let capture_result = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                shared.running.store(false, Ordering::Relaxed);
                capture_task.await
            }
            result = &mut capture_task => {
                shared.running.store(false, Ordering::Relaxed);
                result
            }
        };

        // Wake idle consumers so they observe the stop flag
        shared.notify.notify_waiters();

        let analysis = analysis_task.await?;
        let writer = writer_task.await?;
        stats_task.await?;
        let capture = capture_result??;

        // Draining is the last queue operation
        let drained = shared.queue.drain();
        let queue = shared.queue.stats();

        info!(
            captured = capture.captured,
            analyzed = analysis.analyzed,
            recorded = writer.units,
            drained,
            evicted = queue.evicted,
            "Pipeline stopped"
        );

        Ok(PipelineReport {
            captured: capture.captured,
            capture_retries: capture.retries,
            analyzed: analysis.analyzed,
            motion_frames: analysis.motion_frames,
            events: writer.events,
            recorded_units: writer.units,
            recorded_bytes: writer.bytes,
            drained,
            queue,
        })
    }
}

async fn run_capture<C: CaptureSource>(
    shared: Shared,
    mut capture: C,
) -> Result<CaptureTally, CaptureError> {
    let mut tally = CaptureTally::default();
    let mut ticker = time::interval(shared.config.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while shared.is_running() {
        ticker.tick().await;

        // Drain everything the source has ready for this tick (video plus
        // any interleaved audio)
        loop {
            match capture.capture() {
                Ok(CaptureOutcome::Captured(unit)) => {
                    let video = unit.is_video();
                    shared.queue.enqueue(unit);
                    tally.captured += 1;
                    if video {
                        break;
                    }
                }
                Ok(CaptureOutcome::Retry) => {
                    tally.retries += 1;
                    warn!(retries = tally.retries, "Unable to capture image, retrying");
                    break;
                }
                Err(CaptureError::Exhausted(frames)) => {
                    info!(frames, "Capture source exhausted");
                    shared.notify.notify_waiters();
                    return Ok(tally);
                }
                Err(e) => return Err(e),
            }
        }

        shared.notify.notify_waiters();
    }

    Ok(tally)
}

async fn run_analysis<A: Analyzer>(shared: Shared, mut analyzer: A) -> AnalysisTally {
    let mut tally = AnalysisTally::default();

    while shared.is_running() {
        analyze_at_cursor(&shared, &mut analyzer, &mut tally);

        if !shared.queue.advance_cursor() {
            shared.idle().await;
        }
    }

    debug!(analyzed = tally.analyzed, "Analysis stopped");
    tally
}

/// Analyzes the unit under the cursor unless it was already analyzed.
///
/// The cursor cannot step past the last unit, so after catching up it keeps
/// returning the unit analyzed last. The analyzer works on a copy so the
/// queue lock is only held for the peek.
fn analyze_at_cursor<A: Analyzer>(shared: &Shared, analyzer: &mut A, tally: &mut AnalysisTally) {
    let unit = {
        let Some(unit) = shared.queue.peek_for_analysis() else {
            return;
        };
        if tally.last_sequence == Some(unit.sequence) {
            return;
        }
        MediaUnit::clone(&unit)
    };

    tally.last_sequence = Some(unit.sequence);
    tally.analyzed += 1;

    match analyzer.analyze(&unit) {
        Some(true) => {
            tally.motion_frames += 1;
            if !shared.alarm.swap(true, Ordering::Relaxed) {
                info!(sequence = unit.sequence, "Motion detected");
            }
        }
        Some(false) => {
            if shared.alarm.swap(false, Ordering::Relaxed) {
                info!(sequence = unit.sequence, "Motion stopped");
            }
        }
        None => {}
    }
}

async fn run_writer<R: Recorder>(shared: Shared, mut recorder: R) -> WriterTally {
    let mut tally = WriterTally::default();
    let mut post_event_remaining = 0u32;
    let mut recording = false;

    while shared.is_running() {
        let wrote = write_pending(
            &shared,
            &mut recorder,
            &mut tally,
            &mut post_event_remaining,
            &mut recording,
        );

        if !wrote {
            shared.idle().await;
        }
    }

    if recording {
        recorder.end_event();
    }

    debug!(units = tally.units, "Writer stopped");
    tally
}

/// Writes analyzed units while an event is active. Returns true if anything
/// was written.
fn write_pending<R: Recorder>(
    shared: &Shared,
    recorder: &mut R,
    tally: &mut WriterTally,
    post_event_remaining: &mut u32,
    recording: &mut bool,
) -> bool {
    let stream_id = shared.queue.video_stream_id();
    let mut wrote = false;

    loop {
        let alarm = shared.alarm.load(Ordering::Relaxed);
        if alarm {
            *post_event_remaining = shared.config.post_event_frames;
        }

        if !alarm && *post_event_remaining == 0 {
            if *recording {
                *recording = false;
                recorder.end_event();
            }
            return wrote;
        }

        let Some(unit) = shared.queue.dequeue_analyzed() else {
            return wrote;
        };

        if !*recording {
            *recording = true;
            tally.events += 1;
            recorder.start_event();
        }

        recorder.record(&unit);
        tally.units += 1;
        tally.bytes += unit.len() as u64;
        wrote = true;

        if !alarm && unit.is_stream_video(stream_id) {
            *post_event_remaining -= 1;
        }

        finish_unit(shared, unit);
    }
}

/// The writer owns dequeued units; pooled ones go back to their pool
fn finish_unit(shared: &Shared, unit: MediaUnit) {
    if let Ownership::ExternallyManaged { .. } = unit.ownership {
        if let Some(reclaimer) = &shared.reclaimer {
            reclaimer.reclaim(unit);
        }
    }
}

async fn run_stats(shared: Shared) {
    let mut ticker = time::interval(shared.config.stats_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    while shared.is_running() {
        let due = tokio::select! {
            _ = ticker.tick() => true,
            _ = shared.idle() => false,
        };
        if !due {
            continue;
        }

        let stats = shared.queue.stats();
        info!(
            size = stats.size,
            video_units = stats.video_units,
            enqueued = stats.enqueued,
            dequeued = stats.dequeued,
            evicted = stats.evicted,
            eviction_rate = %format!("{:.2}", stats.eviction_rate()),
            alarm = shared.alarm.load(Ordering::Relaxed),
            "Queue stats"
        );
    }
}
