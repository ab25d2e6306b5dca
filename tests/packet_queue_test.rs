//! Packet queue behaviour: retention scenarios, cursor and ownership rules

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use zm_packetqueue::{MediaUnit, Ownership, PacketQueue, StreamId, UnitReclaimer};

const STREAM: StreamId = StreamId(1);
const AUDIO: StreamId = StreamId(2);

fn video(seq: u64, keyframe: bool) -> MediaUnit {
    MediaUnit::video(seq, STREAM, keyframe, Bytes::from(vec![seq as u8; 16]))
}

fn audio(seq: u64) -> MediaUnit {
    MediaUnit::audio(seq, AUDIO, Bytes::from_static(&[0; 4]))
}

fn pooled(seq: u64, keyframe: bool) -> MediaUnit {
    video(seq, keyframe).with_ownership(Ownership::ExternallyManaged {
        image_index: seq as usize,
    })
}

/// Empties the queue and returns the sequences it held, oldest first
fn contents(queue: &PacketQueue) -> Vec<u64> {
    std::iter::from_fn(|| queue.dequeue().map(|unit| unit.sequence)).collect()
}

/// Empties the queue, checking the video count matches a scan
fn assert_video_count_consistent(queue: &PacketQueue) {
    let expected = queue.video_unit_count();
    let mut scanned = 0;
    while let Some(unit) = queue.dequeue() {
        if unit.is_video() {
            scanned += 1;
        }
    }
    assert_eq!(expected, scanned, "video count drifted from resident units");
}

#[derive(Default)]
struct RecordingReclaimer {
    reclaimed: Mutex<Vec<u64>>,
}

impl UnitReclaimer for RecordingReclaimer {
    fn reclaim(&self, unit: MediaUnit) {
        assert!(!unit.ownership.is_owned(), "owned unit handed to reclaimer");
        self.reclaimed.lock().push(unit.sequence);
    }
}

#[test]
fn test_scenario_a_keyframe_at_boundary_keeps_all() {
    // Frame budget 3: trim(2) runs once two video units are resident
    let queue = PacketQueue::new(3, STREAM);
    assert_eq!(queue.max_video_window(), 2);

    queue.enqueue(video(1, true));
    queue.enqueue(video(2, false));
    queue.enqueue(video(3, false));
    assert_eq!(queue.size(), 3);

    queue.enqueue(video(4, false));
    assert_eq!(queue.size(), 4);
    assert_eq!(queue.video_unit_count(), 4);
    assert_eq!(queue.stats().evicted, 0);
    assert_eq!(contents(&queue), [1, 2, 3, 4]);
}

#[test]
fn test_scenario_b_trim_to_later_keyframe() {
    let queue = PacketQueue::new(3, STREAM);

    queue.enqueue(video(1, true));
    queue.enqueue(video(2, false));
    queue.enqueue(video(3, true));
    queue.enqueue(video(4, false));
    assert_eq!(queue.size(), 4);

    queue.enqueue(video(5, false));
    assert_eq!(queue.video_unit_count(), 3);
    assert_eq!(queue.stats().evicted, 2);
    assert_eq!(contents(&queue), [3, 4, 5]);
}

#[test]
fn test_scenario_b_explicit_trim() {
    let queue = PacketQueue::new(100, STREAM);
    for (seq, key) in [(1, true), (2, false), (3, true), (4, false), (5, false)] {
        queue.enqueue(video(seq, key));
    }

    assert_eq!(queue.trim(2, STREAM), 2);
    assert_eq!(queue.video_unit_count(), 3);
    assert_eq!(contents(&queue), [3, 4, 5]);
}

#[test]
fn test_scenario_c_empty_queue() {
    let queue = PacketQueue::new(30, STREAM);

    assert!(queue.dequeue().is_none());
    assert!(queue.peek_for_analysis().is_none());
    assert!(!queue.advance_cursor());
    assert_eq!(queue.size(), 0);
    assert_eq!(queue.video_unit_count(), 0);
    assert_eq!(queue.trim(0, STREAM), 0);
}

#[test]
fn test_scenario_d_single_unit_cursor() {
    let queue = PacketQueue::new(30, STREAM);
    queue.enqueue(video(7, true));

    assert!(!queue.advance_cursor());
    assert_eq!(queue.peek_for_analysis().map(|u| u.sequence), Some(7));
    assert!(!queue.advance_cursor());
    assert_eq!(queue.peek_for_analysis().map(|u| u.sequence), Some(7));
}

#[test]
fn test_fifo_order() {
    let queue = PacketQueue::new(1000, STREAM);
    for seq in 0..50 {
        if seq % 3 == 0 {
            queue.enqueue(audio(seq));
        } else {
            queue.enqueue(video(seq, seq % 10 == 1));
        }
    }

    assert_eq!(contents(&queue), (0..50).collect::<Vec<u64>>());
}

#[test]
fn test_audio_rides_along_with_video() {
    let queue = PacketQueue::new(100, STREAM);
    queue.enqueue(video(0, true));
    queue.enqueue(audio(1));
    queue.enqueue(video(2, false));
    queue.enqueue(audio(3));
    queue.enqueue(video(4, true));
    queue.enqueue(audio(5));
    queue.enqueue(video(6, false));
    queue.enqueue(audio(7));

    // Keeping one frame needs two stream units from the tail: 6 and 4.
    // 4 is a keyframe, so everything before it goes, audio included.
    assert_eq!(queue.trim(1, STREAM), 4);
    assert_eq!(queue.video_unit_count(), 2);
    assert_eq!(contents(&queue), [4, 5, 6, 7]);
}

#[test]
fn test_trim_without_keyframe_keeps_everything() {
    let queue = PacketQueue::new(100, STREAM);
    for seq in 0..10 {
        queue.enqueue(video(seq, false));
    }

    assert_eq!(queue.trim(2, STREAM), 0);
    assert_eq!(queue.size(), 10);
}

#[test]
fn test_window_exceeded_until_keyframe_arrives() {
    // Budget of 5 but a GOP of 8: the queue grows past the budget rather
    // than starting on a non-keyframe
    let queue = PacketQueue::new(5, STREAM);
    for seq in 0..8 {
        queue.enqueue(video(seq, seq == 0));
    }
    assert_eq!(queue.size(), 8);

    queue.enqueue(video(8, true));
    for seq in 9..13 {
        queue.enqueue(video(seq, false));
    }

    let sequences = contents(&queue);
    assert_eq!(sequences.first(), Some(&8));
    assert_eq!(sequences.len(), 5);
}

#[test]
fn test_trim_on_other_stream() {
    let queue = PacketQueue::new(100, STREAM);
    let other = StreamId(9);
    queue.enqueue(MediaUnit::video(0, other, true, Bytes::new()));
    queue.enqueue(video(1, true));
    queue.enqueue(MediaUnit::video(2, other, true, Bytes::new()));
    queue.enqueue(MediaUnit::video(3, other, false, Bytes::new()));

    assert_eq!(queue.trim(1, other), 2);
    assert_eq!(contents(&queue), [2, 3]);
}

#[test]
fn test_trim_correctness_over_generated_queues() {
    // Small LCG so the patterns are reproducible
    let mut seed = 0x2545_f491_u64;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as u32
    };

    for _ in 0..200 {
        let queue = PacketQueue::new(10_000, STREAM);
        let len = 5 + next() % 40;
        let mut stream_video = 0usize;

        for seq in 0..u64::from(len) {
            match next() % 6 {
                0 => queue.enqueue(audio(seq)),
                1 => {
                    queue.enqueue(video(seq, true));
                    stream_video += 1;
                }
                _ => {
                    queue.enqueue(video(seq, false));
                    stream_video += 1;
                }
            }
        }

        let keep = (next() as usize) % 8;
        let removed = queue.trim(keep, STREAM);

        let mut remaining = Vec::new();
        while let Some(unit) = queue.dequeue() {
            remaining.push(unit);
        }
        let kept_video = remaining.iter().filter(|u| u.is_stream_video(STREAM)).count();

        if stream_video > keep {
            assert!(kept_video >= keep, "kept {kept_video} of {stream_video}, wanted {keep}");
        }
        if removed > 0 {
            assert!(kept_video > keep);
            let oldest = remaining
                .iter()
                .find(|u| u.is_stream_video(STREAM))
                .expect("window has stream video");
            assert!(oldest.keyframe, "window does not start on a keyframe");
            assert!(remaining[0].keyframe && remaining[0].is_stream_video(STREAM));
        }
    }
}

#[test]
fn test_cursor_survives_trim() {
    let queue = PacketQueue::new(100, STREAM);
    for (seq, key) in [(0, true), (1, false), (2, false), (3, true), (4, false), (5, false)] {
        queue.enqueue(video(seq, key));
    }

    assert!(queue.advance_cursor());
    assert!(queue.advance_cursor());
    assert_eq!(queue.peek_for_analysis().map(|u| u.sequence), Some(2));

    assert_eq!(queue.trim(2, STREAM), 3);
    assert_eq!(queue.peek_for_analysis().map(|u| u.sequence), Some(3));
}

#[test]
fn test_cursor_ahead_of_trim_is_untouched() {
    let queue = PacketQueue::new(100, STREAM);
    for (seq, key) in [(0, true), (1, false), (2, true), (3, false), (4, false)] {
        queue.enqueue(video(seq, key));
    }
    while queue.advance_cursor() {}

    queue.trim(2, STREAM);
    assert_eq!(queue.peek_for_analysis().map(|u| u.sequence), Some(4));
}

#[test]
fn test_cursor_end_position_only_when_empty() {
    let queue = PacketQueue::new(100, STREAM);
    queue.enqueue(video(0, true));
    queue.enqueue(video(1, false));
    while queue.advance_cursor() {}

    queue.dequeue();
    assert!(queue.peek_for_analysis().is_some());
    queue.dequeue();
    assert!(queue.peek_for_analysis().is_none());

    // Enqueue after the end position restarts analysis at the new head
    queue.enqueue(video(2, false));
    assert_eq!(queue.peek_for_analysis().map(|u| u.sequence), Some(2));
}

#[test]
fn test_drain_resets_cursor_and_count() {
    let queue = PacketQueue::new(100, STREAM);
    for seq in 0..5 {
        queue.enqueue(video(seq, seq == 0));
    }
    queue.advance_cursor();

    assert_eq!(queue.drain(), 5);
    assert_eq!(queue.video_unit_count(), 0);
    assert!(queue.peek_for_analysis().is_none());

    queue.enqueue(video(5, true));
    assert_eq!(queue.peek_for_analysis().map(|u| u.sequence), Some(5));
}

#[test]
fn test_ownership_partition_on_trim() {
    let reclaimer = Arc::new(RecordingReclaimer::default());
    let queue =
        PacketQueue::new(100, STREAM).with_reclaimer(Arc::clone(&reclaimer) as Arc<dyn UnitReclaimer>);

    queue.enqueue(pooled(0, true));
    queue.enqueue(video(1, false));
    queue.enqueue(pooled(2, false));
    queue.enqueue(audio(3));
    queue.enqueue(video(4, true));
    queue.enqueue(pooled(5, false));
    queue.enqueue(pooled(6, false));

    assert_eq!(queue.trim(2, STREAM), 4);

    let stats = queue.stats();
    assert_eq!(stats.evicted, 4);
    assert_eq!(stats.released, 2);
    assert_eq!(stats.reclaimed, 2);
    assert_eq!(*reclaimer.reclaimed.lock(), [0, 2]);
}

#[test]
fn test_ownership_partition_on_drain_and_drop() {
    let reclaimer = Arc::new(RecordingReclaimer::default());
    {
        let queue = PacketQueue::new(100, STREAM)
            .with_reclaimer(Arc::clone(&reclaimer) as Arc<dyn UnitReclaimer>);
        queue.enqueue(pooled(0, true));
        queue.enqueue(video(1, false));

        assert_eq!(queue.drain(), 2);
        assert_eq!(queue.stats().released, 1);
        assert_eq!(*reclaimer.reclaimed.lock(), [0]);

        queue.enqueue(pooled(2, true));
        queue.enqueue(video(3, false));
    }

    // Dropping the queue drains what is left
    assert_eq!(*reclaimer.reclaimed.lock(), [0, 2]);
}

#[test]
fn test_dequeue_transfers_ownership_without_reclaim() {
    let reclaimer = Arc::new(RecordingReclaimer::default());
    let queue =
        PacketQueue::new(100, STREAM).with_reclaimer(Arc::clone(&reclaimer) as Arc<dyn UnitReclaimer>);
    queue.enqueue(pooled(0, true));

    let unit = queue.dequeue().expect("unit queued");
    assert_eq!(unit.ownership.image_index(), Some(0));
    assert!(reclaimer.reclaimed.lock().is_empty());
    assert_eq!(queue.stats().evicted, 0);
}

#[test]
fn test_concurrent_capture_analysis_and_writer() {
    let queue = Arc::new(PacketQueue::new(30, STREAM));
    let total = 2_000u64;

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for seq in 0..total {
                if seq % 4 == 3 {
                    queue.enqueue(audio(seq));
                } else {
                    queue.enqueue(video(seq, seq % 12 == 0));
                }
            }
        })
    };

    let analyzer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut last = None;
            let mut analyzed = 0u64;
            for _ in 0..20_000 {
                if let Some(seq) = queue.peek_for_analysis().map(|u| u.sequence) {
                    if let Some(prev) = last {
                        assert!(seq >= prev, "cursor moved backward while units were resident");
                    }
                    if last != Some(seq) {
                        analyzed += 1;
                    }
                    last = Some(seq);
                }
                if !queue.advance_cursor() {
                    thread::yield_now();
                }
            }
            analyzed
        })
    };

    let writer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut written = Vec::new();
            for i in 0..5_000 {
                if i % 3 == 0 {
                    if let Some(unit) = queue.dequeue() {
                        written.push(unit.sequence);
                    }
                } else {
                    thread::yield_now();
                }
            }
            written
        })
    };

    producer.join().unwrap();
    analyzer.join().unwrap();
    let written = writer.join().unwrap();

    assert!(written.windows(2).all(|w| w[0] < w[1]), "dequeue order broke FIFO");

    let stats = queue.stats();
    assert_eq!(stats.enqueued, total);
    assert_eq!(stats.dequeued, written.len() as u64);
    assert_eq!(
        stats.enqueued,
        stats.dequeued + stats.evicted + stats.size as u64
    );

    assert_video_count_consistent(&queue);
}
