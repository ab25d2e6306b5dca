//! Media units moving through the capture pipeline

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier correlating a unit to its source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of media carried by a unit. Only video counts toward retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

/// Who is responsible for a unit's payload once it leaves the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The unit owns its payload; the queue releases it on eviction.
    Owned,

    /// The payload lives in an external image pool slot. The queue only
    /// unlinks such units and hands them back to the pool.
    ExternallyManaged { image_index: usize },
}

impl Ownership {
    pub fn is_owned(&self) -> bool {
        matches!(self, Ownership::Owned)
    }

    /// Pool slot backing the payload, if externally managed
    pub fn image_index(&self) -> Option<usize> {
        match self {
            Ownership::Owned => None,
            Ownership::ExternallyManaged { image_index } => Some(*image_index),
        }
    }
}

/// One encoded frame (video or audio)
#[derive(Debug, Clone)]
pub struct MediaUnit {
    /// Capture order, assigned by the capture source
    pub sequence: u64,

    pub kind: MediaKind,

    /// Decoding can restart at this unit. Only meaningful for video.
    pub keyframe: bool,

    pub stream_id: StreamId,

    /// Presentation timestamp in stream time base
    pub pts: i64,

    pub payload: Bytes,

    pub ownership: Ownership,
}

impl MediaUnit {
    /// Creates a video unit that owns its payload
    pub fn video(sequence: u64, stream_id: StreamId, keyframe: bool, payload: Bytes) -> Self {
        Self {
            sequence,
            kind: MediaKind::Video,
            keyframe,
            stream_id,
            pts: sequence as i64,
            payload,
            ownership: Ownership::Owned,
        }
    }

    /// Creates an audio unit that owns its payload
    pub fn audio(sequence: u64, stream_id: StreamId, payload: Bytes) -> Self {
        Self {
            sequence,
            kind: MediaKind::Audio,
            keyframe: false,
            stream_id,
            pts: sequence as i64,
            payload,
            ownership: Ownership::Owned,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// True for a video unit on `stream_id`
    pub fn is_stream_video(&self, stream_id: StreamId) -> bool {
        self.is_video() && self.stream_id == stream_id
    }

    /// True for a keyframe on `stream_id`, i.e. a valid retention boundary
    pub fn is_stream_keyframe(&self, stream_id: StreamId) -> bool {
        self.is_stream_video(stream_id) && self.keyframe
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
