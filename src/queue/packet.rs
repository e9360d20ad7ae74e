//! Packet buffer types
//!
//! A `PacketBuffer` is one encoded frame read off the network transport,
//! plus the metadata the recorder and relay need. The payload is a `Bytes`
//! handle, so fanning a packet out into both the record and relay queues is
//! a reference-count bump, not a copy.

use bytes::Bytes;

/// Kind of elementary stream a packet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// H.264 video
    Video,
    /// AAC audio
    Audio,
}

impl StreamKind {
    /// Short label for log fields
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

/// One encoded frame with timing metadata
///
/// Timestamps are in the source track's timebase. `pts`/`dts` are `None`
/// when the source did not stamp the frame; the recorder's normalizer fills
/// the gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketBuffer {
    /// Stream kind
    pub kind: StreamKind,
    /// Encoded payload (Annex-B for video, ADTS or raw for audio)
    pub data: Bytes,
    /// Presentation timestamp in source ticks
    pub pts: Option<i64>,
    /// Decode timestamp in source ticks
    pub dts: Option<i64>,
    /// Frame duration in source ticks (0 = unknown)
    pub duration: i64,
    /// Whether this is a video keyframe
    pub keyframe: bool,
}

impl PacketBuffer {
    /// Create a video packet
    pub fn video(data: Bytes, pts: Option<i64>, dts: Option<i64>, keyframe: bool) -> Self {
        Self {
            kind: StreamKind::Video,
            data,
            pts,
            dts,
            duration: 0,
            keyframe,
        }
    }

    /// Create an audio packet
    pub fn audio(data: Bytes, pts: Option<i64>, dts: Option<i64>) -> Self {
        Self {
            kind: StreamKind::Audio,
            data,
            pts,
            dts,
            duration: 0,
            keyframe: false,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
