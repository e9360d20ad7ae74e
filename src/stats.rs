//! Per-channel pipeline statistics
//!
//! Counters are updated lock-free by the ingestion, recorder and relay tasks
//! and snapshotted on demand. Purely observational; nothing in the pipeline
//! branches on them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::queue::StreamKind;

/// Live counters for one channel
#[derive(Debug)]
pub struct ChannelCounters {
    started_at: Instant,
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    keyframes: AtomicU64,
    bytes_received: AtomicU64,
    reconnects: AtomicU64,
    segments_opened: AtomicU64,
    viewers_revoked: AtomicU64,
}

impl Default for ChannelCounters {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            video_frames: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            segments_opened: AtomicU64::new(0),
            viewers_revoked: AtomicU64::new(0),
        }
    }
}

impl ChannelCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one ingested frame
    pub fn record_frame(&self, kind: StreamKind, len: usize, keyframe: bool) {
        match kind {
            StreamKind::Video => self.video_frames.fetch_add(1, Ordering::Relaxed),
            StreamKind::Audio => self.audio_frames.fetch_add(1, Ordering::Relaxed),
        };
        if keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Record a transport reconnect
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a newly opened recording segment
    pub fn record_segment(&self) {
        self.segments_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a viewer revoked after a fatal send error
    pub fn record_viewer_revoked(&self) {
        self.viewers_revoked.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot
    pub fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            uptime: self.started_at.elapsed(),
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            segments_opened: self.segments_opened.load(Ordering::Relaxed),
            viewers_revoked: self.viewers_revoked.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one channel's counters
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    /// Time since the channel started
    pub uptime: std::time::Duration,
    /// Video frames ingested
    pub video_frames: u64,
    /// Audio frames ingested
    pub audio_frames: u64,
    /// Video keyframes ingested
    pub keyframes: u64,
    /// Total payload bytes ingested
    pub bytes_received: u64,
    /// Transport reconnects since start
    pub reconnects: u64,
    /// Recording segments opened
    pub segments_opened: u64,
    /// Viewers revoked after send failures
    pub viewers_revoked: u64,
}

impl ChannelStats {
    /// Ingest bitrate estimate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}
