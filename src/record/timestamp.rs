//! Timestamp normalization
//!
//! Camera timestamps arrive dirty: missing pts/dts, arbitrary start offsets,
//! ten-second jumps after an encoder hiccup, duplicates after a reorder.
//! The container cares: MP4 requires strictly increasing dts and
//! `pts >= dts` per track. One `TrackNormalizer` per track turns whatever
//! arrives into a clean zero-origin timeline in the writer's timebase.

use crate::transport::Timebase;

// Source-side gap treated as a discontinuity rather than real elapsed time
const JUMP_THRESHOLD_SECS: i64 = 10;

/// Normalized output timestamps in the destination timebase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTimestamps {
    /// Presentation timestamp, `>= dts`
    pub pts: i64,
    /// Decode timestamp, strictly greater than the previous packet's
    pub dts: i64,
    /// Duration
    pub duration: i64,
}

/// Per-track timestamp normalization state
#[derive(Debug)]
pub struct TrackNormalizer {
    src: Timebase,
    dst: Timebase,
    nominal_duration: i64,
    jump_threshold: i64,
    start: Option<i64>,
    last_src_dts: Option<i64>,
    last_dts: Option<i64>,
}

impl TrackNormalizer {
    /// Create a normalizer.
    ///
    /// `nominal_duration` (source ticks) fills in when a packet carries no
    /// duration; it also paces synthesized timestamps for completely
    /// unstamped packets.
    pub fn new(src: Timebase, dst: Timebase, nominal_duration: i64) -> Self {
        Self {
            src,
            dst,
            nominal_duration: nominal_duration.max(1),
            jump_threshold: Timebase::new(1, 1).rescale(JUMP_THRESHOLD_SECS, src),
            start: None,
            last_src_dts: None,
            last_dts: None,
        }
    }

    /// Forget all state; the next packet re-establishes the base.
    pub fn reset(&mut self) {
        self.start = None;
        self.last_src_dts = None;
        self.last_dts = None;
    }

    /// Normalize one packet's timestamps.
    pub fn normalize(
        &mut self,
        pts: Option<i64>,
        dts: Option<i64>,
        duration: i64,
    ) -> OutputTimestamps {
        let duration = if duration > 0 {
            duration
        } else {
            self.nominal_duration
        };

        // Fill gaps from the other stamp, then from the previous packet.
        let pts = pts.or(dts);
        let dts = dts.or(pts);
        let (raw_dts, raw_pts) = match (dts, pts) {
            (Some(d), Some(p)) => (d, p),
            _ => {
                let synthesized = self
                    .last_src_dts
                    .map(|last| last + duration)
                    .unwrap_or(0);
                (synthesized, synthesized)
            }
        };

        // A large source-side gap is a discontinuity (encoder restart,
        // clock step), not elapsed recording time: re-base instead of
        // writing a frozen gap into the file.
        if let (Some(_), Some(last)) = (self.start, self.last_src_dts) {
            if (raw_dts - last).abs() > self.jump_threshold {
                tracing::warn!(
                    previous = last,
                    current = raw_dts,
                    "timestamp jump detected, rebasing"
                );
                self.start = Some(raw_dts);
            }
        }

        let start = *self.start.get_or_insert(raw_dts);
        self.last_src_dts = Some(raw_dts);

        let rel_dts = (raw_dts - start).max(0);
        let rel_pts = (raw_pts - start).max(0);

        let mut out_dts = self.src.rescale(rel_dts, self.dst);
        let mut out_pts = self.src.rescale(rel_pts, self.dst);
        let out_duration = self.src.rescale(duration, self.dst);

        if let Some(last) = self.last_dts {
            if out_dts <= last {
                out_dts = last + 1;
            }
        }
        if out_pts < out_dts {
            out_pts = out_dts;
        }
        self.last_dts = Some(out_dts);

        OutputTimestamps {
            pts: out_pts,
            dts: out_dts,
            duration: out_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TB: Timebase = Timebase::RTP_VIDEO;

    fn normalizer() -> TrackNormalizer {
        TrackNormalizer::new(TB, TB, 3000)
    }

    #[test]
    fn test_zero_origin() {
        let mut n = normalizer();
        let out = n.normalize(Some(500_000), Some(500_000), 3000);
        assert_eq!(out.dts, 0);
        assert_eq!(out.pts, 0);

        let out = n.normalize(Some(503_000), Some(503_000), 3000);
        assert_eq!(out.dts, 3000);
    }

    #[test]
    fn test_strict_monotonicity_on_dirty_input() {
        let mut n = normalizer();
        let inputs = [0i64, 3000, 3000, 1500, 6000, 6000, 4000];
        let mut last = None;
        for dts in inputs {
            let out = n.normalize(Some(dts), Some(dts), 3000);
            if let Some(last) = last {
                assert!(out.dts > last, "dts {} not > {}", out.dts, last);
            }
            assert!(out.pts >= out.dts);
            last = Some(out.dts);
        }
    }

    #[test]
    fn test_pts_at_least_dts() {
        let mut n = normalizer();
        n.normalize(Some(1000), Some(1000), 3000);
        // pts behind dts after normalization gets clamped up
        let out = n.normalize(Some(1000), Some(4000), 3000);
        assert!(out.pts >= out.dts);
    }

    #[test]
    fn test_missing_stamps_fill_from_each_other() {
        let mut n = normalizer();
        let out = n.normalize(Some(9000), None, 3000);
        assert_eq!(out.dts, 0);
        assert_eq!(out.pts, 0);

        let out = n.normalize(None, Some(12_000), 3000);
        assert_eq!(out.dts, 3000);
        assert_eq!(out.pts, 3000);
    }

    #[test]
    fn test_unstamped_packets_pace_by_duration() {
        let mut n = normalizer();
        n.normalize(Some(0), Some(0), 3000);
        let out = n.normalize(None, None, 0); // nominal duration kicks in
        assert_eq!(out.dts, 3000);
        let out = n.normalize(None, None, 0);
        assert_eq!(out.dts, 6000);
    }

    #[test]
    fn test_discontinuity_rebases() {
        let mut n = normalizer();
        n.normalize(Some(0), Some(0), 3000);
        n.normalize(Some(3000), Some(3000), 3000);

        // 90 kHz: 2_000_000 ticks is ~22 s, far past the threshold
        let out = n.normalize(Some(2_000_000), Some(2_000_000), 3000);
        // Rebased: continues right after the previous output, no 22 s hole
        assert_eq!(out.dts, 3001);

        // The next ticks bump along until the new timeline passes the old
        let out = n.normalize(Some(2_003_000), Some(2_003_000), 3000);
        assert_eq!(out.dts, 3002);
        let out = n.normalize(Some(2_006_000), Some(2_006_000), 3000);
        assert_eq!(out.dts, 6000);
    }

    #[test]
    fn test_rescale_to_output_timebase() {
        let mut n = TrackNormalizer::new(TB, Timebase::MILLIS, 3000);
        n.normalize(Some(0), Some(0), 3000);
        let out = n.normalize(Some(9000), Some(9000), 3000);
        assert_eq!(out.dts, 100);
        assert_eq!(out.duration, 33);
    }

    #[test]
    fn test_reset() {
        let mut n = normalizer();
        n.normalize(Some(90_000), Some(90_000), 3000);
        n.reset();
        let out = n.normalize(Some(500_000), Some(500_000), 3000);
        assert_eq!(out.dts, 0);
    }
}
