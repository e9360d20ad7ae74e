//! Segment muxer contract
//!
//! Writing MP4 boxes is the A/V container library's business; the recorder
//! only depends on these traits. A muxer opens a segment file with the
//! track parameters, the writer takes normalized packets and is finalized on
//! the slice boundary.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::MuxError;
use crate::transport::Timebase;

/// Video track parameters for a new segment
#[derive(Debug, Clone)]
pub struct VideoParams {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timebase the recorder declares for incoming video packets
    pub timebase: Timebase,
    /// Codec extradata: cached container extradata, or collected SPS+PPS
    pub extradata: Bytes,
}

/// Audio track parameters for a new segment
#[derive(Debug, Clone)]
pub struct AudioParams {
    /// Timebase the recorder declares for incoming audio packets
    pub timebase: Timebase,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u8,
    /// AudioSpecificConfig
    pub asc: [u8; 2],
}

/// One packet handed to the segment writer, timestamps already normalized
/// into the writer's track timebase
#[derive(Debug, Clone)]
pub struct MuxPacket {
    /// Presentation timestamp
    pub pts: i64,
    /// Decode timestamp
    pub dts: i64,
    /// Duration
    pub duration: i64,
    /// Video keyframe flag
    pub keyframe: bool,
    /// Payload (Annex-B video, raw AAC access unit)
    pub data: Bytes,
}

/// An open segment file
pub trait SegmentWriter: Send {
    /// Timebase video packets must be normalized into
    fn video_timebase(&self) -> Timebase;

    /// Timebase audio packets must be normalized into
    fn audio_timebase(&self) -> Timebase;

    /// Append a video packet
    fn write_video(&mut self, packet: MuxPacket)
        -> impl Future<Output = Result<(), MuxError>> + Send;

    /// Append an audio packet
    fn write_audio(&mut self, packet: MuxPacket)
        -> impl Future<Output = Result<(), MuxError>> + Send;

    /// Write the trailer and close the file
    fn finish(self) -> impl Future<Output = Result<(), MuxError>> + Send
    where
        Self: Sized;
}

/// Factory creating segment files; the external container library boundary
pub trait SegmentMuxer: Send + Sync + 'static {
    /// Writer type produced by this muxer
    type Writer: SegmentWriter + 'static;

    /// Create and initialize a segment at `path`
    fn open(
        &self,
        path: &Path,
        video: &VideoParams,
        audio: Option<&AudioParams>,
    ) -> impl Future<Output = Result<Self::Writer, MuxError>> + Send;
}

/// Build the segment path: `<root>/CAM<index>/<unix secs>_seg<NNNN>.mp4`
pub(crate) fn segment_path(root: &Path, channel: usize, seg_no: u32) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    root.join(format!("CAM{}", channel))
        .join(format!("{}_seg{:04}.mp4", stamp, seg_no))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_path_layout() {
        let path = segment_path(Path::new("/tmp/rec"), 2, 7);
        let s = path.to_string_lossy();
        assert!(s.starts_with("/tmp/rec/CAM2/"));
        assert!(s.ends_with("_seg0007.mp4"));
    }

    #[test]
    fn test_segment_numbers_pad() {
        let path = segment_path(Path::new("."), 0, 123);
        assert!(path.to_string_lossy().ends_with("_seg0123.mp4"));
    }
}
