//! Media transport contract
//!
//! The RTSP/container library is an external collaborator; the pipeline only
//! depends on these traits. A connector opens a source for a channel URL,
//! the source exposes its tracks and yields demuxed frames. Connect and read
//! honor an [`Interrupt`] so a channel stop cancels a blocked call promptly
//! instead of riding out the transport's own timeout.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::TransportError;
use crate::queue::StreamKind;

/// Rational timebase: timestamps count in units of `num/den` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    /// Numerator
    pub num: u32,
    /// Denominator
    pub den: u32,
}

impl Timebase {
    /// Milliseconds
    pub const MILLIS: Timebase = Timebase { num: 1, den: 1000 };
    /// The 90 kHz RTP video clock
    pub const RTP_VIDEO: Timebase = Timebase { num: 1, den: 90_000 };

    /// Create a timebase
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Rescale `value` from `self` into `dst`, rounding half away from zero.
    ///
    /// Intermediate math is 128-bit so large 90 kHz timestamps cannot
    /// overflow.
    pub fn rescale(self, value: i64, dst: Timebase) -> i64 {
        let num = value as i128 * self.num as i128 * dst.den as i128;
        let den = self.den as i128 * dst.num as i128;
        if den == 0 {
            return value;
        }
        let rounded = if num >= 0 {
            (num + den / 2) / den
        } else {
            (num - den / 2) / den
        };
        rounded as i64
    }
}

/// Cooperative cancellation flag passed into blocking transport calls
///
/// The transport is expected to poll this during connect and read and bail
/// out with [`TransportError::Cancelled`] once it is set.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Create an unset interrupt
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// One track discovered in a source
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Stream kind
    pub kind: StreamKind,
    /// Timestamp timebase for this track
    pub timebase: Timebase,
    /// Video width in pixels (0 = unknown)
    pub width: u32,
    /// Video height in pixels (0 = unknown)
    pub height: u32,
    /// Nominal frame rate in frames per second (0.0 = unknown)
    pub frame_rate: f64,
    /// Codec extradata (AVCC record or raw ASC), if the source had any
    pub extradata: Option<Bytes>,
    /// Audio sample rate in Hz (0 = unknown)
    pub sample_rate: u32,
    /// Audio channel count (0 = unknown)
    pub channels: u8,
}

impl TrackInfo {
    /// A video track with the given timebase and no known parameters
    pub fn video(timebase: Timebase) -> Self {
        Self {
            kind: StreamKind::Video,
            timebase,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            extradata: None,
            sample_rate: 0,
            channels: 0,
        }
    }

    /// An audio track with the given timebase and no known parameters
    pub fn audio(timebase: Timebase) -> Self {
        Self {
            kind: StreamKind::Audio,
            timebase,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            extradata: None,
            sample_rate: 0,
            channels: 0,
        }
    }
}

/// One demuxed frame read from a source
#[derive(Debug, Clone)]
pub struct SourceFrame {
    /// Index into the source's track list
    pub track: usize,
    /// Encoded payload
    pub data: Bytes,
    /// Presentation timestamp in the track timebase
    pub pts: Option<i64>,
    /// Decode timestamp in the track timebase
    pub dts: Option<i64>,
    /// Frame duration in the track timebase (0 = unknown)
    pub duration: i64,
    /// Keyframe flag as reported by the container (may under-report)
    pub keyframe: bool,
}

/// An open media source for one channel
pub trait MediaSource: Send {
    /// Tracks discovered during stream probing
    fn tracks(&self) -> &[TrackInfo];

    /// Read the next demuxed frame.
    ///
    /// `Err(EndOfStream)` and I/O errors are retriable: the channel tears
    /// the source down and reconnects.
    fn read_frame(&mut self) -> impl Future<Output = Result<SourceFrame, TransportError>> + Send;
}

/// Factory opening media sources; the external RTSP client boundary
pub trait MediaConnector: Send + Sync + 'static {
    /// Source type produced by this connector
    type Source: MediaSource + 'static;

    /// Open `url` with a bounded timeout, polling `interrupt` so an
    /// in-progress attempt aborts promptly on channel stop.
    fn connect(
        &self,
        url: &str,
        interrupt: Interrupt,
    ) -> impl Future<Output = Result<Self::Source, TransportError>> + Send;
}
