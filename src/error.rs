//! Error types
//!
//! Each pipeline area has its own error enum; `Error` aggregates them at the
//! crate boundary. Transient conditions (connect failures, read EOF, segment
//! open failures) are handled internally with retry/backoff and never surface
//! through these types.

use std::fmt;

/// Crate-wide result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Bitstream parsing error
    Media(MediaError),
    /// Packet queue error
    Queue(QueueError),
    /// Transport (RTSP source) error
    Transport(TransportError),
    /// Segment muxer error
    Mux(MuxError),
    /// Relay delivery error
    Relay(RelayError),
    /// Camera registry / platform error
    Platform(PlatformError),
    /// Channel lifecycle error
    Channel(ChannelError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Media(e) => write!(f, "media: {}", e),
            Error::Queue(e) => write!(f, "queue: {}", e),
            Error::Transport(e) => write!(f, "transport: {}", e),
            Error::Mux(e) => write!(f, "mux: {}", e),
            Error::Relay(e) => write!(f, "relay: {}", e),
            Error::Platform(e) => write!(f, "platform: {}", e),
            Error::Channel(e) => write!(f, "channel: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Media(e) => Some(e),
            Error::Queue(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::Mux(e) => Some(e),
            Error::Relay(e) => Some(e),
            Error::Platform(e) => Some(e),
            Error::Channel(e) => Some(e),
        }
    }
}

macro_rules! impl_from {
    ($variant:ident, $inner:ty) => {
        impl From<$inner> for Error {
            fn from(e: $inner) -> Self {
                Error::$variant(e)
            }
        }
    };
}

impl_from!(Media, MediaError);
impl_from!(Queue, QueueError);
impl_from!(Transport, TransportError);
impl_from!(Mux, MuxError);
impl_from!(Relay, RelayError);
impl_from!(Platform, PlatformError);
impl_from!(Channel, ChannelError);

/// Bitstream parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaError {
    /// Buffer ended before the structure was complete
    Truncated,
    /// Input is not the expected NAL unit type
    NotSps,
    /// Decoded dimensions are outside the plausible range
    ImplausibleDimensions {
        /// Decoded width
        width: i64,
        /// Decoded height
        height: i64,
    },
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::Truncated => write!(f, "truncated bitstream"),
            MediaError::NotSps => write!(f, "not an SPS NAL unit"),
            MediaError::ImplausibleDimensions { width, height } => {
                write!(f, "implausible dimensions {}x{}", width, height)
            }
        }
    }
}

impl std::error::Error for MediaError {}

/// Packet queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was aborted; for `get` this also means it has been drained
    Aborted,
    /// The pool for this packet kind has zero capacity
    NoCapacity,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Aborted => write!(f, "queue aborted"),
            QueueError::NoCapacity => write!(f, "pool has no capacity"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Transport errors reported by a `MediaConnector` / `MediaSource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connect or read was interrupted by the channel stopping
    Cancelled,
    /// Connect attempt timed out
    Timeout,
    /// Connect failed
    Connect(String),
    /// The source reached end of stream
    EndOfStream,
    /// Read/protocol failure
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Cancelled => write!(f, "cancelled"),
            TransportError::Timeout => write!(f, "connect timed out"),
            TransportError::Connect(msg) => write!(f, "connect failed: {}", msg),
            TransportError::EndOfStream => write!(f, "end of stream"),
            TransportError::Io(msg) => write!(f, "read failed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Segment muxer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// Segment creation failed (storage unavailable, permission, ...)
    Open(String),
    /// Packet write failed
    Write(String),
    /// Trailer write / finalize failed
    Finalize(String),
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxError::Open(msg) => write!(f, "segment open failed: {}", msg),
            MuxError::Write(msg) => write!(f, "segment write failed: {}", msg),
            MuxError::Finalize(msg) => write!(f, "segment finalize failed: {}", msg),
        }
    }
}

impl std::error::Error for MuxError {}

/// Relay delivery errors reported by a `ViewerSink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Viewer send buffer is full; the frame is skipped, the viewer kept
    Busy,
    /// Viewer session is gone; the viewer is revoked
    Disconnected,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Busy => write!(f, "viewer send buffer full"),
            RelayError::Disconnected => write!(f, "viewer disconnected"),
        }
    }
}

impl std::error::Error for RelayError {}

/// Camera registry / platform errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// No control connection to the camera at this index
    NotConnected(usize),
    /// Message delivery failed
    SendFailed(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::NotConnected(index) => {
                write!(f, "camera {} not connected", index)
            }
            PlatformError::SendFailed(msg) => write!(f, "message send failed: {}", msg),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Channel lifecycle errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Index outside `0..max_channels`
    InvalidIndex(usize),
    /// Operation requires a started channel
    NotRunning(usize),
    /// The camera registry has no endpoint for this index
    MissingEndpoint(usize),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::InvalidIndex(index) => write!(f, "invalid channel index {}", index),
            ChannelError::NotRunning(index) => write!(f, "channel {} is not running", index),
            ChannelError::MissingEndpoint(index) => {
                write!(f, "no registered camera for channel {}", index)
            }
        }
    }
}

impl std::error::Error for ChannelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let e = Error::from(QueueError::Aborted);
        assert_eq!(e.to_string(), "queue: queue aborted");

        let e = Error::from(MediaError::ImplausibleDimensions {
            width: -16,
            height: 99999,
        });
        assert_eq!(e.to_string(), "media: implausible dimensions -16x99999");

        let e = Error::from(TransportError::Connect("refused".into()));
        assert_eq!(e.to_string(), "transport: connect failed: refused");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let e = Error::from(MuxError::Open("no space".into()));
        assert!(e.source().is_some());
        assert_eq!(e.source().unwrap().to_string(), "segment open failed: no space");
    }

    #[test]
    fn test_channel_error_display() {
        assert_eq!(
            ChannelError::InvalidIndex(7).to_string(),
            "invalid channel index 7"
        );
        assert_eq!(
            ChannelError::NotRunning(2).to_string(),
            "channel 2 is not running"
        );
    }
}
