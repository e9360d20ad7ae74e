//! Channel state types

use crate::transport::TrackInfo;

/// Lifecycle phase of a channel's ingestion loop
///
/// `Connecting -> Discovery -> Streaming` on the happy path; read errors
/// drop back to `Connecting` and a stop request lands in `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// Torn down; no tasks hold the channel
    Stopped,
    /// Opening the transport, with retry/backoff
    Connecting,
    /// Probing the container for tracks
    Discovery,
    /// Reading frames
    Streaming,
}

/// Stream parameters published after discovery
///
/// The recorder snapshots these before writing anything; they are refreshed
/// on every reconnect.
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// The selected video track
    pub video: TrackInfo,
    /// The selected audio track, if the source has one
    pub audio: Option<TrackInfo>,
}
