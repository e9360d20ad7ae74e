//! # camstation
//!
//! Media distribution core for an embedded multi-camera base station: pulls
//! H.264/AAC feeds from camera units over a constrained wireless link,
//! relays them to live viewers, and records them to timed MP4 segments,
//! with strictly bounded memory and per-channel fault isolation.
//!
//! # Architecture
//!
//! ```text
//!                 Station (channel_start/stop, set_pause, set_focus, ...)
//!                     │
//!        ┌────────────┴─ per channel ───────────────────────────────┐
//!        │                                                          │
//!   [Ingest task] ── RTSP source ── keyframe re-scan ── pts offset  │
//!        │                                                          │
//!        ├──► Record PacketQueue ──► [Recorder task] ──► MP4 segments
//!        │        (200v/250a)          prebuffer, ts normalize,     │
//!        │                             keyframe-aligned slicing     │
//!        └──► Relay PacketQueue  ──► [Relay task] ──► ViewerSinks   │
//!                 (60v/80a)            keyframe gate, revocation    │
//!                                                                   │
//!   [Flow controller] ── pause/resume/request-iframe ───────────────┘
//!        round-robin or viewer focus
//! ```
//!
//! # Bounded memory
//!
//! Every queue is a fixed pool with per-kind capacities; overflow drops the
//! oldest packet of the same kind instead of growing. Fan-out shares
//! payloads through `bytes::Bytes` reference counting, so the record and
//! relay copies of a frame cost one allocation.
//!
//! # External collaborators
//!
//! The RTSP transport ([`transport::MediaConnector`]), the MP4 muxer
//! ([`record::SegmentMuxer`]), the camera registry, link state and storage
//! state ([`platform`]) are all injected traits; this crate contains no I/O
//! of its own beyond segment directory creation.

pub mod channel;
pub mod error;
pub mod flow;
pub mod media;
pub mod platform;
pub mod queue;
pub mod record;
pub mod relay;
pub mod station;
pub mod stats;
pub mod transport;

pub use channel::{ChannelPhase, StationConfig, StreamParams};
pub use error::{Error, Result};
pub use flow::{Focus, FocusState, FlowPolicy};
pub use platform::{CameraDirectory, CameraEndpoint, CameraMessage, LinkStatus, StorageStatus};
pub use queue::{PacketBuffer, PacketQueue, QueueStats, StreamKind};
pub use record::{AudioParams, MuxPacket, SegmentMuxer, SegmentWriter, VideoParams};
pub use relay::ViewerSink;
pub use station::Station;
pub use stats::ChannelStats;
pub use transport::{Interrupt, MediaConnector, MediaSource, SourceFrame, Timebase, TrackInfo};
