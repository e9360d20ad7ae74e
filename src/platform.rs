//! Platform collaborator interfaces
//!
//! The base-station firmware owns link bring-up, the camera control channel
//! and storage mounting; the media core only asks questions and sends the
//! occasional control message through these traits. Implementations are
//! injected into the station as trait objects, never reached through
//! globals.

use crate::error::PlatformError;

/// Network/link readiness, polled by ingestion before connecting
pub trait LinkStatus: Send + Sync + 'static {
    /// Whether basic networking is up
    fn is_network_ready(&self) -> bool;

    /// Whether the camera-facing wireless link is associated
    fn is_link_ready(&self) -> bool;
}

/// Resolved control/data endpoint for one camera
#[derive(Debug, Clone)]
pub struct CameraEndpoint {
    /// Camera address on the local link
    pub address: String,
    /// RTSP username (empty = use the station default)
    pub username: String,
    /// RTSP password (empty = use the station default)
    pub password: String,
}

/// Control message sent to a camera unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CameraMessage {
    /// Ask the encoder for an immediate IDR frame
    RequestIframe,
}

/// Registry of paired cameras and their control channel
pub trait CameraDirectory: Send + Sync + 'static {
    /// Endpoint for a channel index, if a camera is registered there
    fn endpoint(&self, index: usize) -> Option<CameraEndpoint>;

    /// Deliver a control message to the camera at `index`
    fn send_message(
        &self,
        index: usize,
        message: CameraMessage,
        payload: &[u8],
    ) -> Result<(), PlatformError>;
}

/// Recording storage state
pub trait StorageStatus: Send + Sync + 'static {
    /// Whether the recording volume is mounted and writable
    fn is_ready(&self) -> bool;

    /// `(total, free)` bytes; diagnostic only
    fn capacity(&self) -> (u64, u64);
}
