//! Relay sender
//!
//! Drains each channel's low-latency relay queue and forwards frames to the
//! registered viewers (P2P sessions or an RTSP republisher). Recording
//! concerns never touch this path: the relay queue is an independent copy of
//! the fan-out, so a slow viewer cannot stall the recorder and vice versa.
//!
//! Delivery starts at a keyframe: after a channel (re)connects, video is
//! dropped until the first keyframe and audio is dropped until video has
//! started, so every viewer decode begins clean.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::channel::ChannelShared;
use crate::channel::state::ChannelPhase;
use crate::error::RelayError;
use crate::queue::{PacketBuffer, StreamKind};

/// Destination for relayed frames; the P2P/RTSP-out boundary
///
/// `send_frame` is expected to be quick (hand off to the transport's own
/// buffer); [`RelayError::Busy`] skips the frame, anything fatal revokes the
/// viewer.
pub trait ViewerSink: Send + Sync + 'static {
    /// Forward one frame to this viewer
    fn send_frame(&self, packet: &PacketBuffer) -> Result<(), RelayError>;
}

/// Registered viewers of one channel
#[derive(Default)]
pub(crate) struct ViewerTable {
    next_id: AtomicU64,
    viewers: Mutex<Vec<(u64, Arc<dyn ViewerSink>)>>,
}

impl ViewerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a viewer; returns its revocation handle
    pub fn add(&self, sink: Arc<dyn ViewerSink>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.viewers.lock().unwrap().push((id, sink));
        id
    }

    /// Remove a viewer; true if it was registered
    pub fn remove(&self, id: u64) -> bool {
        let mut viewers = self.viewers.lock().unwrap();
        let before = viewers.len();
        viewers.retain(|(vid, _)| *vid != id);
        viewers.len() != before
    }

    pub fn len(&self) -> usize {
        self.viewers.lock().unwrap().len()
    }

    fn snapshot(&self) -> Vec<(u64, Arc<dyn ViewerSink>)> {
        self.viewers.lock().unwrap().clone()
    }
}

pub(crate) async fn run_relay(shared: Arc<ChannelShared>, viewers: Arc<ViewerTable>) {
    let channel = shared.index;
    let mut phase_rx = shared.phase_rx();
    let mut have_keyframe = false;

    loop {
        tokio::select! {
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // Back to the keyframe gate across reconnects
                if *phase_rx.borrow() != ChannelPhase::Streaming {
                    have_keyframe = false;
                }
            }
            result = shared.relay_queue.get() => {
                let packet = match result {
                    Ok(packet) => packet,
                    // Aborted and drained: the channel is stopping
                    Err(_) => break,
                };

                if !have_keyframe {
                    if packet.kind == StreamKind::Video && packet.keyframe {
                        have_keyframe = true;
                        tracing::debug!(channel, "relay starting at keyframe");
                    } else {
                        continue;
                    }
                }

                deliver(channel, &shared, &viewers, &packet);
            }
        }
    }

    tracing::info!(channel, "relay sender exit");
}

fn deliver(
    channel: usize,
    shared: &ChannelShared,
    viewers: &ViewerTable,
    packet: &PacketBuffer,
) {
    for (id, sink) in viewers.snapshot() {
        match sink.send_frame(packet) {
            Ok(()) => {}
            Err(RelayError::Busy) => {
                tracing::debug!(channel, viewer = id, "viewer busy, frame skipped");
            }
            Err(RelayError::Disconnected) => {
                if viewers.remove(id) {
                    shared.counters.record_viewer_revoked();
                    tracing::info!(channel, viewer = id, "viewer revoked");
                }
            }
        }
    }
}
