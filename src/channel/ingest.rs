//! Channel ingestion loop
//!
//! One task per channel pulls frames from the camera's RTSP source and fans
//! them out into the record and relay queues. The loop is a small state
//! machine: connect (with retry/backoff), discover tracks, stream until a
//! read error, reconnect. A stop request is observed at every stage via the
//! running flag and the transport interrupt.
//!
//! Reconnects keep the timestamp line monotonic: a running watermark of the
//! highest corrected pts is kept across connections, and the first stamped
//! frame of a new connection fixes an additive offset that continues the
//! timeline one nominal frame interval past the watermark. Downstream
//! consumers never see time jump backwards.

use std::sync::Arc;

use crate::media::{avcc_first_sps, parse_dimensions, scan_for_keyframe};
use crate::platform::{CameraDirectory, LinkStatus};
use crate::queue::{PacketBuffer, StreamKind};
use crate::transport::{Interrupt, MediaConnector, MediaSource, TrackInfo};

use super::channel::ChannelShared;
use super::config::StationConfig;
use super::state::{ChannelPhase, StreamParams};

const LINK_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

pub(crate) async fn run_ingest<C: MediaConnector>(
    shared: Arc<ChannelShared>,
    interrupt: Interrupt,
    connector: Arc<C>,
    link: Arc<dyn LinkStatus>,
    directory: Arc<dyn CameraDirectory>,
    config: StationConfig,
) {
    let channel = shared.index;
    let mut first_connection = true;
    let mut last_valid_pts: i64 = 0;
    let mut pts_offset: i64 = 0;

    while shared.is_running() {
        shared.set_phase(ChannelPhase::Connecting);

        // The wireless link drops independently of the cameras; don't burn
        // connect timeouts while it is down.
        while shared.is_running() && !(link.is_network_ready() && link.is_link_ready()) {
            tokio::time::sleep(LINK_POLL_INTERVAL).await;
        }
        if !shared.is_running() {
            break;
        }

        tracing::info!(channel, url = %shared.url, "connecting");
        let mut source = match connector.connect(&shared.url, interrupt.clone()).await {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(
                    channel,
                    error = %e,
                    backoff_secs = config.connect_backoff.as_secs(),
                    "connect failed, retrying"
                );
                tokio::time::sleep(config.connect_backoff).await;
                continue;
            }
        };

        shared.set_phase(ChannelPhase::Discovery);
        let tracks = source.tracks().to_vec();
        let Some(video_track) = tracks.iter().position(|t| t.kind == StreamKind::Video) else {
            tracing::error!(channel, "no video track in source, retrying");
            drop(source);
            tokio::time::sleep(config.reconnect_backoff).await;
            continue;
        };
        let audio_track = tracks.iter().position(|t| t.kind == StreamKind::Audio);

        let mut video_info = tracks[video_track].clone();
        recover_dimensions(channel, &mut video_info);

        tracing::info!(
            channel,
            video_track,
            audio_track = ?audio_track,
            width = video_info.width,
            height = video_info.height,
            "streaming"
        );
        shared.publish_params(StreamParams {
            video: video_info,
            audio: audio_track.map(|i| tracks[i].clone()),
        });
        shared.set_phase(ChannelPhase::Streaming);

        // Shorten time-to-first-picture: don't wait out the GOP.
        if let Err(e) = directory.send_message(
            channel,
            crate::platform::CameraMessage::RequestIframe,
            &[],
        ) {
            tracing::debug!(channel, error = %e, "initial keyframe request not delivered");
        }

        if !first_connection {
            shared.counters.record_reconnect();
        }
        // Offset is fixed on the first stamped frame of this connection.
        let mut offset_pending = !first_connection;

        while shared.is_running() {
            let mut frame = match source.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(channel, error = %e, "stream read ended");
                    break;
                }
            };

            let kind = if frame.track == video_track {
                StreamKind::Video
            } else if Some(frame.track) == audio_track {
                StreamKind::Audio
            } else {
                continue;
            };

            if let Some(pts) = frame.pts {
                if offset_pending {
                    pts_offset = (last_valid_pts + config.reconnect_gap_ticks) - pts;
                    offset_pending = false;
                    tracing::info!(channel, pts_offset, "reconnect timestamp offset applied");
                }
                let corrected = pts + pts_offset;
                frame.pts = Some(corrected);
                frame.dts = frame.dts.map(|dts| dts + pts_offset);
                if corrected > last_valid_pts {
                    last_valid_pts = corrected;
                }
            }

            // Some camera firmware never sets the container keyframe flag;
            // the bitstream is the truth.
            if kind == StreamKind::Video && !frame.keyframe && scan_for_keyframe(&frame.data) {
                frame.keyframe = true;
            }
            let keyframe = kind == StreamKind::Video && frame.keyframe;

            shared.counters.record_frame(kind, frame.data.len(), keyframe);

            let packet = PacketBuffer {
                kind,
                data: frame.data,
                pts: frame.pts,
                dts: frame.dts,
                duration: frame.duration,
                keyframe,
            };

            // Recording is unconditional; relay respects the pause flag.
            // Both puts can only fail once the channel is stopping.
            let _ = shared.record_queue.put(packet.clone());
            if !shared.is_paused() {
                let _ = shared.relay_queue.put(packet);
            }
        }

        drop(source);
        first_connection = false;

        if !shared.is_running() {
            break;
        }
        shared.set_phase(ChannelPhase::Connecting);
        tokio::time::sleep(config.reconnect_backoff).await;
    }

    // Wake blocked consumers; they drain what is queued and exit.
    shared.record_queue.abort();
    shared.relay_queue.abort();
    tracing::info!(channel, "ingest exit");
}

/// Best-effort recovery when the container reported no dimensions: decode
/// them from the first SPS in the track extradata (AVCC or raw).
fn recover_dimensions(channel: usize, video: &mut TrackInfo) {
    if video.width > 0 && video.height > 0 {
        return;
    }
    let Some(extradata) = video.extradata.as_ref() else {
        return;
    };

    let parsed = avcc_first_sps(extradata)
        .and_then(|sps| parse_dimensions(sps).ok())
        .or_else(|| parse_dimensions(extradata).ok());

    if let Some((width, height)) = parsed {
        video.width = width;
        video.height = height;
        tracing::info!(channel, width, height, "dimensions recovered from in-band SPS");
    }
}
