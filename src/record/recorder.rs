//! Per-channel recorder task
//!
//! Consumes the record queue and writes timed MP4 segments through the
//! external muxer. The loop has two modes: while no segment is open, every
//! packet lands in the pre-keyframe buffer and the open preconditions are
//! re-evaluated (dimensions, parameter sets, audio config, a buffered
//! keyframe, storage, I/O cooldown); once open, packets are normalized and
//! passed straight through. Segments close on the slice boundary, but only
//! at a video keyframe: a GOP is never split across files.
//!
//! Storage faults are retriable with a cooldown; past the failure ceiling,
//! recording is disabled for this channel alone and the relay path is
//! untouched.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::channel::channel::ChannelShared;
use crate::channel::config::StationConfig;
use crate::channel::state::StreamParams;
use crate::media::{adts_payload, asc_from_adts, parse_dimensions, scan_for_keyframe};
use crate::media::{ParameterSets, DEFAULT_AAC_ASC};
use crate::platform::StorageStatus;
use crate::queue::{PacketBuffer, StreamKind};
use crate::transport::{Timebase, TrackInfo};

use super::prebuffer::PreBuffer;
use super::segment::{segment_path, AudioParams, MuxPacket, SegmentMuxer, SegmentWriter, VideoParams};
use super::timestamp::TrackNormalizer;

const PARAMS_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);
const FALLBACK_FRAME_INTERVAL_MS: i64 = 40;

struct RecordSession<W: SegmentWriter> {
    writer: W,
    opened_at: Instant,
    video_norm: TrackNormalizer,
    audio_norm: Option<TrackNormalizer>,
}

pub(crate) async fn run_recorder<M: SegmentMuxer>(
    shared: Arc<ChannelShared>,
    muxer: Arc<M>,
    storage: Arc<dyn StorageStatus>,
    config: StationConfig,
) {
    let channel = shared.index;

    // Hold off until stream discovery published parameters and the
    // recording volume is usable. A stop during the wait exits cleanly.
    let params_rx = shared.params_rx();
    let params: StreamParams = loop {
        if !shared.is_running() {
            tracing::debug!(channel, "recorder exit before stream discovery");
            return;
        }
        let snapshot = params_rx.borrow().clone();
        if let Some(params) = snapshot {
            if storage.is_ready() {
                break params;
            }
        }
        tokio::time::sleep(PARAMS_POLL_INTERVAL).await;
    };

    let video = params.video;
    let audio = params.audio;
    let (total, free) = storage.capacity();
    tracing::info!(
        channel,
        width = video.width,
        height = video.height,
        has_audio = audio.is_some(),
        storage_free = free,
        storage_total = total,
        "recorder ready"
    );

    let mut width = video.width;
    let mut height = video.height;
    let cached_extradata = video.extradata.clone();
    let mut param_sets = ParameterSets::default();

    // Audio config: container extradata when it is a raw 2-byte ASC,
    // otherwise captured from in-band ADTS headers later.
    let mut asc: Option<[u8; 2]> = audio
        .as_ref()
        .and_then(|a| a.extradata.as_ref())
        .filter(|e| e.len() == 2)
        .map(|e| [e[0], e[1]]);

    let mut prebuf = PreBuffer::new(config.prebuffer_max_packets, config.prebuffer_max_bytes);
    let mut session: Option<RecordSession<M::Writer>> = None;
    let mut seg_no: u32 = 1;
    let mut last_io_error: Option<Instant> = None;
    let mut open_failures: u32 = 0;
    let mut audio_wait: u32 = 0;
    let mut disabled = false;

    loop {
        let mut packet = match shared.record_queue.get().await {
            Ok(packet) => packet,
            // Aborted and drained: the channel is stopping
            Err(_) => break,
        };

        if disabled {
            continue;
        }

        match packet.kind {
            StreamKind::Video => {
                param_sets.collect(&packet.data);
                if !packet.keyframe && scan_for_keyframe(&packet.data) {
                    packet.keyframe = true;
                }
            }
            StreamKind::Audio => {
                if asc.is_none() {
                    if let Some(captured) = asc_from_adts(&packet.data) {
                        tracing::info!(
                            channel,
                            asc = ?captured,
                            "audio config captured from ADTS"
                        );
                        asc = Some(captured);
                    }
                }
            }
        }

        // Slice boundary: close only at a keyframe so the next segment
        // starts decodable, and seed the next pre-buffer with it.
        let slice_due = session.as_ref().is_some_and(|open| {
            packet.kind == StreamKind::Video
                && packet.keyframe
                && open.opened_at.elapsed() >= config.slice_duration
        });
        if slice_due {
            let open = session.take().expect("session is open");
            finish_session(open, channel).await;
            prebuf.clear();
            prebuf.push(packet);
            audio_wait = 0;
            continue;
        }

        if session.is_none() {
            prebuf.push(packet);

            if let Some(when) = last_io_error {
                if when.elapsed() < config.io_error_cooldown {
                    continue;
                }
            }

            // Dimensions may only become known once an in-band SPS shows up
            if (width == 0 || height == 0) && param_sets.sps.is_some() {
                if let Some(sps) = &param_sets.sps {
                    if let Ok((w, h)) = parse_dimensions(sps) {
                        width = w;
                        height = h;
                        tracing::info!(channel, width, height, "dimensions parsed from collected SPS");
                    }
                }
            }

            if audio.is_some() && asc.is_none() {
                if audio_wait < config.audio_config_wait_packets && !prebuf.nearly_full() {
                    audio_wait += 1;
                    continue;
                }
                // Degraded mode: better a conservative guess than no audio
                // track and no recording at all.
                tracing::warn!(
                    channel,
                    "no in-band audio config seen, falling back to AAC-LC 16 kHz mono"
                );
                asc = Some(DEFAULT_AAC_ASC);
            }

            let have_parameter_sets = param_sets.is_complete() || cached_extradata.is_some();
            let Some(keyframe_offset) = prebuf.find_first_keyframe() else {
                continue;
            };
            if width == 0 || height == 0 || !have_parameter_sets || !storage.is_ready() {
                continue;
            }

            let path = segment_path(&config.record_dir, channel, seg_no);
            if let Some(parent) = path.parent() {
                // Failure surfaces as an open error below
                let _ = tokio::fs::create_dir_all(parent).await;
            }

            let extradata = cached_extradata
                .clone()
                .or_else(|| param_sets.extradata())
                .unwrap_or_else(Bytes::new);
            let video_params = VideoParams {
                width,
                height,
                timebase: video.timebase,
                extradata,
            };
            let audio_params = audio.as_ref().map(|a| AudioParams {
                timebase: a.timebase,
                sample_rate: if a.sample_rate > 0 { a.sample_rate } else { 16_000 },
                channels: if a.channels > 0 { a.channels } else { 1 },
                asc: asc.unwrap_or(DEFAULT_AAC_ASC),
            });

            match muxer.open(&path, &video_params, audio_params.as_ref()).await {
                Ok(writer) => {
                    open_failures = 0;
                    last_io_error = None;
                    seg_no += 1;
                    shared.counters.record_segment();
                    tracing::info!(
                        channel,
                        path = %path.display(),
                        buffered = prebuf.len(),
                        buffered_bytes = prebuf.bytes(),
                        "segment opened"
                    );

                    let mut open = new_session(writer, &video, audio.as_ref());

                    // Replay the buffered GOP from its keyframe
                    let replay: Vec<PacketBuffer> =
                        prebuf.iter().skip(keyframe_offset).cloned().collect();
                    prebuf.clear();
                    let mut write_failed = false;
                    for buffered in replay {
                        if let Err(e) = write_packet(&mut open, buffered).await {
                            tracing::warn!(channel, error = %e, "pre-buffer replay failed");
                            write_failed = true;
                            break;
                        }
                    }
                    if write_failed {
                        let _ = open.writer.finish().await;
                        last_io_error = Some(Instant::now());
                    } else {
                        session = Some(open);
                    }
                }
                Err(e) => {
                    open_failures += 1;
                    last_io_error = Some(Instant::now());
                    tracing::warn!(
                        channel,
                        error = %e,
                        failures = open_failures,
                        cooldown_ms = config.io_error_cooldown.as_millis() as u64,
                        "segment open failed"
                    );
                    if open_failures >= config.max_open_failures {
                        tracing::error!(
                            channel,
                            failures = open_failures,
                            "segment open failure ceiling reached, recording disabled for this channel"
                        );
                        disabled = true;
                        prebuf.clear();
                    }
                }
            }
            continue;
        }

        // Live passthrough
        let write_result = {
            let open = session.as_mut().expect("session is open");
            write_packet(open, packet).await
        };
        if let Err(e) = write_result {
            tracing::warn!(channel, error = %e, "segment write failed, closing segment");
            let open = session.take().expect("session is open");
            let _ = open.writer.finish().await;
            last_io_error = Some(Instant::now());
        }
    }

    if let Some(open) = session.take() {
        finish_session(open, channel).await;
    }
    tracing::info!(channel, "recorder exit");
}

fn new_session<W: SegmentWriter>(
    writer: W,
    video: &TrackInfo,
    audio: Option<&TrackInfo>,
) -> RecordSession<W> {
    let video_nominal = nominal_duration(video.timebase, video.frame_rate);
    let video_norm = TrackNormalizer::new(video.timebase, writer.video_timebase(), video_nominal);
    let audio_norm = audio.map(|a| {
        TrackNormalizer::new(
            a.timebase,
            writer.audio_timebase(),
            nominal_duration(a.timebase, 0.0),
        )
    });

    RecordSession {
        writer,
        opened_at: Instant::now(),
        video_norm,
        audio_norm,
    }
}

/// One nominal frame interval in source ticks
fn nominal_duration(timebase: Timebase, frame_rate: f64) -> i64 {
    let millis = if frame_rate > 0.0 {
        (1000.0 / frame_rate).round() as i64
    } else {
        FALLBACK_FRAME_INTERVAL_MS
    };
    Timebase::MILLIS.rescale(millis.max(1), timebase)
}

async fn write_packet<W: SegmentWriter>(
    session: &mut RecordSession<W>,
    packet: PacketBuffer,
) -> Result<(), crate::error::MuxError> {
    match packet.kind {
        StreamKind::Video => {
            let ts = session
                .video_norm
                .normalize(packet.pts, packet.dts, packet.duration);
            session
                .writer
                .write_video(MuxPacket {
                    pts: ts.pts,
                    dts: ts.dts,
                    duration: ts.duration,
                    keyframe: packet.keyframe,
                    data: packet.data,
                })
                .await
        }
        StreamKind::Audio => {
            // Segment has no audio track: drop silently
            let Some(norm) = session.audio_norm.as_mut() else {
                return Ok(());
            };
            // The container wants raw access units, not ADTS frames
            let payload = packet.data.slice_ref(adts_payload(&packet.data));
            let ts = norm.normalize(packet.pts, packet.dts, packet.duration);
            session
                .writer
                .write_audio(MuxPacket {
                    pts: ts.pts,
                    dts: ts.dts,
                    duration: ts.duration,
                    keyframe: false,
                    data: payload,
                })
                .await
        }
    }
}

async fn finish_session<W: SegmentWriter>(session: RecordSession<W>, channel: usize) {
    let elapsed = session.opened_at.elapsed();
    match session.writer.finish().await {
        Ok(()) => tracing::info!(channel, secs = elapsed.as_secs(), "segment closed"),
        Err(e) => tracing::warn!(channel, error = %e, "segment finalize failed"),
    }
}
