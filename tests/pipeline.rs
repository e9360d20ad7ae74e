//! End-to-end pipeline tests
//!
//! A scripted connector stands in for the RTSP transport and a mock muxer
//! for the MP4 container library; everything between them (ingestion,
//! queues, recorder, relay, flow control) is the real pipeline.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use tokio_test::assert_ok;

use camstation::error::{MuxError, PlatformError, RelayError, TransportError};
use camstation::{
    AudioParams, CameraDirectory, CameraEndpoint, CameraMessage, Focus, FlowPolicy, Interrupt,
    LinkStatus, MediaConnector, MediaSource, MuxPacket, PacketBuffer, SegmentMuxer, SegmentWriter,
    SourceFrame, Station, StationConfig, StorageStatus, Timebase, TrackInfo, VideoParams,
    ViewerSink,
};

const VIDEO_TB: Timebase = Timebase::RTP_VIDEO;
const AUDIO_TB: Timebase = Timebase::new(1, 16_000);
const FRAME_TICKS: i64 = 3000; // one frame at 30 fps on the 90 kHz clock

// ---------------------------------------------------------------------------
// Platform fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TestPlatform {
    iframe_requests: AtomicU64,
}

impl LinkStatus for TestPlatform {
    fn is_network_ready(&self) -> bool {
        true
    }
    fn is_link_ready(&self) -> bool {
        true
    }
}

impl StorageStatus for TestPlatform {
    fn is_ready(&self) -> bool {
        true
    }
    fn capacity(&self) -> (u64, u64) {
        (32 << 30, 16 << 30)
    }
}

impl CameraDirectory for TestPlatform {
    fn endpoint(&self, index: usize) -> Option<CameraEndpoint> {
        Some(CameraEndpoint {
            address: format!("192.168.100.{}", 10 + index),
            username: String::new(),
            password: String::new(),
        })
    }

    fn send_message(
        &self,
        _index: usize,
        message: CameraMessage,
        _payload: &[u8],
    ) -> Result<(), PlatformError> {
        if message == CameraMessage::RequestIframe {
            self.iframe_requests.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

struct ScriptedConnector {
    tracks: Vec<TrackInfo>,
    sessions: Mutex<VecDeque<Vec<SourceFrame>>>,
}

impl ScriptedConnector {
    fn new(tracks: Vec<TrackInfo>, sessions: Vec<Vec<SourceFrame>>) -> Self {
        Self {
            tracks,
            sessions: Mutex::new(sessions.into()),
        }
    }

    /// A connector whose connect call blocks until the channel stops
    fn parked(tracks: Vec<TrackInfo>) -> Self {
        Self::new(tracks, Vec::new())
    }
}

impl MediaConnector for ScriptedConnector {
    type Source = ScriptedSource;

    async fn connect(
        &self,
        _url: &str,
        interrupt: Interrupt,
    ) -> Result<ScriptedSource, TransportError> {
        let frames = self.sessions.lock().unwrap().pop_front();
        match frames {
            Some(frames) => Ok(ScriptedSource {
                tracks: self.tracks.clone(),
                frames: frames.into(),
                interrupt,
            }),
            None => {
                // Script exhausted: behave like an unreachable camera
                loop {
                    if interrupt.is_set() {
                        return Err(TransportError::Cancelled);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }
    }
}

struct ScriptedSource {
    tracks: Vec<TrackInfo>,
    frames: VecDeque<SourceFrame>,
    interrupt: Interrupt,
}

impl MediaSource for ScriptedSource {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    async fn read_frame(&mut self) -> Result<SourceFrame, TransportError> {
        if self.interrupt.is_set() {
            return Err(TransportError::Cancelled);
        }
        match self.frames.pop_front() {
            Some(frame) => {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(frame)
            }
            None => Err(TransportError::EndOfStream),
        }
    }
}

// An IDR slice and a P slice, as the bitstream scanner sees them
const IDR_FRAME: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, 0x02];
const P_FRAME: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x41, 0xE0, 0x20, 0x00, 0x01];

fn video_frame(n: i64, keyframe: bool) -> SourceFrame {
    SourceFrame {
        track: 0,
        data: Bytes::from_static(if keyframe { IDR_FRAME } else { P_FRAME }),
        pts: Some(n * FRAME_TICKS),
        dts: Some(n * FRAME_TICKS),
        duration: FRAME_TICKS,
        // Deliberately unset: the container under-reports and the
        // ingestion bitstream scan must recover it
        keyframe: false,
    }
}

fn audio_frame(n: i64) -> SourceFrame {
    SourceFrame {
        track: 1,
        data: Bytes::from_static(&[0x21, 0x10, 0x04, 0x60, 0x8C, 0x1C]),
        pts: Some(n * 1024),
        dts: Some(n * 1024),
        duration: 1024,
        keyframe: false,
    }
}

fn video_audio_tracks() -> Vec<TrackInfo> {
    let mut video = TrackInfo::video(VIDEO_TB);
    video.width = 1920;
    video.height = 1080;
    video.frame_rate = 30.0;
    // AVCC record: presence satisfies the recorder's parameter-set gate
    video.extradata = Some(Bytes::from_static(&[
        0x01, 0x42, 0x00, 0x28, 0xFF, 0xE1, 0x00, 0x0A, 0x67, 0x42, 0x00, 0x28, 0xDA, 0x01,
        0xE0, 0x08, 0x9F, 0x95, 0x01, 0x00, 0x03, 0x68, 0xCE, 0x38,
    ]));

    let mut audio = TrackInfo::audio(AUDIO_TB);
    audio.sample_rate = 16_000;
    audio.channels = 1;
    audio.extradata = Some(Bytes::from_static(&[0x14, 0x08]));

    vec![video, audio]
}

fn video_only_tracks() -> Vec<TrackInfo> {
    let mut video = TrackInfo::video(VIDEO_TB);
    video.width = 1280;
    video.height = 720;
    video.frame_rate = 30.0;
    video.extradata = Some(Bytes::from_static(&[
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x28, 0xDA, 0x01, 0xE0, 0x08, 0x9F, 0x95,
        0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x38,
    ]));
    vec![video]
}

// ---------------------------------------------------------------------------
// Mock muxer
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct MuxLog {
    opens: Arc<Mutex<Vec<(PathBuf, VideoParams, Option<AudioParams>)>>>,
    open_attempts: Arc<AtomicU64>,
    video_writes: Arc<Mutex<Vec<MuxPacket>>>,
    audio_writes: Arc<Mutex<Vec<MuxPacket>>>,
    finishes: Arc<AtomicU64>,
}

impl MuxLog {
    fn opens(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    fn video_count(&self) -> usize {
        self.video_writes.lock().unwrap().len()
    }

    fn audio_count(&self) -> usize {
        self.audio_writes.lock().unwrap().len()
    }
}

struct MockMuxer {
    log: MuxLog,
    fail_opens: bool,
}

impl MockMuxer {
    fn new(log: MuxLog) -> Self {
        Self {
            log,
            fail_opens: false,
        }
    }

    fn failing(log: MuxLog) -> Self {
        Self {
            log,
            fail_opens: true,
        }
    }
}

impl SegmentMuxer for MockMuxer {
    type Writer = MockWriter;

    async fn open(
        &self,
        path: &Path,
        video: &VideoParams,
        audio: Option<&AudioParams>,
    ) -> Result<MockWriter, MuxError> {
        self.log.open_attempts.fetch_add(1, Ordering::Relaxed);
        if self.fail_opens {
            return Err(MuxError::Open("scripted storage fault".into()));
        }
        self.log
            .opens
            .lock()
            .unwrap()
            .push((path.to_path_buf(), video.clone(), audio.cloned()));
        Ok(MockWriter {
            log: self.log.clone(),
        })
    }
}

struct MockWriter {
    log: MuxLog,
}

impl SegmentWriter for MockWriter {
    fn video_timebase(&self) -> Timebase {
        VIDEO_TB
    }

    fn audio_timebase(&self) -> Timebase {
        AUDIO_TB
    }

    async fn write_video(&mut self, packet: MuxPacket) -> Result<(), MuxError> {
        self.log.video_writes.lock().unwrap().push(packet);
        Ok(())
    }

    async fn write_audio(&mut self, packet: MuxPacket) -> Result<(), MuxError> {
        self.log.audio_writes.lock().unwrap().push(packet);
        Ok(())
    }

    async fn finish(self) -> Result<(), MuxError> {
        self.log.finishes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Viewer fake
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingViewer {
    received: AtomicU64,
}

impl ViewerSink for CountingViewer {
    fn send_frame(&self, packet: &PacketBuffer) -> Result<(), RelayError> {
        assert!(!packet.is_empty());
        self.received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static TEST_SEQ: AtomicUsize = AtomicUsize::new(0);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn test_config() -> StationConfig {
    let dir = std::env::temp_dir().join(format!(
        "camstation-test-{}-{}",
        std::process::id(),
        TEST_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    StationConfig::default()
        .max_channels(2)
        .record_dir(dir)
        .connect_backoff(Duration::from_millis(20))
        .reconnect_backoff(Duration::from_millis(20))
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_recording() {
    init_tracing();

    // 10 "frames" of 1 video + 1 audio packet at a simulated 30 fps;
    // the first video keyframe is frame 3.
    let mut frames = Vec::new();
    for n in 0..10 {
        frames.push(video_frame(n, n == 2));
        frames.push(audio_frame(n));
    }

    let platform = Arc::new(TestPlatform::default());
    let log = MuxLog::default();
    let station = Station::new(
        test_config(),
        ScriptedConnector::new(video_audio_tracks(), vec![frames]),
        MockMuxer::new(log.clone()),
        platform.clone(),
        platform.clone(),
        platform.clone(),
    );

    station.channel_start(0).await.unwrap();

    // Frames 3..10 of both kinds end up in the segment
    let probe = log.clone();
    wait_until("segment writes", move || {
        probe.video_count() == 8 && probe.audio_count() == 8
    })
    .await;

    // The record queue received every packet
    let stats = station.channel_stats(0).await.unwrap();
    assert_eq!(stats.video_frames, 10);
    assert_eq!(stats.audio_frames, 10);
    // The unflagged IDR was recovered by the bitstream scan
    assert_eq!(stats.keyframes, 1);
    assert_eq!(stats.segments_opened, 1);

    // Exactly one segment, under CAM0/, with the discovered parameters
    {
        let opens = log.opens.lock().unwrap();
        assert_eq!(opens.len(), 1);
        let (path, video, audio) = &opens[0];
        assert!(path.to_string_lossy().contains("/CAM0/"));
        assert!(path.to_string_lossy().ends_with("_seg0001.mp4"));
        assert_eq!((video.width, video.height), (1920, 1080));
        assert!(!video.extradata.is_empty());
        let audio = audio.as_ref().expect("audio track present");
        assert_eq!(audio.asc, [0x14, 0x08]);
        assert_eq!(audio.sample_rate, 16_000);
    }

    // Pre-buffered frames were written first, starting at the keyframe,
    // on a zero-origin 30 fps timeline
    {
        let writes = log.video_writes.lock().unwrap();
        assert!(writes[0].keyframe);
        let dts: Vec<i64> = writes.iter().map(|p| p.dts).collect();
        assert_eq!(dts, vec![0, 3000, 6000, 9000, 12000, 15000, 18000, 21000]);
    }

    // At least the connect-time keyframe request went out
    assert!(platform.iframe_requests.load(Ordering::Relaxed) >= 1);

    station.channel_stop(0).await.unwrap();
    assert!(!station.is_channel_live(0).await);
    // The open segment was finalized on stop
    assert_eq!(log.finishes.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_pause_resume_semantics() {
    init_tracing();

    // A long video-only stream, keyframe every 10 frames
    let frames: Vec<SourceFrame> = (0..500).map(|n| video_frame(n, n % 10 == 0)).collect();

    let platform = Arc::new(TestPlatform::default());
    let log = MuxLog::default();
    let station = Station::new(
        test_config(),
        ScriptedConnector::new(video_only_tracks(), vec![frames]),
        MockMuxer::new(log.clone()),
        platform.clone(),
        platform.clone(),
        platform.clone(),
    );

    tokio_test::assert_ok!(station.channel_start(0).await);
    let viewer = Arc::new(CountingViewer::default());
    tokio_test::assert_ok!(station.add_viewer(0, viewer.clone()).await);

    let probe = viewer.clone();
    wait_until("relay delivery", move || {
        probe.received.load(Ordering::Relaxed) > 0
    })
    .await;

    // Pause: relay freezes, recording continues
    station.set_pause(0, true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let frozen = viewer.received.load(Ordering::Relaxed);
    let recorded = log.video_count();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        viewer.received.load(Ordering::Relaxed),
        frozen,
        "relay must not deliver while paused"
    );
    assert!(
        log.video_count() > recorded,
        "recording must continue while paused"
    );

    // Resume: exactly one keyframe request, then delivery restarts
    let requests_before = platform.iframe_requests.load(Ordering::Relaxed);
    station.set_pause(0, false).await.unwrap();
    assert_eq!(
        platform.iframe_requests.load(Ordering::Relaxed),
        requests_before + 1
    );

    let probe = viewer.clone();
    wait_until("relay resume", move || {
        probe.received.load(Ordering::Relaxed) > frozen
    })
    .await;

    station.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_timestamp_continuity() {
    init_tracing();

    // Two connections whose timestamps both start at zero; downstream must
    // see one monotonic timeline with a single frame-interval gap.
    let session = |key_first: bool| -> Vec<SourceFrame> {
        vec![
            video_frame(0, key_first),
            video_frame(1, false),
            video_frame(2, false),
        ]
    };

    let platform = Arc::new(TestPlatform::default());
    let log = MuxLog::default();
    let station = Station::new(
        test_config(),
        ScriptedConnector::new(video_only_tracks(), vec![session(true), session(true)]),
        MockMuxer::new(log.clone()),
        platform.clone(),
        platform.clone(),
        platform.clone(),
    );

    station.channel_start(0).await.unwrap();

    let probe = log.clone();
    wait_until("both sessions recorded", move || probe.video_count() == 6).await;

    let stats = station.channel_stats(0).await.unwrap();
    assert_eq!(stats.reconnects, 1);

    // One segment spans the reconnect; dts continues one nominal frame
    // interval past the first connection's watermark.
    assert_eq!(log.opens(), 1);
    let dts: Vec<i64> = log
        .video_writes
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.dts)
        .collect();
    assert_eq!(dts, vec![0, 3000, 6000, 9000, 12000, 15000]);

    station.shutdown().await;
}

#[tokio::test]
async fn test_storage_fault_disables_recording_channel_local() {
    init_tracing();

    let frames: Vec<SourceFrame> = (0..400).map(|n| video_frame(n, n % 5 == 0)).collect();

    let platform = Arc::new(TestPlatform::default());
    let log = MuxLog::default();
    let mut config = test_config();
    config.max_open_failures = 2;
    config.io_error_cooldown = Duration::from_millis(10);

    let station = Station::new(
        config,
        ScriptedConnector::new(video_only_tracks(), vec![frames]),
        MockMuxer::failing(log.clone()),
        platform.clone(),
        platform.clone(),
        platform.clone(),
    );

    tokio_test::assert_ok!(station.channel_start(0).await);
    let viewer = Arc::new(CountingViewer::default());
    tokio_test::assert_ok!(station.add_viewer(0, viewer.clone()).await);

    // Opens are retried up to the ceiling, then recording is disabled
    let probe = log.clone();
    wait_until("open failure ceiling", move || {
        probe.open_attempts.load(Ordering::Relaxed) >= 2
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(log.open_attempts.load(Ordering::Relaxed), 2);
    assert_eq!(log.opens(), 0);

    // Relay is unaffected by the recording fault
    let probe = viewer.clone();
    wait_until("relay still delivering", move || {
        probe.received.load(Ordering::Relaxed) > 10
    })
    .await;

    let stats = station.channel_stats(0).await.unwrap();
    assert_eq!(stats.segments_opened, 0);

    station.shutdown().await;
}

#[tokio::test]
async fn test_round_robin_pauses_all_but_one() {
    init_tracing();

    let platform = Arc::new(TestPlatform::default());
    let log = MuxLog::default();
    let config = test_config().flow_policy(FlowPolicy::RoundRobin {
        interval: Duration::from_millis(30),
    });

    let station = Station::new(
        config,
        ScriptedConnector::parked(video_only_tracks()),
        MockMuxer::new(log.clone()),
        platform.clone(),
        platform.clone(),
        platform.clone(),
    );

    station.channel_start(0).await.unwrap();
    station.channel_start(1).await.unwrap();
    station.run_flow_controller();

    // Within a few ticks exactly one channel relays
    for _ in 0..500 {
        let paused = (
            station.is_channel_paused(0).await,
            station.is_channel_paused(1).await,
        );
        match paused {
            (Some(a), Some(b)) if a != b => {
                station.shutdown().await;
                return;
            }
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    panic!("round-robin never settled on a single relaying channel");
}

#[tokio::test]
async fn test_viewer_focus_policy() {
    init_tracing();

    let platform = Arc::new(TestPlatform::default());
    let log = MuxLog::default();
    let config = test_config().flow_policy(FlowPolicy::ViewerFocus {
        pause_background: true,
        poll_interval: Duration::from_millis(10),
    });

    let station = Station::new(
        config,
        ScriptedConnector::parked(video_only_tracks()),
        MockMuxer::new(log.clone()),
        platform.clone(),
        platform.clone(),
        platform.clone(),
    );

    station.channel_start(0).await.unwrap();
    station.channel_start(1).await.unwrap();
    station.run_flow_controller();

    // A viewer session starts watching channel 1
    station.set_focus(Focus::Channel(1)).await;
    assert_eq!(station.focus(), Focus::Channel(1));

    for _ in 0..500 {
        if station.is_channel_paused(0).await == Some(true)
            && station.is_channel_paused(1).await == Some(false)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(station.is_channel_paused(0).await, Some(true));
    assert_eq!(station.is_channel_paused(1).await, Some(false));

    // Back to overview: everything resumes
    station.set_focus(Focus::Overview).await;
    for _ in 0..500 {
        if station.is_channel_paused(0).await == Some(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(station.is_channel_paused(0).await, Some(false));
    assert_eq!(station.is_channel_paused(1).await, Some(false));

    station.shutdown().await;
}
