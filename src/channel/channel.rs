//! Per-channel runtime and the channel table
//!
//! A `Channel` bundles everything one camera owns: both packet queues, the
//! paused/running flags, the watch channels publishing discovery results,
//! and the task handles for its ingestion, recorder and relay loops.
//! Teardown is ordered: flags first, queue aborts to wake blocked consumers,
//! transport interrupt, then joins. A channel is never dropped while one of
//! its tasks can still touch it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ChannelError;
use crate::platform::{CameraDirectory, CameraMessage};
use crate::queue::PacketQueue;
use crate::relay::ViewerTable;
use crate::stats::ChannelCounters;
use crate::transport::Interrupt;

use super::config::StationConfig;
use super::state::{ChannelPhase, StreamParams};

/// State shared between a channel's tasks
pub(crate) struct ChannelShared {
    /// Channel index
    pub index: usize,
    /// Source URL (with credentials)
    pub url: String,
    /// Record queue, drained by the recorder
    pub record_queue: PacketQueue,
    /// Relay queue, drained by the relay sender
    pub relay_queue: PacketQueue,
    /// Pipeline counters
    pub counters: ChannelCounters,
    running: AtomicBool,
    paused: AtomicBool,
    params_tx: watch::Sender<Option<StreamParams>>,
    phase_tx: watch::Sender<ChannelPhase>,
}

impl ChannelShared {
    pub fn new(index: usize, url: String, config: &StationConfig) -> Self {
        let (params_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(ChannelPhase::Connecting);
        Self {
            index,
            url,
            record_queue: PacketQueue::new(config.record_queue_video, config.record_queue_audio),
            relay_queue: PacketQueue::new(config.relay_queue_video, config.relay_queue_audio),
            counters: ChannelCounters::new(),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            params_tx,
            phase_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn set_phase(&self, phase: ChannelPhase) {
        self.phase_tx.send_replace(phase);
    }

    pub fn phase(&self) -> ChannelPhase {
        *self.phase_tx.borrow()
    }

    pub fn phase_rx(&self) -> watch::Receiver<ChannelPhase> {
        self.phase_tx.subscribe()
    }

    pub fn publish_params(&self, params: StreamParams) {
        self.params_tx.send_replace(Some(params));
    }

    pub fn params_rx(&self) -> watch::Receiver<Option<StreamParams>> {
        self.params_tx.subscribe()
    }
}

/// One started channel: shared state plus its task handles
pub(crate) struct Channel {
    shared: Arc<ChannelShared>,
    interrupt: Interrupt,
    viewers: Arc<ViewerTable>,
    tasks: Vec<JoinHandle<()>>,
}

impl Channel {
    pub fn new(
        shared: Arc<ChannelShared>,
        interrupt: Interrupt,
        viewers: Arc<ViewerTable>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            shared,
            interrupt,
            viewers,
            tasks,
        }
    }

    pub fn shared(&self) -> &Arc<ChannelShared> {
        &self.shared
    }

    pub fn viewers(&self) -> &Arc<ViewerTable> {
        &self.viewers
    }

    /// Apply a pause state change.
    ///
    /// Pausing flushes the relay queue so no stale frames linger; resuming
    /// flushes again and reports `true` so the caller can request a fresh
    /// keyframe from the camera. The network read is never stopped either
    /// way.
    pub fn set_pause(&self, pause: bool) -> Result<bool, ChannelError> {
        if !self.shared.is_running() {
            return Err(ChannelError::NotRunning(self.shared.index));
        }

        if pause {
            if !self.shared.is_paused() {
                self.shared.set_paused(true);
                self.shared.relay_queue.flush();
                tracing::info!(channel = self.shared.index, "paused, relay queue flushed");
            }
            Ok(false)
        } else {
            self.shared.relay_queue.flush();
            if self.shared.is_paused() {
                self.shared.set_paused(false);
                tracing::info!(channel = self.shared.index, "resumed");
            }
            Ok(true)
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Ordered teardown: stop flags, queue aborts, transport interrupt,
    /// then join every task.
    pub async fn stop(mut self) {
        let index = self.shared.index;
        self.shared.request_stop();
        self.interrupt.set();
        self.shared.record_queue.abort();
        self.shared.relay_queue.abort();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!(channel = index, error = %e, "channel task panicked");
                }
            }
        }

        self.shared.set_phase(ChannelPhase::Stopped);
        tracing::info!(channel = index, "channel stopped");
    }
}

/// Fixed-size table of channel slots plus the camera control channel
///
/// The flow controller and the station command surface both act through
/// this; it owns no packet data.
pub(crate) struct ChannelTable {
    slots: Vec<tokio::sync::Mutex<Option<Channel>>>,
    directory: Arc<dyn CameraDirectory>,
}

impl ChannelTable {
    pub fn new(channel_count: usize, directory: Arc<dyn CameraDirectory>) -> Self {
        Self {
            slots: (0..channel_count).map(|_| tokio::sync::Mutex::new(None)).collect(),
            directory,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn directory(&self) -> &Arc<dyn CameraDirectory> {
        &self.directory
    }

    pub fn slot(
        &self,
        index: usize,
    ) -> Result<&tokio::sync::Mutex<Option<Channel>>, ChannelError> {
        self.slots.get(index).ok_or(ChannelError::InvalidIndex(index))
    }

    pub async fn is_live(&self, index: usize) -> bool {
        match self.slots.get(index) {
            Some(slot) => slot.lock().await.as_ref().is_some_and(|c| c.is_running()),
            None => false,
        }
    }

    pub async fn is_paused(&self, index: usize) -> Option<bool> {
        let slot = self.slots.get(index)?;
        let guard = slot.lock().await;
        guard.as_ref().filter(|c| c.is_running()).map(|c| c.is_paused())
    }

    /// Pause or resume a channel; a resume also asks the camera for a fresh
    /// keyframe so playback restarts without waiting for the next scheduled
    /// IDR.
    pub async fn set_pause(&self, index: usize, pause: bool) -> Result<(), ChannelError> {
        let request_iframe = {
            let slot = self.slot(index)?.lock().await;
            let channel = slot.as_ref().ok_or(ChannelError::NotRunning(index))?;
            channel.set_pause(pause)?
        };

        if request_iframe {
            self.request_iframe(index);
        }
        Ok(())
    }

    /// Deliver a keyframe request to the camera; delivery failures are
    /// logged, not surfaced, since the next scheduled IDR covers for it.
    pub fn request_iframe(&self, index: usize) {
        if let Err(e) = self
            .directory
            .send_message(index, CameraMessage::RequestIframe, &[])
        {
            tracing::debug!(channel = index, error = %e, "keyframe request not delivered");
        }
    }
}
