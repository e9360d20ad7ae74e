//! Base-station media core
//!
//! `Station` owns the channel table, the flow controller and the platform
//! collaborators, and exposes the command surface the control-plane
//! subsystems drive: `channel_start`/`channel_stop`, `set_pause`,
//! `set_focus`, `request_iframe`, viewer registration, and stats accessors.
//! All external dependencies (transport, muxer, link, registry, storage) are
//! injected at construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::channel::channel::{Channel, ChannelShared, ChannelTable};
use crate::channel::config::StationConfig;
use crate::channel::{ingest, ChannelPhase};
use crate::error::{ChannelError, Result};
use crate::flow::{run_flow_controller, Focus, FocusState};
use crate::platform::{CameraDirectory, LinkStatus, StorageStatus};
use crate::queue::QueueStats;
use crate::record::recorder::run_recorder;
use crate::record::SegmentMuxer;
use crate::relay::{run_relay, ViewerSink, ViewerTable};
use crate::stats::ChannelStats;
use crate::transport::{Interrupt, MediaConnector};

/// The media distribution core of one base station
pub struct Station<C: MediaConnector, M: SegmentMuxer> {
    config: StationConfig,
    connector: Arc<C>,
    muxer: Arc<M>,
    link: Arc<dyn LinkStatus>,
    storage: Arc<dyn StorageStatus>,
    table: Arc<ChannelTable>,
    focus: Arc<FocusState>,
    flow_active: Arc<AtomicBool>,
    flow_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<C: MediaConnector, M: SegmentMuxer> Station<C, M> {
    /// Create a station. No tasks run until channels are started.
    pub fn new(
        config: StationConfig,
        connector: C,
        muxer: M,
        link: Arc<dyn LinkStatus>,
        directory: Arc<dyn CameraDirectory>,
        storage: Arc<dyn StorageStatus>,
    ) -> Self {
        let table = Arc::new(ChannelTable::new(config.max_channels, directory));
        Self {
            config,
            connector: Arc::new(connector),
            muxer: Arc::new(muxer),
            link,
            storage,
            table,
            focus: Arc::new(FocusState::new()),
            flow_active: Arc::new(AtomicBool::new(false)),
            flow_task: std::sync::Mutex::new(None),
        }
    }

    /// The station configuration
    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// Start (or restart) the channel at `index`.
    ///
    /// Resolves the camera endpoint, tears down any previous incarnation,
    /// then spawns the ingestion, recorder and relay tasks.
    pub async fn channel_start(&self, index: usize) -> Result<()> {
        let slot = self.table.slot(index)?;
        let endpoint = self
            .table
            .directory()
            .endpoint(index)
            .ok_or(ChannelError::MissingEndpoint(index))?;
        let url =
            self.config
                .source_url(&endpoint.address, &endpoint.username, &endpoint.password);

        let mut guard = slot.lock().await;
        if let Some(previous) = guard.take() {
            tracing::info!(channel = index, "restarting channel");
            previous.stop().await;
        }

        let shared = Arc::new(ChannelShared::new(index, url, &self.config));
        let interrupt = Interrupt::new();
        let viewers = Arc::new(ViewerTable::new());

        let tasks = vec![
            tokio::spawn(ingest::run_ingest(
                Arc::clone(&shared),
                interrupt.clone(),
                Arc::clone(&self.connector),
                Arc::clone(&self.link),
                Arc::clone(self.table.directory()),
                self.config.clone(),
            )),
            tokio::spawn(run_recorder(
                Arc::clone(&shared),
                Arc::clone(&self.muxer),
                Arc::clone(&self.storage),
                self.config.clone(),
            )),
            tokio::spawn(run_relay(Arc::clone(&shared), Arc::clone(&viewers))),
        ];

        *guard = Some(Channel::new(shared, interrupt, viewers, tasks));
        tracing::info!(channel = index, "channel started");
        Ok(())
    }

    /// Stop the channel at `index`; a no-op if it is not running.
    pub async fn channel_stop(&self, index: usize) -> Result<()> {
        let slot = self.table.slot(index)?;
        let channel = slot.lock().await.take();
        if let Some(channel) = channel {
            channel.stop().await;
        }
        Ok(())
    }

    /// Pause or resume relaying for a channel. Recording continues either
    /// way; a resume also requests a fresh keyframe from the camera.
    pub async fn set_pause(&self, index: usize, pause: bool) -> Result<()> {
        self.table.set_pause(index, pause).await?;
        Ok(())
    }

    /// Record a viewer focus change.
    ///
    /// Focusing a channel resumes it immediately (with a keyframe request)
    /// rather than waiting for the flow controller's next poll; pausing of
    /// background channels is left to the controller's policy.
    pub async fn set_focus(&self, focus: Focus) {
        self.focus.set(focus);
        if let Focus::Channel(index) = focus {
            if let Err(e) = self.table.set_pause(index, false).await {
                tracing::debug!(channel = index, error = %e, "focused channel not resumable");
            }
        }
    }

    /// Current viewer focus
    pub fn focus(&self) -> Focus {
        self.focus.get()
    }

    /// Ask the camera at `index` for an immediate keyframe.
    pub fn request_iframe(&self, index: usize) -> Result<()> {
        self.table.slot(index)?;
        self.table.request_iframe(index);
        Ok(())
    }

    /// Register a viewer on a running channel; returns its handle.
    pub async fn add_viewer(&self, index: usize, sink: Arc<dyn ViewerSink>) -> Result<u64> {
        let slot = self.table.slot(index)?.lock().await;
        let channel = slot.as_ref().ok_or(ChannelError::NotRunning(index))?;
        let id = channel.viewers().add(sink);
        tracing::info!(channel = index, viewer = id, "viewer registered");
        Ok(id)
    }

    /// Remove a viewer; true if it was still registered.
    pub async fn remove_viewer(&self, index: usize, id: u64) -> Result<bool> {
        let slot = self.table.slot(index)?.lock().await;
        match slot.as_ref() {
            Some(channel) => Ok(channel.viewers().remove(id)),
            None => Ok(false),
        }
    }

    /// Number of viewers registered on a channel
    pub async fn viewer_count(&self, index: usize) -> usize {
        match self.table.slot(index) {
            Ok(slot) => slot.lock().await.as_ref().map_or(0, |c| c.viewers().len()),
            Err(_) => 0,
        }
    }

    /// Whether the channel is started
    pub async fn is_channel_live(&self, index: usize) -> bool {
        self.table.is_live(index).await
    }

    /// Whether a running channel is paused; `None` if it is not running
    pub async fn is_channel_paused(&self, index: usize) -> Option<bool> {
        self.table.is_paused(index).await
    }

    /// Current ingestion phase of a channel
    pub async fn channel_phase(&self, index: usize) -> Option<ChannelPhase> {
        let slot = self.table.slot(index).ok()?.lock().await;
        slot.as_ref().map(|c| c.shared().phase())
    }

    /// `(record queue, relay queue)` occupancy for a running channel
    pub async fn queue_stats(&self, index: usize) -> Option<(QueueStats, QueueStats)> {
        let slot = self.table.slot(index).ok()?.lock().await;
        slot.as_ref().map(|c| {
            (
                c.shared().record_queue.stats(),
                c.shared().relay_queue.stats(),
            )
        })
    }

    /// Pipeline counters for a running channel
    pub async fn channel_stats(&self, index: usize) -> Option<ChannelStats> {
        let slot = self.table.slot(index).ok()?.lock().await;
        slot.as_ref().map(|c| c.shared().counters.snapshot())
    }

    /// Spawn the flow controller with the configured policy. A no-op if it
    /// is already running.
    pub fn run_flow_controller(&self) {
        let mut task = self.flow_task.lock().unwrap();
        if task.is_some() {
            return;
        }
        self.flow_active.store(true, Ordering::Release);
        *task = Some(tokio::spawn(run_flow_controller(
            Arc::clone(&self.table),
            Arc::clone(&self.focus),
            self.config.flow_policy.clone(),
            Arc::clone(&self.flow_active),
        )));
    }

    /// Stop the flow controller and every channel, in that order.
    pub async fn shutdown(&self) {
        self.flow_active.store(false, Ordering::Release);
        let task = self.flow_task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        for index in 0..self.table.len() {
            if let Err(e) = self.channel_stop(index).await {
                tracing::warn!(channel = index, error = %e, "channel stop failed");
            }
        }
        tracing::info!("station shut down");
    }
}
