//! Flow control
//!
//! The wireless uplink cannot carry every channel at full rate, so one
//! station-level task decides which channels relay live video and which idle
//! paused. Two mutually exclusive policies exist: a timer round-robin that
//! cycles through the live channels, and viewer focus, where the watched
//! channel is chosen by the viewer session and the rest optionally pause to
//! save bandwidth.
//!
//! The controller only ever calls pause/resume/keyframe-request on the
//! channel table; it owns no packet data. Focus is advisory shared state:
//! viewer sessions write it, the controller polls it, neither blocks on the
//! other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::channel::ChannelTable;

/// What the viewer is currently watching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    /// Grid view: every channel relays
    Overview,
    /// Single channel view
    Channel(usize),
}

/// Station-wide focus, written by viewer session events and polled by the
/// flow controller
#[derive(Debug)]
pub struct FocusState {
    inner: Mutex<Focus>,
}

impl Default for FocusState {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Focus::Overview),
        }
    }
}

impl FocusState {
    /// Start in overview mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the focus
    pub fn set(&self, focus: Focus) {
        let mut current = self.inner.lock().unwrap();
        if *current != focus {
            tracing::info!(from = ?*current, to = ?focus, "focus changed");
            *current = focus;
        }
    }

    /// Current focus
    pub fn get(&self) -> Focus {
        *self.inner.lock().unwrap()
    }
}

/// Flow control policy; exactly one is active per station
#[derive(Debug, Clone)]
pub enum FlowPolicy {
    /// Cycle through the live channels on a timer, relaying one at a time
    RoundRobin {
        /// Dwell time per channel
        interval: Duration,
    },
    /// Relay what the viewer watches
    ViewerFocus {
        /// Pause non-focused channels to save uplink bandwidth
        pause_background: bool,
        /// Focus poll interval
        poll_interval: Duration,
    },
}

impl Default for FlowPolicy {
    fn default() -> Self {
        FlowPolicy::RoundRobin {
            interval: Duration::from_secs(10),
        }
    }
}

pub(crate) async fn run_flow_controller(
    table: Arc<ChannelTable>,
    focus: Arc<FocusState>,
    policy: FlowPolicy,
    active: Arc<AtomicBool>,
) {
    match policy {
        FlowPolicy::RoundRobin { interval } => {
            tracing::info!(interval_secs = interval.as_secs(), "flow control: round-robin");
            round_robin(table, interval, active).await;
        }
        FlowPolicy::ViewerFocus {
            pause_background,
            poll_interval,
        } => {
            tracing::info!(pause_background, "flow control: viewer focus");
            viewer_focus(table, focus, pause_background, poll_interval, active).await;
        }
    }
    tracing::debug!("flow controller exit");
}

async fn round_robin(table: Arc<ChannelTable>, interval: Duration, active: Arc<AtomicBool>) {
    let count = table.len();
    let mut cursor = 0usize;

    while active.load(Ordering::Acquire) {
        // Next live channel at or after the cursor, skipping offline ones
        let mut target = None;
        for step in 0..count {
            let index = (cursor + step) % count;
            if table.is_live(index).await {
                target = Some(index);
                break;
            }
        }

        match target {
            Some(target) => {
                for index in 0..count {
                    if !table.is_live(index).await {
                        continue;
                    }
                    let _ = table.set_pause(index, index != target).await;
                }
                tracing::debug!(channel = target, "round-robin relaying");
                cursor = (target + 1) % count;
            }
            // No live channel: do nothing, the sleep below prevents a spin
            None => tracing::debug!("round-robin idle, no live channels"),
        }

        tokio::time::sleep(interval).await;
    }
}

async fn viewer_focus(
    table: Arc<ChannelTable>,
    focus: Arc<FocusState>,
    pause_background: bool,
    poll_interval: Duration,
    active: Arc<AtomicBool>,
) {
    let count = table.len();

    while active.load(Ordering::Acquire) {
        let current = focus.get();

        for index in 0..count {
            if !table.is_live(index).await {
                continue;
            }
            let paused = table.is_paused(index).await.unwrap_or(false);

            match current {
                Focus::Overview => {
                    if paused {
                        let _ = table.set_pause(index, false).await;
                    }
                }
                Focus::Channel(watched) => {
                    if index == watched {
                        if paused {
                            let _ = table.set_pause(index, false).await;
                        }
                    } else if pause_background && !paused {
                        let _ = table.set_pause(index, true).await;
                    }
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}
