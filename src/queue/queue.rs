//! Fixed-capacity packet queue
//!
//! The queue owns two slot pools, one per stream kind, with independently
//! configured capacities, plus a single time-ordered active list that
//! interleaves both kinds in arrival order. Memory is bounded by
//! construction: when a pool is full, `put` evicts the single oldest active
//! packet of the *same* kind and reuses its slot, so an audio burst can
//! never starve video capacity and vice versa.
//!
//! Slots are indices into a pre-sized slab; free lists are per-kind index
//! stacks and the active list is a deque of slot handles, so every list
//! operation is cheap and there is no per-packet allocation beyond the
//! payload itself.
//!
//! Concurrency: one mutex around the slab and lists (held only for the list
//! surgery, never across an await) and one `Notify` for blocked consumers.
//! `put` never waits; `get` may.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::QueueError;

use super::packet::{PacketBuffer, StreamKind};

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total payload bytes currently queued
    pub bytes: usize,
    /// Total packets currently queued
    pub packets: usize,
    /// Video packets currently queued
    pub video: usize,
    /// Audio packets currently queued
    pub audio: usize,
    /// Packets evicted by the oldest-drop overflow policy since creation
    pub dropped: u64,
}

struct Slot {
    kind: StreamKind,
    packet: Option<PacketBuffer>,
}

struct Inner {
    slots: Vec<Slot>,
    free_video: Vec<usize>,
    free_audio: Vec<usize>,
    /// Slot handles in arrival order, both kinds interleaved
    active: VecDeque<usize>,
    bytes: usize,
    video: usize,
    audio: usize,
    dropped: u64,
    aborted: bool,
}

impl Inner {
    fn free_list(&mut self, kind: StreamKind) -> &mut Vec<usize> {
        match kind {
            StreamKind::Video => &mut self.free_video,
            StreamKind::Audio => &mut self.free_audio,
        }
    }

    fn count_mut(&mut self, kind: StreamKind) -> &mut usize {
        match kind {
            StreamKind::Video => &mut self.video,
            StreamKind::Audio => &mut self.audio,
        }
    }

    /// Detach the oldest active slot of `kind` and release its payload.
    fn evict_oldest_of_kind(&mut self, kind: StreamKind) -> Option<usize> {
        let pos = self
            .active
            .iter()
            .position(|&idx| self.slots[idx].kind == kind)?;
        let idx = self.active.remove(pos).expect("position is in range");
        if let Some(packet) = self.slots[idx].packet.take() {
            self.bytes -= packet.len();
        }
        *self.count_mut(kind) -= 1;
        self.dropped += 1;
        Some(idx)
    }
}

/// Fixed-capacity, kind-segregated packet queue
pub struct PacketQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity_video: usize,
    capacity_audio: usize,
}

impl PacketQueue {
    /// Create a queue with the given per-kind pool capacities
    pub fn new(capacity_video: usize, capacity_audio: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity_video + capacity_audio);
        let mut free_video = Vec::with_capacity(capacity_video);
        let mut free_audio = Vec::with_capacity(capacity_audio);

        for _ in 0..capacity_video {
            free_video.push(slots.len());
            slots.push(Slot {
                kind: StreamKind::Video,
                packet: None,
            });
        }
        for _ in 0..capacity_audio {
            free_audio.push(slots.len());
            slots.push(Slot {
                kind: StreamKind::Audio,
                packet: None,
            });
        }

        Self {
            inner: Mutex::new(Inner {
                slots,
                free_video,
                free_audio,
                active: VecDeque::with_capacity(capacity_video + capacity_audio),
                bytes: 0,
                video: 0,
                audio: 0,
                dropped: 0,
                aborted: false,
            }),
            notify: Notify::new(),
            capacity_video,
            capacity_audio,
        }
    }

    /// Pool capacity for a kind
    pub fn capacity(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => self.capacity_video,
            StreamKind::Audio => self.capacity_audio,
        }
    }

    /// Number of free slots for a kind
    pub fn free_count(&self, kind: StreamKind) -> usize {
        let inner = self.inner.lock().unwrap();
        match kind {
            StreamKind::Video => inner.free_video.len(),
            StreamKind::Audio => inner.free_audio.len(),
        }
    }

    /// Number of active (queued) packets of a kind
    pub fn active_count(&self, kind: StreamKind) -> usize {
        let inner = self.inner.lock().unwrap();
        match kind {
            StreamKind::Video => inner.video,
            StreamKind::Audio => inner.audio,
        }
    }

    /// Enqueue a packet; never waits.
    ///
    /// When the pool for the packet's kind is full, the oldest active packet
    /// of that kind is evicted to make room. Eviction is counted in
    /// [`QueueStats::dropped`] and logged at a sampled rate; the caller
    /// still observes success.
    pub fn put(&self, packet: PacketBuffer) -> Result<(), QueueError> {
        let kind = packet.kind;
        let dropped_total;
        {
            let mut inner = self.inner.lock().unwrap();

            if inner.aborted {
                return Err(QueueError::Aborted);
            }

            let free_slot = inner.free_list(kind).pop();
            let idx = match free_slot.or_else(|| inner.evict_oldest_of_kind(kind)) {
                Some(idx) => idx,
                // Zero-capacity pool for this kind
                None => return Err(QueueError::NoCapacity),
            };

            inner.bytes += packet.len();
            inner.slots[idx].packet = Some(packet);
            inner.active.push_back(idx);
            *inner.count_mut(kind) += 1;
            dropped_total = inner.dropped;
        }

        self.notify.notify_one();

        // First drop and every 100th afterwards, matching the occupancy the
        // producer saw at drop time closely enough for diagnosis.
        if dropped_total > 0 && dropped_total % 100 == 1 {
            let stats = self.stats();
            tracing::warn!(
                kind = kind.label(),
                dropped = dropped_total,
                video = stats.video,
                audio = stats.audio,
                "packet pool full, dropped oldest"
            );
        }

        Ok(())
    }

    /// Non-blocking pop of the overall-oldest packet.
    ///
    /// Returns `Ok(None)` when the queue is empty but live. After `abort`,
    /// remaining packets are still handed out until the queue is empty, and
    /// only then does this report `Err(Aborted)`.
    pub fn try_get(&self) -> Result<Option<PacketBuffer>, QueueError> {
        let mut inner = self.inner.lock().unwrap();

        let idx = match inner.active.pop_front() {
            Some(idx) => idx,
            None => {
                return if inner.aborted {
                    Err(QueueError::Aborted)
                } else {
                    Ok(None)
                };
            }
        };

        let packet = inner.slots[idx]
            .packet
            .take()
            .expect("active slot holds a packet");
        inner.bytes -= packet.len();
        let kind = inner.slots[idx].kind;
        *inner.count_mut(kind) -= 1;
        inner.free_list(kind).push(idx);

        let more = !inner.active.is_empty();
        drop(inner);

        // Chain the wakeup so a second blocked consumer is not stranded
        // when several packets arrived while only one permit was stored.
        if more {
            self.notify.notify_one();
        }

        Ok(Some(packet))
    }

    /// Blocking pop: suspends until a packet arrives or the queue is aborted
    /// *and* fully drained.
    pub async fn get(&self) -> Result<PacketBuffer, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            if let Some(packet) = self.try_get()? {
                return Ok(packet);
            }

            // Register interest, then re-check to close the race against a
            // put/abort that happened between the check and registration.
            notified.as_mut().enable();
            if let Some(packet) = self.try_get()? {
                return Ok(packet);
            }

            notified.await;
        }
    }

    /// Abort the queue: wakes all blocked consumers and makes `put` fail
    /// permanently. Idempotent. Already-queued packets remain retrievable
    /// until drained.
    pub fn abort(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.aborted = true;
        }
        self.notify.notify_waiters();
    }

    /// Whether the queue has been aborted
    pub fn is_aborted(&self) -> bool {
        self.inner.lock().unwrap().aborted
    }

    /// Drop every queued packet, returning all slots to their free lists.
    /// Does not abort; used to discard stale frames on pause/resume.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        while let Some(idx) = inner.active.pop_front() {
            if let Some(packet) = inner.slots[idx].packet.take() {
                inner.bytes -= packet.len();
            }
            let kind = inner.slots[idx].kind;
            *inner.count_mut(kind) -= 1;
            inner.free_list(kind).push(idx);
        }
    }

    /// Current occupancy snapshot
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        QueueStats {
            bytes: inner.bytes,
            packets: inner.video + inner.audio,
            video: inner.video,
            audio: inner.audio,
            dropped: inner.dropped,
        }
    }
}
