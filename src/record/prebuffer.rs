//! Pre-keyframe packet buffer
//!
//! While no segment file is open the recorder parks everything it sees in
//! this ring, bounded by packet count and byte size with oldest-first
//! eviction. Once parameters and a keyframe line up, the segment starts from
//! the buffered keyframe instead of losing the packets that arrived between
//! discovery and open.

use std::collections::VecDeque;

use crate::media::scan_for_keyframe;
use crate::queue::{PacketBuffer, StreamKind};

// Headroom under the packet cap at which audio-config waiting gives up;
// beyond it the next evictions would start eating the buffered GOP.
const NEARLY_FULL_HEADROOM: usize = 20;

pub(crate) struct PreBuffer {
    max_packets: usize,
    max_bytes: usize,
    bytes: usize,
    packets: VecDeque<PacketBuffer>,
}

impl PreBuffer {
    pub fn new(max_packets: usize, max_bytes: usize) -> Self {
        Self {
            max_packets,
            max_bytes,
            bytes: 0,
            packets: VecDeque::new(),
        }
    }

    /// Append a packet, evicting oldest entries to satisfy both bounds.
    ///
    /// A single packet larger than the byte bound still enters (after the
    /// buffer empties); refusing it would wedge streams with oversized
    /// keyframes.
    pub fn push(&mut self, packet: PacketBuffer) {
        while self.packets.len() >= self.max_packets {
            self.drop_oldest();
        }
        while !self.packets.is_empty() && self.bytes + packet.len() > self.max_bytes {
            self.drop_oldest();
        }
        self.bytes += packet.len();
        self.packets.push_back(packet);
    }

    fn drop_oldest(&mut self) {
        if let Some(old) = self.packets.pop_front() {
            self.bytes -= old.len();
        }
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Whether eviction pressure is close; used to stop waiting for the
    /// audio config before the buffered keyframe gets evicted
    pub fn nearly_full(&self) -> bool {
        self.packets.len() + NEARLY_FULL_HEADROOM >= self.max_packets
    }

    /// Offset of the first buffered video keyframe
    pub fn find_first_keyframe(&self) -> Option<usize> {
        self.packets.iter().position(|p| {
            p.kind == StreamKind::Video && (p.keyframe || scan_for_keyframe(&p.data))
        })
    }

    /// Iterate buffered packets, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &PacketBuffer> {
        self.packets.iter()
    }
}
