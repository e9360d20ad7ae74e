//! Bounded packet queues
//!
//! Producer/consumer plumbing between channel ingestion and the recorder and
//! relay consumers. Capacity is fixed at construction and overflow is
//! resolved by dropping the oldest packet of the same kind, so a stalled
//! consumer costs stale frames, never memory.

pub mod packet;
pub mod queue;

pub use packet::{PacketBuffer, StreamKind};
pub use queue::{PacketQueue, QueueStats};
