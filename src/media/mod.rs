//! Bitstream parsing
//!
//! Stateless helpers for the two elementary streams the cameras produce:
//! H.264 Annex-B video (start-code scanning, keyframe detection, SPS/PPS
//! collection and dimension decoding) and ADTS-framed AAC audio (header
//! stripping, AudioSpecificConfig synthesis). No shared state; everything
//! operates on byte slices.

pub mod adts;
pub mod annexb;
pub mod bits;
pub mod sps;

pub use adts::{adts_payload, asc_from_adts, is_adts, DEFAULT_AAC_ASC};
pub use annexb::{
    avcc_first_sps, ebsp_to_rbsp, find_start_code, nal_is_keyframe, scan_for_keyframe,
    NalIterator, NalUnit, NalUnitType, ParameterSets,
};
pub use sps::parse_dimensions;
