//! AAC ADTS handling
//!
//! The cameras ship AAC as ADTS: a self-framing layout with a 7 or 9 byte
//! header per frame. The MP4 segment muxer wants raw access units plus a
//! 2-byte AudioSpecificConfig, so the header is stripped per packet and the
//! ASC is synthesized once from the header fields.
//!
//! ADTS header (CRC-less):
//! ```text
//! syncword (12) | ID (1) | layer (2) | protection_absent (1)
//! | profile (2) | sampling_frequency_index (4) | private (1)
//! | channel_configuration (3) | ... | frame_length (13) | ...
//! ```

/// Degraded-mode AudioSpecificConfig: AAC-LC, 16 kHz, mono.
///
/// Some camera firmware never emits an in-band config; substituting this
/// profile matches the hardware's fixed microphone path and keeps recording
/// alive instead of stalling.
pub const DEFAULT_AAC_ASC: [u8; 2] = [0x14, 0x08];

/// Whether `buf` starts with an ADTS sync pattern
pub fn is_adts(buf: &[u8]) -> bool {
    buf.len() >= 2 && buf[0] == 0xFF && buf[1] & 0xF0 == 0xF0
}

/// Return the raw AAC access unit behind an ADTS header.
///
/// Header length is 7 bytes, or 9 when the CRC is present
/// (protection_absent bit clear). Buffers that do not start with a sync
/// pattern are returned unchanged.
pub fn adts_payload(buf: &[u8]) -> &[u8] {
    if buf.len() > 7 && is_adts(buf) {
        let header_len = if buf[1] & 0x01 == 1 { 7 } else { 9 };
        if buf.len() >= header_len {
            return &buf[header_len..];
        }
    }
    buf
}

/// Derive a 2-byte AudioSpecificConfig from the first ADTS header in `buf`.
///
/// `object_type = profile + 1`, packed as
/// `object_type:5 | frequency_index:4 | channel_config:4` across two bytes.
pub fn asc_from_adts(buf: &[u8]) -> Option<[u8; 2]> {
    if buf.len() < 7 {
        return None;
    }
    for i in 0..=buf.len() - 7 {
        if buf[i] == 0xFF && buf[i + 1] & 0xF0 == 0xF0 {
            let profile = (buf[i + 2] & 0xC0) >> 6;
            let freq_index = (buf[i + 2] & 0x3C) >> 2;
            let channel_config = ((buf[i + 2] & 0x01) << 2) | ((buf[i + 3] & 0xC0) >> 6);
            let object_type = profile + 1;

            return Some([
                (object_type << 3) | (freq_index >> 1),
                ((freq_index & 1) << 7) | (channel_config << 3),
            ]);
        }
    }
    None
}
