//! H.264 sequence parameter set decoding
//!
//! Frame dimensions live inside the SPS, behind a run of Exp-Golomb coded
//! fields that must be decoded sequentially: profile, the high-profile
//! chroma branch (with optional scaling lists), the pic_order_cnt branch,
//! then the macroblock grid and cropping window. There is no shortcut; a
//! skipped field desynchronizes everything after it.

use crate::error::MediaError;

use super::annexb::find_start_code;
use super::bits::BitReader;
use super::ebsp_to_rbsp;

// Anything past these limits is a desynchronized parse, not a camera.
const MAX_WIDTH: i64 = 4096;
const MAX_HEIGHT: i64 = 2160;

// Profiles that carry chroma_format_idc and the scaling-matrix block
const HIGH_PROFILES: [u32; 12] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

/// Decode the frame dimensions from an SPS NAL unit.
///
/// Accepts the unit with or without an Annex-B start code and with its
/// header byte; both are skipped before parsing. Implausible results are
/// rejected as a parse failure rather than propagated.
pub fn parse_dimensions(sps: &[u8]) -> Result<(u32, u32), MediaError> {
    let mut payload = sps;

    if let Some((0, code_len)) = find_start_code(payload, 0) {
        payload = &payload[code_len..];
    }
    // NAL header byte
    let Some((&header, rest)) = payload.split_first() else {
        return Err(MediaError::Truncated);
    };
    if header & 0x1F != 7 {
        return Err(MediaError::NotSps);
    }
    if rest.len() < 3 {
        return Err(MediaError::Truncated);
    }

    let rbsp = ebsp_to_rbsp(rest);
    let mut r = BitReader::new(&rbsp);

    let profile_idc = r.read_bits(8);
    r.read_bits(8); // constraint_set_flags + reserved
    r.read_bits(8); // level_idc
    r.read_ue(); // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;

    if HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = r.read_ue();
        if chroma_format_idc == 3 {
            separate_colour_plane = r.read_bit() == 1;
        }
        r.read_ue(); // bit_depth_luma_minus8
        r.read_ue(); // bit_depth_chroma_minus8
        r.read_bit(); // qpprime_y_zero_transform_bypass_flag

        if r.read_bit() == 1 {
            // seq_scaling_matrix_present_flag
            let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..list_count {
                if r.read_bit() == 1 {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 });
                }
            }
        }
    }

    r.read_ue(); // log2_max_frame_num_minus4
    let pic_order_cnt_type = r.read_ue();
    if pic_order_cnt_type == 0 {
        r.read_ue(); // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        r.read_bit(); // delta_pic_order_always_zero_flag
        r.read_se(); // offset_for_non_ref_pic
        r.read_se(); // offset_for_top_to_bottom_field
        let cycle_len = r.read_ue();
        for _ in 0..cycle_len {
            r.read_se();
        }
    }

    r.read_ue(); // max_num_ref_frames
    r.read_bit(); // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs_minus1 = r.read_ue() as i64;
    let pic_height_in_map_units_minus1 = r.read_ue() as i64;
    let frame_mbs_only = r.read_bit() as i64;

    if frame_mbs_only == 0 {
        r.read_bit(); // mb_adaptive_frame_field_flag
    }
    r.read_bit(); // direct_8x8_inference_flag

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0i64, 0i64, 0i64, 0i64);
    if r.read_bit() == 1 {
        // frame_cropping_flag
        crop_left = r.read_ue() as i64;
        crop_right = r.read_ue() as i64;
        crop_top = r.read_ue() as i64;
        crop_bottom = r.read_ue() as i64;
    }

    let mut width = (pic_width_in_mbs_minus1 + 1) * 16;
    let mut height = (pic_height_in_map_units_minus1 + 1) * 16 * (2 - frame_mbs_only);

    if separate_colour_plane {
        chroma_format_idc = 0;
    }
    let (sub_width_c, sub_height_c) = match chroma_format_idc {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let crop_unit_x = sub_width_c;
    let crop_unit_y = sub_height_c * (2 - frame_mbs_only);

    width -= (crop_left + crop_right) * crop_unit_x;
    height -= (crop_top + crop_bottom) * crop_unit_y;

    if width <= 0 || height <= 0 || width > MAX_WIDTH || height > MAX_HEIGHT {
        return Err(MediaError::ImplausibleDimensions { width, height });
    }

    Ok((width as u32, height as u32))
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se();
            next_scale = (last_scale + delta + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
}
