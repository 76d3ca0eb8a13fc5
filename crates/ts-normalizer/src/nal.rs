//! Minimal start-code/NAL-type scan to explicitly flag key frames.
//!
//! H.264: start-code (`00 00 01` or `00 00 00 01`) followed by a NAL header
//! whose `nal_unit_type` (low 5 bits) is 5 (IDR), 7 (SPS) or 8 (PPS).
//! HEVC: start-code followed by a NAL header whose `nal_unit_type`
//! (bits 1..6 of the first byte) is 19 or 20 (IDR_W_RADL / IDR_N_LP).

const H264_KEY_TYPES: [u8; 3] = [5, 7, 8];
const HEVC_KEY_TYPES: [u8; 2] = [19, 20];

fn start_codes(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
    (0..data.len().saturating_sub(2)).filter(move |&i| {
        data[i] == 0 && data[i + 1] == 0 && (data[i + 2] == 1 || (data.get(i + 3) == Some(&1)))
    })
}

fn start_code_len(data: &[u8], at: usize) -> usize {
    if data.get(at + 2) == Some(&1) {
        3
    } else {
        4
    }
}

pub fn is_h264_key_frame(data: &[u8]) -> bool {
    for at in start_codes(data) {
        let header_at = at + start_code_len(data, at);
        let Some(&header) = data.get(header_at) else {
            continue;
        };
        let nal_unit_type = header & 0x1f;
        if H264_KEY_TYPES.contains(&nal_unit_type) {
            return true;
        }
    }
    false
}

pub fn is_hevc_key_frame(data: &[u8]) -> bool {
    for at in start_codes(data) {
        let header_at = at + start_code_len(data, at);
        let Some(&header) = data.get(header_at) else {
            continue;
        };
        let nal_unit_type = (header >> 1) & 0x3f;
        if HEVC_KEY_TYPES.contains(&nal_unit_type) {
            return true;
        }
    }
    false
}
