//! Wire-format decode for a `splice_info_section` carrying a
//! `splice_insert` command.
//!
//! Full SCTE-35 section parsing (CRC validation, splice_schedule and
//! other command types, splice_descriptors) belongs to the TS demuxer,
//! which this repository treats as an external collaborator. This is
//! just enough of the layout to recover the fields the splice latch
//! actually consumes.

use ts_scte35::{SpliceCommand, SPLICE_INSERT};

/// Offset of `splice_command_type` in a `splice_info_section`: table_id
/// (1) + section_syntax/length fields (2) + protocol_version (1) +
/// encrypted_packet/pts_adjustment (6) + cw_index (1) + tier (1.5) +
/// splice_command_length (1.5).
const SPLICE_COMMAND_TYPE_OFFSET: usize = 13;

pub fn decode_splice_insert(section: &[u8]) -> Option<SpliceCommand> {
    if section.len() <= SPLICE_COMMAND_TYPE_OFFSET {
        return None;
    }
    let splice_command_type = section[SPLICE_COMMAND_TYPE_OFFSET];
    if splice_command_type != SPLICE_INSERT {
        return None;
    }

    let mut offset = SPLICE_COMMAND_TYPE_OFFSET + 1 + 4; // + splice_event_id
    if offset >= section.len() {
        return None;
    }
    let cancel = section[offset] & 0x80 != 0;
    offset += 1;
    if cancel {
        return Some(SpliceCommand {
            splice_command_type,
            out_of_network: false,
            immediate: false,
            cancel: true,
            pts_time: None,
            pts_adjustment: 0,
            duration: 0,
        });
    }

    if offset >= section.len() {
        return None;
    }
    let flags = section[offset];
    let out_of_network = flags & 0x80 != 0;
    let program_splice = flags & 0x40 != 0;
    let duration_flag = flags & 0x20 != 0;
    let immediate = flags & 0x10 != 0;
    offset += 1;

    let mut pts_time = None;
    if program_splice && !immediate {
        let bytes = section.get(offset..offset + 5)?;
        pts_time = Some(read_pts33(bytes));
        offset += 5;
    }

    let mut duration = 0i64;
    if duration_flag {
        let bytes = section.get(offset..offset + 5)?;
        duration = read_pts33(bytes);
    }

    Some(SpliceCommand {
        splice_command_type,
        out_of_network,
        immediate,
        cancel: false,
        pts_time,
        pts_adjustment: 0,
        duration,
    })
}

fn read_pts33(bytes: &[u8]) -> i64 {
    (((bytes[0] & 0x01) as i64) << 32)
        | ((bytes[1] as i64) << 24)
        | ((bytes[2] as i64) << 16)
        | ((bytes[3] as i64) << 8)
        | bytes[4] as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_with_insert(flags_byte: u8, pts: Option<i64>, duration: Option<i64>) -> Vec<u8> {
        let mut section = vec![0u8; SPLICE_COMMAND_TYPE_OFFSET];
        section.push(SPLICE_INSERT);
        section.extend_from_slice(&[0, 0, 0, 1]); // splice_event_id
        section.push(0x00); // not cancelled
        section.push(flags_byte);
        if let Some(pts) = pts {
            section.extend_from_slice(&pts33_bytes(pts));
        }
        if let Some(duration) = duration {
            section.extend_from_slice(&pts33_bytes(duration));
        }
        section
    }

    fn pts33_bytes(value: i64) -> [u8; 5] {
        [
            0xfe | ((value >> 32) & 0x01) as u8,
            (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ]
    }

    #[test]
    fn immediate_cue_out_has_no_pts_time() {
        let section = section_with_insert(0b1001_0000, None, None);
        let cmd = decode_splice_insert(&section).unwrap();
        assert!(cmd.out_of_network);
        assert!(cmd.immediate);
        assert_eq!(cmd.duration, 0);
    }

    #[test]
    fn scheduled_cue_out_with_duration_decodes_pts_and_duration() {
        let section = section_with_insert(0b1110_0000, Some(12_345_678), Some(27_000_000));
        let cmd = decode_splice_insert(&section).unwrap();
        assert!(cmd.out_of_network);
        assert!(!cmd.immediate);
        assert_eq!(cmd.pts_time, Some(12_345_678));
        assert_eq!(cmd.duration, 27_000_000);
    }

    #[test]
    fn cancelled_command_reports_cancel_without_fields() {
        let mut section = vec![0u8; SPLICE_COMMAND_TYPE_OFFSET];
        section.push(SPLICE_INSERT);
        section.extend_from_slice(&[0, 0, 0, 1]);
        section.push(0x80); // cancel bit set
        let cmd = decode_splice_insert(&section).unwrap();
        assert!(cmd.cancel);
    }

    #[test]
    fn non_splice_insert_command_type_is_ignored() {
        let mut section = vec![0u8; SPLICE_COMMAND_TYPE_OFFSET];
        section.push(0x00); // splice_null
        assert!(decode_splice_insert(&section).is_none());
    }
}
