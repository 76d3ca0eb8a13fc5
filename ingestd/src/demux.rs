//! Stand-in TS demuxer.
//!
//! The PAT/PMT-aware PSI/PES demultiplexer is out of this repository's
//! scope (see the collaborator boundary in `ts-udp-input`); this is the
//! placeholder a reader thread drives until a real one is wired in behind
//! the same `TsDemuxer` trait.

use ts_udp_input::{DemuxedSample, TsDemuxer};

pub struct NullDemuxer;

impl TsDemuxer for NullDemuxer {
    fn push_packets(&mut self, _packets: &[u8], _out: &mut Vec<DemuxedSample>) {}
}
