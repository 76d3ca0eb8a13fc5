//! The Frame/StreamState data model shared by every stage of the ingest
//! pipeline, plus the bounded sorted windows the frame synchronizer holds.

mod window;

pub use window::{SortedWindow, WindowOverflow};

use ts_pool::PoolHandle;

/// 33-bit PTS/DTS wrap period, in 90 kHz ticks.
pub const PTS_DTS_MODULUS: i64 = 1 << 33;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Video,
    Audio,
    Splice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCodec {
    H264,
    Hevc,
    Aac,
    Ac3,
    PassThrough,
    Scte35,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplicePoint {
    #[default]
    None,
    CueOut,
    CueIn,
}

/// A 3-character ASCII language tag, e.g. `"eng"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageTag(pub [u8; 3]);

/// A single elementary-stream access unit flowing through the pipeline.
///
/// `payload` is a pool-backed handle: it returns to its originating pool
/// automatically once the Frame (and therefore the handle) is dropped, which
/// happens at the Dispatcher once the packager has accepted the frame.
pub struct Frame {
    pub kind: FrameKind,
    pub codec: MediaCodec,
    pub source_index: u32,
    pub sub_stream_index: u32,
    /// Held for the frame's lifetime; returns to the message-header pool
    /// when the frame is dropped at the Dispatcher.
    pub header: PoolHandle,
    pub payload: PoolHandle,
    pub pts: i64,
    pub dts: i64,
    /// 64-bit wrap-extended ordering key. Strictly monotonic per stream.
    pub full_time: i64,
    pub duration: i64,
    pub first_timestamp: i64,
    pub is_sync_frame: bool,
    pub splice_point: SplicePoint,
    pub splice_duration: i64,
    pub splice_duration_remaining: i64,
    pub language: Option<LanguageTag>,
    pub caption: Option<PoolHandle>,
    /// Set on the first frame dispatched after a synchronizer restart, so the
    /// packager emits an HLS discontinuity marker while DASH numbering
    /// continues unaffected.
    pub discontinuity: bool,
}

impl Frame {
    pub fn video_key(&self) -> bool {
        self.kind == FrameKind::Video && self.is_sync_frame
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("source_index", &self.source_index)
            .field("sub_stream_index", &self.sub_stream_index)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("full_time", &self.full_time)
            .field("splice_point", &self.splice_point)
            .field("discontinuity", &self.discontinuity)
            .finish()
    }
}

/// Per-source (video) or per-sub-stream (audio) continuity tracking.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub last_timestamp_pts: i64,
    pub last_timestamp_dts: i64,
    /// Accumulated wrap offset, always a multiple of `PTS_DTS_MODULUS`.
    pub overflow_pts: i64,
    pub overflow_dts: i64,
    pub bytes_seen: u64,
    pub wall_clock_start: Option<std::time::Instant>,
    pub first_timestamp: i64,
    pub key_frame_found: bool,
    pub suspicious_count: u32,
    pub last_full_time_emitted: i64,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_bytes(&mut self, n: u64) {
        if self.wall_clock_start.is_none() {
            self.wall_clock_start = Some(std::time::Instant::now());
        }
        self.bytes_seen += n;
    }

    /// Rolling bitrate in bits/second since the first byte was seen.
    pub fn bitrate_bps(&self) -> Option<f64> {
        let start = self.wall_clock_start?;
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some((self.bytes_seen as f64 * 8.0) / elapsed)
    }
}
