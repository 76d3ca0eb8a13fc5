//! Input Normalizer: per-source PTS/DTS continuity, 33-bit wrap
//! compensation, and late-sample rejection.
//!
//! One instance runs per input source thread. It owns that source's
//! `StreamState` and mints pool-backed `Frame`s for everything downstream.

mod nal;

use std::sync::Arc;

use thiserror::Error;
use ts_frame::{Frame, FrameKind, LanguageTag, MediaCodec, PTS_DTS_MODULUS, SplicePoint, StreamState};
use ts_pool::Pool;
use ts_signal::{SignalBus, SignalKind};

/// A sample arrives non-monotonic and within this guard band of the wrap
/// boundary; it is a late/out-of-order sample, not a wrap.
const LATE_SAMPLE_GUARD: i64 = 34_592;
/// A sample arrives below this value right after `last` crossed the guard
/// band; treated as evidence of an actual wrap rather than lateness.
const WRAP_ARRIVAL_CEILING: i64 = 50_000;
/// Consecutive rejected (late) samples before requesting a synchronizer
/// restart.
const SUSPICIOUS_RESTART_THRESHOLD: u32 = 10;

#[derive(Debug, Error)]
pub enum NormalizerError {
    #[error("out of frame message buffers")]
    FramePoolExhausted(#[source] ts_pool::PoolError),
    #[error("out of payload buffers")]
    PayloadPoolExhausted(#[source] ts_pool::PoolError),
}

/// Result of feeding one sample through the normalizer.
pub enum NormalizeOutcome {
    /// The sample was accepted and minted into a Frame ready to enqueue.
    Accepted(Box<Frame>),
    /// The sample was silently dropped (pre-key-frame video, or a late
    /// sample within the suspicious-count budget).
    Dropped,
    /// The sample was dropped *and* the suspicious count has crossed the
    /// restart threshold — the caller must request a synchronizer restart.
    DroppedRequestRestart,
}

pub struct IncomingSample<'a> {
    pub kind: FrameKind,
    pub codec: MediaCodec,
    pub source_index: u32,
    pub sub_stream_index: u32,
    pub data: &'a [u8],
    pub pts: i64,
    pub dts: Option<i64>,
    pub language: Option<LanguageTag>,
    pub caption: Option<&'a [u8]>,
}

pub struct Normalizer {
    frame_pool: Arc<Pool>,
    payload_pool: Arc<Pool>,
    caption_pool: Option<Arc<Pool>>,
    signal_bus: SignalBus,
}

impl Normalizer {
    pub fn new(
        frame_pool: Arc<Pool>,
        payload_pool: Arc<Pool>,
        caption_pool: Option<Arc<Pool>>,
        signal_bus: SignalBus,
    ) -> Self {
        Self {
            frame_pool,
            payload_pool,
            caption_pool,
            signal_bus,
        }
    }

    pub fn process(
        &self,
        state: &mut StreamState,
        sample: IncomingSample<'_>,
    ) -> Result<NormalizeOutcome, NormalizerError> {
        state.note_bytes(sample.data.len() as u64);

        let dts = sample.dts.unwrap_or(sample.pts);

        if sample.kind == FrameKind::Video && !state.key_frame_found {
            let is_key = match sample.codec {
                MediaCodec::H264 => nal::is_h264_key_frame(sample.data),
                MediaCodec::Hevc => nal::is_hevc_key_frame(sample.data),
                _ => false,
            };
            if !is_key {
                return Ok(NormalizeOutcome::Dropped);
            }
            state.key_frame_found = true;
            state.first_timestamp = dts;
        }

        let last = state.last_timestamp_dts;
        let full_time = match classify_timestamp(last, dts) {
            TimestampVerdict::Late => {
                state.suspicious_count += 1;
                self.signal_bus.emit(
                    SignalKind::MalformedData,
                    format!("late/non-monotonic sample: last={last} incoming={dts}"),
                );
                if state.suspicious_count >= SUSPICIOUS_RESTART_THRESHOLD {
                    return Ok(NormalizeOutcome::DroppedRequestRestart);
                }
                return Ok(NormalizeOutcome::Dropped);
            }
            TimestampVerdict::Wrapped => {
                state.overflow_dts += PTS_DTS_MODULUS;
                state.suspicious_count = 0;
                dts + state.overflow_dts
            }
            TimestampVerdict::Accepted => {
                state.suspicious_count = 0;
                dts + state.overflow_dts
            }
        };

        state.last_timestamp_dts = dts;
        state.last_timestamp_pts = sample.pts;
        state.last_full_time_emitted = full_time;

        let is_sync_frame = match sample.codec {
            MediaCodec::H264 => nal::is_h264_key_frame(sample.data),
            MediaCodec::Hevc => nal::is_hevc_key_frame(sample.data),
            _ => false,
        };

        let payload = self
            .payload_pool
            .take(sample.data.len())
            .map_err(NormalizerError::PayloadPoolExhausted)?;
        let mut payload = payload;
        payload.as_mut_slice().copy_from_slice(sample.data);

        let caption = match (sample.caption, &self.caption_pool) {
            (Some(bytes), Some(pool)) => match pool.take(bytes.len()) {
                Ok(mut handle) => {
                    handle.as_mut_slice().copy_from_slice(bytes);
                    Some(handle)
                }
                Err(_) => {
                    // Caption allocation failure: omit captions for this
                    // frame rather than dropping the frame itself.
                    None
                }
            },
            _ => None,
        };

        let header = self
            .frame_pool
            .take(0)
            .map_err(NormalizerError::FramePoolExhausted)?;

        Ok(NormalizeOutcome::Accepted(Box::new(Frame {
            kind: sample.kind,
            codec: sample.codec,
            source_index: sample.source_index,
            sub_stream_index: sample.sub_stream_index,
            header,
            payload,
            pts: sample.pts,
            dts,
            full_time,
            duration: 0,
            first_timestamp: state.first_timestamp,
            is_sync_frame,
            splice_point: SplicePoint::None,
            splice_duration: 0,
            splice_duration_remaining: 0,
            language: sample.language,
            caption,
            discontinuity: false,
        })))
    }
}

enum TimestampVerdict {
    Accepted,
    Late,
    Wrapped,
}

fn classify_timestamp(last: i64, incoming: i64) -> TimestampVerdict {
    if incoming < last && last <= PTS_DTS_MODULUS - LATE_SAMPLE_GUARD && incoming > WRAP_ARRIVAL_CEILING {
        TimestampVerdict::Late
    } else if last >= PTS_DTS_MODULUS - LATE_SAMPLE_GUARD && incoming < WRAP_ARRIVAL_CEILING {
        TimestampVerdict::Wrapped
    } else {
        TimestampVerdict::Accepted
    }
}
