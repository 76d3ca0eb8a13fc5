//! SCTE-35 splice_insert latch.
//!
//! Consumes splice commands from a dedicated queue and attaches splice
//! state to the outgoing video frame stream with anchor-time arithmetic.
//! Confined to the video-side normalizer thread — no lock, single owner.

use ts_frame::{PTS_DTS_MODULUS, SplicePoint};
use ts_signal::{SignalBus, SignalKind};

/// One 60-second period at 90 kHz, the unit the "too late"/"too early"
/// tolerances are expressed in multiples of.
const ONE_MINUTE_TICKS: i64 = 5_400_000;
const TOO_LATE_TICKS: i64 = -5 * ONE_MINUTE_TICKS;
const TOO_EARLY_TICKS: i64 = 10 * ONE_MINUTE_TICKS;

/// Only `splice_command_type = 0x05` (splice_insert) is honored; anything
/// else is ignored entirely.
pub const SPLICE_INSERT: u8 = 0x05;

#[derive(Debug, Clone, Copy)]
pub struct SpliceCommand {
    pub splice_command_type: u8,
    /// `true` for a cue-out (out_of_network_indicator = 1), `false` for a
    /// cue-in (in_network).
    pub out_of_network: bool,
    pub immediate: bool,
    pub cancel: bool,
    pub pts_time: Option<i64>,
    pub pts_adjustment: i64,
    /// 90 kHz ticks; 0 means "no duration given".
    pub duration: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct SpliceContext {
    ready: bool,
    target_pts: i64,
    duration: i64,
    duration_remaining: i64,
    triggered: bool,
    last_pts_diff: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct SpliceDecision {
    pub splice_point: SplicePoint,
    pub duration: i64,
    pub duration_remaining: i64,
}

impl SpliceDecision {
    fn none() -> Self {
        Self {
            splice_point: SplicePoint::None,
            duration: 0,
            duration_remaining: 0,
        }
    }
}

pub struct ScteLatch {
    context: SpliceContext,
    signal_bus: SignalBus,
}

impl ScteLatch {
    pub fn new(signal_bus: SignalBus) -> Self {
        Self {
            context: SpliceContext::default(),
            signal_bus,
        }
    }

    /// Handle an incoming splice message, per the state table in §4.4.
    pub fn handle_command(&mut self, cmd: SpliceCommand) {
        if cmd.splice_command_type != SPLICE_INSERT {
            return;
        }

        if !cmd.out_of_network {
            // in_network (cue-in): clear ready from any state.
            self.context = SpliceContext::default();
            self.signal_bus.emit(SignalKind::Scte35End, "scte35 cue-in received");
            return;
        }

        if self.context.ready {
            // Already armed/triggered; the table only defines transitions
            // out of idle for out_of_network messages.
            return;
        }

        if cmd.immediate {
            self.context.ready = true;
            self.context.target_pts = 0;
            self.context.duration = cmd.duration;
            self.context.duration_remaining = cmd.duration;
            self.signal_bus
                .emit(SignalKind::Scte35Start, "scte35 cue-out immediate");
        } else if cmd.duration > 0 && !cmd.cancel {
            let pts_time = cmd.pts_time.unwrap_or(0);
            self.context.ready = true;
            self.context.target_pts = (pts_time + cmd.pts_adjustment).rem_euclid(PTS_DTS_MODULUS);
            self.context.duration = cmd.duration;
            self.context.duration_remaining = cmd.duration;
            self.signal_bus
                .emit(SignalKind::Scte35Start, "scte35 cue-out scheduled");
        } else {
            // duration == 0: informational only, no state change.
            self.signal_bus
                .emit(SignalKind::Scte35Start, "scte35 cue-out informational (no duration)");
        }
    }

    /// Evaluate the latch against one outgoing video frame's `full_time`.
    pub fn process_video_frame(&mut self, full_time: i64) -> SpliceDecision {
        if !self.context.ready {
            return SpliceDecision::none();
        }

        let anchor = full_time.rem_euclid(PTS_DTS_MODULUS);
        // A still-zero target means "trigger as soon as armed": latch it to
        // this frame's anchor so the very next frame's delta reflects real
        // elapsed time instead of a huge, meaningless offset from zero.
        let delta = if self.context.target_pts == 0 {
            self.context.target_pts = anchor;
            0
        } else {
            self.context.target_pts - anchor
        };

        if self.context.triggered {
            self.context.duration_remaining -= delta.abs();
            if self.context.duration_remaining <= 0 {
                let decision = SpliceDecision {
                    splice_point: SplicePoint::CueIn,
                    duration: self.context.duration,
                    duration_remaining: 0,
                };
                self.context = SpliceContext::default();
                self.signal_bus
                    .emit(SignalKind::Scte35End, "scte35 duration expired, forcing cue-in");
                return decision;
            }
            return SpliceDecision {
                splice_point: SplicePoint::None,
                duration: self.context.duration,
                duration_remaining: self.context.duration_remaining,
            };
        }

        if delta <= TOO_LATE_TICKS {
            self.signal_bus
                .emit(SignalKind::Scte35DropMessage, "scte35 splice point too late, cancelling");
            self.context = SpliceContext::default();
            return SpliceDecision::none();
        }

        if delta > TOO_EARLY_TICKS {
            self.signal_bus
                .emit(SignalKind::Scte35DropMessage, "scte35 splice point too early, cancelling");
            self.context = SpliceContext::default();
            return SpliceDecision::none();
        }

        if delta < 0 && self.context.last_pts_diff >= 0 {
            self.context.triggered = true;
            self.signal_bus
                .emit(SignalKind::Scte35Triggered, "scte35 zero-crossing, cue-out triggered");
            return SpliceDecision {
                splice_point: SplicePoint::CueOut,
                duration: self.context.duration,
                duration_remaining: self.context.duration_remaining,
            };
        }

        self.context.last_pts_diff = delta;
        SpliceDecision::none()
    }
}
