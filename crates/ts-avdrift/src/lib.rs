//! A/V drift controllers: keep audio and video output locked to wall-clock
//! expectation by inserting or dropping material, independently per stream.
//!
//! Each controller tracks how many bytes/frames it has actually emitted
//! against how many the elapsed source time says it should have emitted,
//! and corrects the difference by at most one decision per call. Mirrors
//! the two independent correction loops used for audio and video rather
//! than a single shared drift value — the two media types drift at
//! different rates and are corrected with different material (silence
//! vs. repeated frames).

use parking_lot::Mutex;
use ts_signal::{SignalBus, SignalKind};

/// Consecutive over-threshold observations before an audio stream is
/// declared unrecoverable and escalated as fatal.
pub const AUDIO_THRESHOLD_CHECK: u32 = 16;

/// Consecutive over-threshold observations before a video stream is
/// declared unrecoverable and escalated as fatal. Distinct from
/// [`AUDIO_THRESHOLD_CHECK`]: audio and video drift are tracked by separate
/// counters against separate material.
pub const AV_SYNC_TRIGGER_LEVEL: u32 = 16;

/// Ceiling on how many filler frames a single call will insert, expressed
/// as a multiple of one frame's worth of diff — stops a long stall from
/// front-loading an unbounded burst of silence in one call.
const MAX_BURST_FRAMES: i64 = 8;

fn ticks_per_sample(sample_rate: u32, channels: u32) -> f64 {
    (sample_rate as f64 / 100_000.0) * 2.0 * channels as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioDriftDecision {
    /// Number of zero-filled filler frames (each `buffer_size` bytes) to
    /// synthesize and push ahead of the current frame.
    pub filler_frames: u32,
    /// The current frame must be dropped rather than emitted.
    pub drop_current: bool,
}

/// Raised once `quit_threshold` has been exceeded for
/// `AUDIO_THRESHOLD_CHECK` consecutive observations: the stream is not
/// converging and the caller should restart it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftUnrecoverable;

pub struct AudioDriftController {
    ticks_per_sample: f64,
    quit_threshold: i64,
    actual_bytes: Mutex<i64>,
    consecutive_over_threshold: Mutex<u32>,
    signal_bus: SignalBus,
}

impl AudioDriftController {
    pub fn new(sample_rate: u32, channels: u32, output_channels: u32, signal_bus: SignalBus) -> Self {
        Self {
            ticks_per_sample: ticks_per_sample(sample_rate, channels),
            quit_threshold: 65_535 * output_channels as i64 * 2,
            actual_bytes: Mutex::new(0),
            consecutive_over_threshold: Mutex::new(0),
            signal_bus,
        }
    }

    fn expected_bytes(&self, elapsed_source_ticks: f64) -> i64 {
        (elapsed_source_ticks / 0.9 * self.ticks_per_sample) as i64
    }

    /// Evaluate one incoming audio frame of `buffer_size` bytes against
    /// `elapsed_source_ticks` of source time seen so far. The frame's bytes
    /// are provisionally counted as emitted before the diff is computed —
    /// if the decision is to drop, that provisional count is reversed.
    pub fn evaluate(
        &self,
        elapsed_source_ticks: f64,
        buffer_size: i64,
    ) -> Result<AudioDriftDecision, DriftUnrecoverable> {
        let expected = self.expected_bytes(elapsed_source_ticks);

        let mut actual = self.actual_bytes.lock();
        *actual += buffer_size;
        let mut diff = expected - *actual;

        {
            let mut over = self.consecutive_over_threshold.lock();
            if diff.abs() > self.quit_threshold {
                *over += 1;
                if *over >= AUDIO_THRESHOLD_CHECK {
                    self.signal_bus.emit(
                        SignalKind::ErrorAvSync,
                        "audio drift exceeded quit threshold for too long, restarting stream",
                    );
                    return Err(DriftUnrecoverable);
                }
            } else {
                *over = 0;
            }
        }

        if diff >= buffer_size * MAX_BURST_FRAMES {
            diff = buffer_size * MAX_BURST_FRAMES;
        }

        let mut filler_frames = 0u32;
        while diff >= buffer_size {
            filler_frames += 1;
            *actual += buffer_size;
            diff -= buffer_size;
            self.signal_bus
                .emit(SignalKind::InsertSilence, "inserting silence to maintain a/v sync");
        }

        if diff <= -buffer_size {
            *actual -= buffer_size;
            self.signal_bus
                .emit(SignalKind::DropAudio, "dropping audio samples to maintain a/v sync");
            return Ok(AudioDriftDecision {
                filler_frames,
                drop_current: true,
            });
        }

        Ok(AudioDriftDecision {
            filler_frames,
            drop_current: false,
        })
    }

    /// Number of zero-filled filler frames needed to bridge an idle period
    /// of `idle_seconds` on a signal-loss source, at `buffer_size` bytes
    /// per frame.
    pub fn signal_loss_filler_count(&self, idle_seconds: f64, buffer_size: i64) -> u32 {
        let ticks_per_frame = buffer_size as f64 / self.ticks_per_sample;
        let idle_ticks = idle_seconds * 90_000.0;
        (idle_ticks / ticks_per_frame).ceil() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoDriftDecision {
    Pass,
    /// Repeat the last frame this many times (zero timestamps, captions
    /// nulled on the repeats) before emitting the current one.
    Repeat(u32),
    Drop,
}

pub struct VideoDriftController {
    fps: f64,
    trigger_level: i64,
    actual_frames: Mutex<i64>,
    consecutive_over_threshold: Mutex<u32>,
    signal_bus: SignalBus,
}

impl VideoDriftController {
    pub fn new(fps: f64, trigger_level: i64, signal_bus: SignalBus) -> Self {
        Self {
            fps,
            trigger_level,
            actual_frames: Mutex::new(0),
            consecutive_over_threshold: Mutex::new(0),
            signal_bus,
        }
    }

    fn expected_frames(&self, dts: i64, first_timestamp: i64) -> i64 {
        (((dts - first_timestamp) as f64 / 90_000.0) * self.fps) as i64
    }

    /// Evaluate the current video frame's `dts` against the stream's
    /// `first_timestamp`. `actual_frames` is incremented here for the
    /// frame being passed/repeated; a dropped frame does not count.
    pub fn evaluate(&self, dts: i64, first_timestamp: i64) -> Result<VideoDriftDecision, DriftUnrecoverable> {
        let expected = self.expected_frames(dts, first_timestamp);
        let actual = *self.actual_frames.lock();
        let diff = expected - actual;

        {
            let mut over = self.consecutive_over_threshold.lock();
            if diff.abs() > self.trigger_level {
                *over += 1;
                if *over >= AV_SYNC_TRIGGER_LEVEL {
                    self.signal_bus.emit(
                        SignalKind::ErrorAvSync,
                        "video drift exceeded trigger level for too long, restarting stream",
                    );
                    return Err(DriftUnrecoverable);
                }
            } else {
                *over = 0;
            }
        }

        if diff > 0 {
            let cap = (self.fps / 4.0) as i64;
            let repeats = diff.min(cap).max(0) as u32;
            *self.actual_frames.lock() += 1 + repeats as i64;
            if repeats > 0 {
                self.signal_bus
                    .emit(SignalKind::FrameRepeat, "repeating video frame to maintain a/v sync");
                return Ok(VideoDriftDecision::Repeat(repeats));
            }
            return Ok(VideoDriftDecision::Pass);
        }

        if diff < 0 {
            self.signal_bus
                .emit(SignalKind::DropVideoFrame, "dropping video frame to maintain a/v sync");
            return Ok(VideoDriftDecision::Drop);
        }

        *self.actual_frames.lock() += 1;
        Ok(VideoDriftDecision::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_state_audio_passes_with_no_correction() {
        let (bus, _rx) = SignalBus::channel();
        let controller = AudioDriftController::new(48_000, 2, 2, bus);
        let buffer_size = 4096i64;
        let ticks_per_buffer = buffer_size as f64 / ticks_per_sample(48_000, 2) * 0.9;

        let mut elapsed = 0.0;
        for _ in 0..10 {
            elapsed += ticks_per_buffer;
            let decision = controller.evaluate(elapsed, buffer_size).unwrap();
            assert_eq!(decision.filler_frames, 0);
            assert!(!decision.drop_current);
        }
    }

    #[test]
    fn scenario_s6_large_negative_diff_drops_current_frame() {
        let (bus, rx) = SignalBus::channel();
        let controller = AudioDriftController::new(48_000, 2, 2, bus);
        let buffer_size = 4096i64;

        // Pre-load actual_bytes far ahead of expected so the post-add diff
        // lands at exactly -buffer_size*2 before the provisional add is
        // reversed, matching the "diff = -8192, buffer_size = 4096" drop
        // scenario.
        *controller.actual_bytes.lock() = 12_288;
        let decision = controller.evaluate(0.0, buffer_size).unwrap();
        assert!(decision.drop_current);
        assert_eq!(decision.filler_frames, 0);
        assert!(matches!(rx.recv().unwrap().kind, SignalKind::DropAudio));
        assert_eq!(*controller.actual_bytes.lock(), 12_288);
    }

    #[test]
    fn scenario_s4_signal_loss_inserts_expected_filler_count() {
        let (bus, _rx) = SignalBus::channel();
        let controller = AudioDriftController::new(48_000, 2, 2, bus);
        let buffer_size = 4096i64;

        let count = controller.signal_loss_filler_count(1.05, buffer_size);
        let ticks_per_frame = buffer_size as f64 / ticks_per_sample(48_000, 2);
        let expected = ((1.05 * 90_000.0) / ticks_per_frame).ceil() as u32;
        assert_eq!(count, expected);
        assert!(count > 0);
    }

    #[test]
    fn sustained_extreme_drift_is_declared_unrecoverable() {
        let (bus, _rx) = SignalBus::channel();
        let controller = AudioDriftController::new(48_000, 2, 2, bus);
        let buffer_size = 4096i64;

        let mut last = Ok(AudioDriftDecision {
            filler_frames: 0,
            drop_current: false,
        });
        for _ in 0..(AUDIO_THRESHOLD_CHECK + 1) {
            last = controller.evaluate(100_000_000.0, buffer_size);
            if last.is_err() {
                break;
            }
        }
        assert!(last.is_err());
    }

    #[test]
    fn video_diff_zero_passes_without_repeat_or_drop() {
        let (bus, _rx) = SignalBus::channel();
        let controller = VideoDriftController::new(29.97, 10, bus);
        let decision = controller.evaluate(0, 0).unwrap();
        assert_eq!(decision, VideoDriftDecision::Pass);
    }

    #[test]
    fn video_behind_expectation_repeats_capped_at_quarter_fps() {
        let (bus, rx) = SignalBus::channel();
        let controller = VideoDriftController::new(30.0, 2, bus);
        // expected_frames jumps far ahead of actual (still 0): diff is huge,
        // repeat count must clamp at fps/4 = 7.
        let decision = controller.evaluate(90_000 * 100, 0).unwrap();
        match decision {
            VideoDriftDecision::Repeat(n) => assert_eq!(n, 7),
            other => panic!("expected Repeat(7), got {other:?}"),
        }
        assert!(matches!(rx.recv().unwrap().kind, SignalKind::FrameRepeat));
    }

    #[test]
    fn video_ahead_of_expectation_drops() {
        let (bus, rx) = SignalBus::channel();
        let controller = VideoDriftController::new(30.0, 2, bus);
        *controller.actual_frames.lock() = 1000;
        let decision = controller.evaluate(0, 0).unwrap();
        assert_eq!(decision, VideoDriftDecision::Drop);
        assert!(matches!(rx.recv().unwrap().kind, SignalKind::DropVideoFrame));
    }
}
