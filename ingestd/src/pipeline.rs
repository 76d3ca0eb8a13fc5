//! Stage wiring: each function here is the body of one long-lived,
//! one-thread-per-stage task, following the concurrency model the rest of
//! this workspace is built around. `main` spawns one of each per
//! configured source plus the shared synchronizer/dispatcher/supervisor
//! stages.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ts_frame::{FrameKind, StreamState};
use ts_normalizer::{IncomingSample, NormalizeOutcome, Normalizer};
use ts_pool::Pool;
use ts_queue::WorkQueue;
use ts_scte35::{ScteLatch, SpliceCommand};
use ts_signal::SignalBus;
use ts_sync::FrameSynchronizer;
use ts_udp_input::{DemuxedSample, PackagerSink, TsDemuxer, UdpSourceReader};

use crate::demux::NullDemuxer;
use crate::scte_decode::decode_splice_insert;

/// Every fixed-capacity allocator the ingest path draws from. Sized
/// generously relative to the bounded sync windows so that sync-window
/// backpressure, not pool exhaustion, is normally what restarts a stream.
pub struct PoolSet {
    pub frame_headers: Arc<Pool>,
    pub compressed_video: Arc<Pool>,
    pub compressed_audio: Arc<Pool>,
    pub captions: Arc<Pool>,
}

impl PoolSet {
    pub fn new() -> Self {
        Self {
            frame_headers: Pool::new("frame-headers", 512, 0),
            compressed_video: Pool::new("compressed-video", 128, 2 * 1024 * 1024),
            compressed_audio: Pool::new("compressed-audio", 256, 64 * 1024),
            captions: Pool::new("captions", 64, 4 * 1024),
        }
    }

    pub fn unused_counts(&self) -> Vec<(&'static str, usize, usize)> {
        [
            &self.frame_headers,
            &self.compressed_video,
            &self.compressed_audio,
            &self.captions,
        ]
        .iter()
        .map(|p| (p.name(), p.unused_count(), p.capacity()))
        .collect()
    }
}

/// One UDP video source: reads datagrams, demuxes, normalizes, latches
/// SCTE-35 state onto the frame, and submits it to the synchronizer.
pub fn run_video_source(
    source_index: u32,
    addr: SocketAddrV4,
    pools: Arc<PoolSet>,
    signal_bus: SignalBus,
    synchronizer: Arc<FrameSynchronizer>,
    scte35_enabled: bool,
    stop: Arc<AtomicBool>,
) {
    let mut reader = match UdpSourceReader::bind(addr, signal_bus.clone()) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!(source = source_index, %addr, error = %e, "failed to bind video source");
            return;
        }
    };

    let normalizer = Normalizer::new(
        pools.frame_headers.clone(),
        pools.compressed_video.clone(),
        Some(pools.captions.clone()),
        signal_bus.clone(),
    );
    let mut demuxer = NullDemuxer;
    let mut state = StreamState::new();
    let mut scte_latch = ScteLatch::new(signal_bus.clone());
    // Decoded splice_insert commands land here rather than being applied to
    // the latch at decode time, so the latch's single-owner consumption
    // loop below is the only place that mutates it.
    let splice_queue: WorkQueue<SpliceCommand> = WorkQueue::new();

    let mut datagram = vec![0u8; 7 * 188];
    let mut samples = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        let len = match reader.recv(&mut datagram) {
            Ok(len) => len,
            Err(_) => continue,
        };

        samples.clear();
        demuxer.push_packets(&datagram[..len], &mut samples);

        while let Some(cmd) = splice_queue.try_take_back() {
            scte_latch.handle_command(cmd);
        }

        for sample in samples.drain(..) {
            match sample {
                DemuxedSample::Video {
                    source_index: idx,
                    sub_stream_index,
                    codec,
                    data,
                    pts,
                    dts,
                } => {
                    let incoming = IncomingSample {
                        kind: FrameKind::Video,
                        codec,
                        source_index: idx,
                        sub_stream_index,
                        data: &data,
                        pts,
                        dts,
                        language: None,
                        caption: None,
                    };
                    match normalizer.process(&mut state, incoming) {
                        Ok(NormalizeOutcome::Accepted(mut frame)) => {
                            if scte35_enabled && frame.kind == FrameKind::Video {
                                let decision = scte_latch.process_video_frame(frame.full_time);
                                frame.splice_point = decision.splice_point;
                                frame.splice_duration = decision.duration;
                                frame.splice_duration_remaining = decision.duration_remaining;
                            }
                            let _ = synchronizer.submit_video(*frame);
                        }
                        Ok(NormalizeOutcome::Dropped) => {}
                        Ok(NormalizeOutcome::DroppedRequestRestart) => {
                            synchronizer.force_restart("video source suspicious-sample budget exceeded");
                        }
                        Err(e @ ts_normalizer::NormalizerError::FramePoolExhausted(_)) => {
                            signal_bus.emit(ts_signal::SignalKind::ErrorMsgPool, e.to_string());
                            std::process::exit(0);
                        }
                        Err(e @ ts_normalizer::NormalizerError::PayloadPoolExhausted(_)) => {
                            signal_bus.emit(ts_signal::SignalKind::ErrorNalPool, e.to_string());
                            std::process::exit(0);
                        }
                    }
                }
                DemuxedSample::Scte35 { section_data, .. } => {
                    if let Some(cmd) = decode_splice_insert(&section_data) {
                        splice_queue.put_front(cmd);
                    }
                }
                DemuxedSample::Audio { .. } => {
                    // Misrouted: the video source socket never receives
                    // audio samples in practice, but dropping silently
                    // here keeps this loop total over `DemuxedSample`.
                }
            }
        }
    }
}

/// One UDP audio sub-stream.
pub fn run_audio_source(
    source_index: u32,
    addr: SocketAddrV4,
    pools: Arc<PoolSet>,
    signal_bus: SignalBus,
    synchronizer: Arc<FrameSynchronizer>,
    stop: Arc<AtomicBool>,
) {
    let mut reader = match UdpSourceReader::bind(addr, signal_bus.clone()) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!(source = source_index, %addr, error = %e, "failed to bind audio source");
            return;
        }
    };

    let normalizer = Normalizer::new(
        pools.frame_headers.clone(),
        pools.compressed_audio.clone(),
        None,
        signal_bus.clone(),
    );
    let mut demuxer = NullDemuxer;
    let mut state = StreamState::new();
    state.key_frame_found = true; // audio has no key-frame gate

    let mut datagram = vec![0u8; 7 * 188];
    let mut samples = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        let len = match reader.recv(&mut datagram) {
            Ok(len) => len,
            Err(_) => continue,
        };

        samples.clear();
        demuxer.push_packets(&datagram[..len], &mut samples);

        for sample in samples.drain(..) {
            let DemuxedSample::Audio {
                source_index: idx,
                sub_stream_index,
                codec,
                data,
                pts,
                dts,
                language,
            } = sample
            else {
                continue;
            };

            let incoming = IncomingSample {
                kind: FrameKind::Audio,
                codec,
                source_index: idx,
                sub_stream_index,
                data: &data,
                pts,
                dts,
                language,
                caption: None,
            };
            match normalizer.process(&mut state, incoming) {
                Ok(NormalizeOutcome::Accepted(frame)) => {
                    let _ = synchronizer.submit_audio(*frame);
                }
                Ok(NormalizeOutcome::Dropped) => {}
                Ok(NormalizeOutcome::DroppedRequestRestart) => {
                    synchronizer.force_restart("audio source suspicious-sample budget exceeded");
                }
                Err(e @ ts_normalizer::NormalizerError::FramePoolExhausted(_)) => {
                    signal_bus.emit(ts_signal::SignalKind::ErrorMsgPool, e.to_string());
                    std::process::exit(0);
                }
                Err(e @ ts_normalizer::NormalizerError::PayloadPoolExhausted(_)) => {
                    signal_bus.emit(ts_signal::SignalKind::ErrorRawPool, e.to_string());
                    std::process::exit(0);
                }
            }
        }
    }
}

/// Drains synchronizer-released frames in dispatch order and hands them
/// to the packager. A released buffer's pool slot returns to its pool
/// automatically when the `Frame` is dropped at the end of this loop
/// body.
pub fn run_dispatcher(
    synchronizer: Arc<FrameSynchronizer>,
    mut packager: Box<dyn PackagerSink>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let released = synchronizer.poll();
        if released.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }
        for frame in released {
            packager.accept(frame);
        }
    }
}
