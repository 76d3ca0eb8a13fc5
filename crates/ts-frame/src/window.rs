//! A bounded sequence of Frames kept in ascending `full_time` order.
//!
//! The frame synchronizer owns one of these for video and one for audio.
//! Capacity is tuned empirically (`MAX_FRAME_DATA_SYNC_VIDEO` /
//! `MAX_FRAME_DATA_SYNC_AUDIO` upstream); exceeding it is not absorbed here —
//! it is surfaced as `WindowOverflow` so the caller can trigger a
//! synchronizer restart rather than silently growing without bound.

use crate::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOverflow {
    pub capacity: usize,
}

pub struct SortedWindow {
    capacity: usize,
    items: Vec<Frame>,
}

impl SortedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert `frame` in ascending `full_time` order. Returns
    /// `Err(WindowOverflow)` (and does not insert) once the window is at
    /// capacity — the caller owns the frame on the error path and is
    /// responsible for either restart-draining it or returning it directly.
    pub fn insert(&mut self, frame: Frame) -> Result<(), (Frame, WindowOverflow)> {
        if self.items.len() >= self.capacity {
            return Err((
                frame,
                WindowOverflow {
                    capacity: self.capacity,
                },
            ));
        }
        let pos = self
            .items
            .partition_point(|existing| existing.full_time <= frame.full_time);
        self.items.insert(pos, frame);
        Ok(())
    }

    pub fn peek_front(&self) -> Option<&Frame> {
        self.items.first()
    }

    pub fn pop_front(&mut self) -> Option<Frame> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Drain every held frame, returning its pool buffers as each `Frame` is
    /// dropped. Used on synchronizer restart.
    pub fn drain_all(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_pool::Pool;

    fn frame(full_time: i64, pool: &std::sync::Arc<Pool>) -> Frame {
        Frame {
            kind: crate::FrameKind::Video,
            codec: crate::MediaCodec::H264,
            source_index: 0,
            sub_stream_index: 0,
            header: pool.take(0).unwrap(),
            payload: pool.take(4).unwrap(),
            pts: full_time,
            dts: full_time,
            full_time,
            duration: 0,
            first_timestamp: 0,
            is_sync_frame: false,
            splice_point: crate::SplicePoint::None,
            splice_duration: 0,
            splice_duration_remaining: 0,
            language: None,
            caption: None,
            discontinuity: false,
        }
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let pool = Pool::new("test", 16, 4);
        let mut window = SortedWindow::new(16);
        window.insert(frame(30, &pool)).unwrap();
        window.insert(frame(10, &pool)).unwrap();
        window.insert(frame(20, &pool)).unwrap();

        assert_eq!(window.pop_front().unwrap().full_time, 10);
        assert_eq!(window.pop_front().unwrap().full_time, 20);
        assert_eq!(window.pop_front().unwrap().full_time, 30);
    }

    #[test]
    fn capacity_plus_one_triggers_overflow_not_silent_growth() {
        let pool = Pool::new("test", 8, 4);
        let mut window = SortedWindow::new(4);
        for t in 0..4 {
            window.insert(frame(t, &pool)).unwrap();
        }
        let (_returned, overflow) = window.insert(frame(99, &pool)).unwrap_err();
        assert_eq!(overflow.capacity, 4);
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn drain_all_releases_pool_slots() {
        let pool = Pool::new("test", 4, 4);
        let mut window = SortedWindow::new(4);
        window.insert(frame(1, &pool)).unwrap();
        window.insert(frame(2, &pool)).unwrap();
        assert_eq!(pool.unused_count(), 2);

        window.drain_all();
        assert_eq!(pool.unused_count(), 4);
    }
}
