use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::common::Frame;
use crate::config::FeedSettings;

/// Short time-ordered frame buffer owned by the feed source.
pub struct FrameBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
    low_water: usize,
    staleness: Duration,
}

impl FrameBuffer {
    pub fn new(settings: &FeedSettings) -> Self {
        let capacity = settings.capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            low_water: settings.low_water.min(capacity),
            staleness: settings.staleness(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn low_water(&self) -> usize {
        self.low_water
    }

    pub fn is_below_low_water(&self) -> bool {
        self.frames.len() < self.low_water
    }

    /// Appends a frame, dropping the oldest entry when full.
    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() >= self.capacity {
            self.sort();
            self.frames.pop_front();
            debug!("Frame buffer full, dropped oldest entry");
        }
        self.frames.push_back(frame);
    }

    fn sort(&mut self) {
        self.frames
            .make_contiguous()
            .sort_by_key(|frame| frame.captured_at());
    }

    /// Sorts by capture time and evicts stale entries while above the low-water mark.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        self.sort();
        let mut evicted = 0;
        while self.frames.len() > self.low_water {
            match self.frames.front() {
                Some(oldest) if now.saturating_duration_since(oldest.captured_at()) > self.staleness => {
                    self.frames.pop_front();
                    evicted += 1;
                }
                _ => break,
            }
        }
        evicted
    }

    /// Pops the oldest entry when more than one is buffered, otherwise peeks the only one.
    pub fn take(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop_front()
        } else {
            self.frames.front().cloned()
        }
    }

    /// The most recently captured entry, left in place.
    pub fn newest(&self) -> Option<Frame> {
        self.frames.iter().max_by_key(|frame| frame.captured_at()).cloned()
    }
}
