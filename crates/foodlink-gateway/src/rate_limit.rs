use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-connection sliding-window limiter on inbound frames.
#[derive(Debug)]
pub struct SlidingWindow {
    max: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: VecDeque::with_capacity(max.min(1024)),
        }
    }

    /// Record a frame arriving at `now`. Returns false when the window is
    /// already full; rejected frames do not count against the window.
    pub fn check(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }

        if self.hits.len() >= self.max {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}
