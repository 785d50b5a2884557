// Copy speed estimation
// Sliding-window average over the last few copy cycles. Purely advisory;
// feeds the status line and nothing else.

use std::collections::VecDeque;
use std::time::Instant;

/// Default number of cycles the average is computed over.
pub const DEFAULT_SPEED_SAMPLES: usize = 5;

/// Calculates the average copy speed of the last `max_samples` copy
/// operations.
#[derive(Debug)]
pub struct SpeedMeter {
    max_samples: usize,
    cycle_start: Option<Instant>,
    seconds: VecDeque<f64>,
    bytes: VecDeque<u64>,
    average: Option<f64>,
}

impl SpeedMeter {
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples: max_samples.max(1),
            cycle_start: None,
            seconds: VecDeque::new(),
            bytes: VecDeque::new(),
            average: None,
        }
    }

    /// Marks the beginning of a copy cycle.
    pub fn start_of_cycle(&mut self) {
        self.cycle_start = Some(Instant::now());
    }

    /// Marks the end of a copy cycle that moved `bytes_copied` bytes and
    /// refreshes the windowed average. Ignored when no cycle was started.
    pub fn end_of_cycle(&mut self, bytes_copied: u64) {
        let Some(start) = self.cycle_start.take() else {
            return;
        };

        self.seconds.push_back(start.elapsed().as_secs_f64());
        self.bytes.push_back(bytes_copied);

        while self.seconds.len() > self.max_samples {
            self.seconds.pop_front();
            self.bytes.pop_front();
        }

        let total_seconds: f64 = self.seconds.iter().sum();
        if total_seconds > 0.0 {
            let total_bytes: u64 = self.bytes.iter().sum();
            self.average = Some(total_bytes as f64 / total_seconds);
        }
    }

    /// Average bytes per second over the window, or `None` until at least
    /// one cycle has completed.
    pub fn average(&self) -> Option<f64> {
        self.average
    }
}
